//! Human-readable renderings used in log lines and notifications.

use std::time::Duration;

use bytesize::ByteSize;

pub fn human_bytes(bytes: u64) -> String {
    ByteSize(bytes).to_string()
}

/// `45s` under a minute, `1m 30s` under an hour, `1h 1m` beyond.
pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
