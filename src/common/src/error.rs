use std::fmt;

/// Failure classes shared by every pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required configuration or credentials are missing; never retried.
    Config,
    /// A remote endpoint failed or answered with a non-success status.
    Transport,
    /// An operation reported success but produced zero bytes.
    EmptyResult,
    /// A post-write integrity check did not hold.
    Verification,
    /// Some members of a batch operation failed.
    PartialFailure,
    /// Local filesystem failure.
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::EmptyResult => "empty_result",
            ErrorKind::Verification => "verification",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
