//! Streaming content digests and `sha256sum`-compatible sidecar files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// `<hex><1-2 whitespace><filename>`; the filename takes the rest of the line.
static SIDECAR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-fA-F]+)\s{1,2}(.+)$").expect("valid sidecar regex"));

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("failed to read {path} for checksum: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Suffix of the sidecar file, e.g. `backup.tar.gz.sha256`.
    pub fn extension(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Digest of a file, read in fixed-size chunks.
pub async fn digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, ChecksumError> {
    let io_err = |source| ChecksumError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buf).await.map_err(io_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hasher.finalize_hex())
}

pub fn digest_bytes(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Case-insensitive comparison. A mismatch is reported, not raised.
pub fn verify(actual: &str, expected: &str) -> bool {
    let matches = actual.trim().eq_ignore_ascii_case(expected.trim());
    if !matches {
        tracing::debug!(actual, expected, "checksum mismatch");
    }
    matches
}

/// `"<hex>  <filename>\n"`, the format `sha256sum -c` reads.
pub fn format_sidecar(hex_digest: &str, filename: &str) -> String {
    format!("{}  {}\n", hex_digest.to_ascii_lowercase(), filename)
}

/// Parses sidecar text into `filename -> lowercase digest`. Lines that do
/// not look like a digest entry are skipped.
pub fn parse_sidecar(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let caps = SIDECAR_LINE.captures(line)?;
            Some((caps[2].to_string(), caps[1].to_ascii_lowercase()))
        })
        .collect()
}

/// A computed digest together with the file it describes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub hex: String,
    pub algorithm: ChecksumAlgorithm,
    pub filename: String,
}

impl ChecksumRecord {
    /// Digests `path`, naming the record after its file name.
    pub async fn compute(path: &Path, algorithm: ChecksumAlgorithm) -> Result<Self, ChecksumError> {
        let hex = digest(path, algorithm).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            hex,
            algorithm,
            filename,
        })
    }

    pub fn sidecar_line(&self) -> String {
        format_sidecar(&self.hex, &self.filename)
    }

    /// Writes the sidecar next to `archive_path` and returns its path.
    pub async fn write_sidecar(&self, archive_path: &Path) -> Result<PathBuf, ChecksumError> {
        let mut sidecar = archive_path.as_os_str().to_owned();
        sidecar.push(".");
        sidecar.push(self.algorithm.extension());
        let sidecar = PathBuf::from(sidecar);

        tokio::fs::write(&sidecar, self.sidecar_line())
            .await
            .map_err(|source| ChecksumError::Io {
                path: sidecar.clone(),
                source,
            })?;
        Ok(sidecar)
    }
}
