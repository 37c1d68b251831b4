use std::path::{Path, PathBuf};

use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    #[error("remote version check")]
    CheckRemote,
    #[error("download")]
    Download,
    #[error("decompression")]
    Expand,
    #[error("integrity verification")]
    Verify,
    #[error("install")]
    Install,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {url} failed: {details}")]
    NetworkFailure { url: String, details: String },

    #[error("request to {url} returned HTTP {status}")]
    UnexpectedStatus { url: String, status: u16 },
}

impl TransportError {
    pub fn network<E>(url: &str, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::NetworkFailure {
            url: url.to_string(),
            details: error.to_string(),
        }
    }
}

/// Why an artifact download was abandoned.
#[derive(Error, Debug)]
pub enum DownloadCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("request to {url} failed: {details}")]
    NetworkFailure { url: String, details: String },

    #[error("request to {url} returned HTTP {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("remote version token at {url} was empty")]
    EmptyResponse { url: String },

    #[error("remote version token from {url} is malformed: expected {expected} hex characters, got {actual:?}")]
    MalformedToken {
        url: String,
        expected: usize,
        actual: String,
    },

    #[error("failed to download {url}: {cause}")]
    DownloadFailed {
        url: String,
        #[source]
        cause: DownloadCause,
    },

    #[error("failed to read compressed file {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write decompressed file {}: {source}", path.display())]
    DestUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt compressed stream in {}: {source}", path.display())]
    CorruptStream {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to hash {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hash mismatch: remote token {expected}, downloaded file hashes to {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<TransportError> for UpdateError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NetworkFailure { url, details } => {
                Self::NetworkFailure { url, details }
            }
            TransportError::UnexpectedStatus { url, status } => {
                Self::UnexpectedStatus { url, status }
            }
        }
    }
}

impl UpdateError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::NetworkFailure { .. }
            | Self::UnexpectedStatus { .. }
            | Self::EmptyResponse { .. }
            | Self::MalformedToken { .. } => Stage::CheckRemote,
            Self::DownloadFailed { .. } => Stage::Download,
            Self::SourceUnreadable { .. }
            | Self::DestUnwritable { .. }
            | Self::CorruptStream { .. } => Stage::Expand,
            Self::Unreadable { .. } | Self::HashMismatch { .. } => Stage::Verify,
            Self::MoveFailed { .. } => Stage::Install,
        }
    }

    /// A mismatch means the artifact may have been tampered with or
    /// corrupted in transit.
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::HashMismatch { .. })
    }

    pub(crate) fn download(url: &str, cause: impl Into<DownloadCause>) -> Self {
        Self::DownloadFailed {
            url: url.to_string(),
            cause: cause.into(),
        }
    }

    pub(crate) fn download_write(url: &str, path: &Path, source: std::io::Error) -> Self {
        Self::download(
            url,
            DownloadCause::Write {
                path: path.to_path_buf(),
                source,
            },
        )
    }

    pub(crate) fn source_unreadable(path: &Path, source: std::io::Error) -> Self {
        Self::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn dest_unwritable(path: &Path, source: std::io::Error) -> Self {
        Self::DestUnwritable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt_stream(path: &Path, source: std::io::Error) -> Self {
        Self::CorruptStream {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn unreadable(path: &Path, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("request timeout must be greater than zero")]
    ZeroRequestTimeout,

    #[error("{first} and {second} staging paths must differ: {}", path.display())]
    AliasedPaths {
        first: &'static str,
        second: &'static str,
        path: PathBuf,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    #[error("update schedule is already running")]
    AlreadyRunning,

    #[error("update schedule must be started from within a Tokio runtime")]
    NoRuntime,
}
