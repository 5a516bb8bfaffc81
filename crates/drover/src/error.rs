use std::time::Duration;

/// Failure while downloading or unpacking a source archive.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported archive format: {0}")]
    ArchiveFormat(String),

    #[error("archive entry escapes the destination: {0}")]
    PathEscape(String),

    #[error("download exceeded the {} second ceiling", .0.as_secs())]
    Timeout(Duration),
}

impl FetchError {
    /// Stable category tag surfaced in `last_error`.
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::HttpStatus(_) => "http-status",
            FetchError::Io(_) => "io",
            FetchError::ArchiveFormat(_) => "archive-format",
            FetchError::PathEscape(_) => "path-escape",
            FetchError::Timeout(_) => "timeout",
        }
    }
}

/// Failure while reading the process manifest out of an extracted tree.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("no Procfile at the archive root")]
    Missing,

    #[error("Procfile line {line}: expected `name: command`")]
    Syntax { line: usize },

    #[error("Procfile line {line}: invalid process name {name:?}")]
    InvalidName { line: usize, name: String },

    #[error("Procfile declares {name:?} more than once")]
    Duplicate { name: String },

    #[error("empty command for process type {name:?}")]
    EmptyCommand { name: String },

    #[error("unterminated quote in command")]
    UnterminatedQuote,

    #[error("failed to read Procfile: {0}")]
    Io(String),
}

/// Failure to accept a create request.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("{0}")]
    Invalid(String),

    #[error("slug already in use: {0}")]
    SlugInUse(String),
}
