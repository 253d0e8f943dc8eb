//! Error taxonomy shared by the caches, the extraction pipeline and the
//! document store.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("path escapes working directory {workdir}: {path}")]
    InvalidPath { path: PathBuf, workdir: PathBuf },
    #[error("{operation} failed: {stdout:?}\n{stderr:?}")]
    VersionControl {
        operation: String,
        stdout: String,
        stderr: String,
    },
    #[error("malformed data: {0}")]
    MalformedData(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable numeric code reported alongside the message of a failed save.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidPath { .. } => 400,
            Self::MalformedData(_) | Self::Json(_) => 422,
            Self::Transport(_) => 502,
            Self::VersionControl { .. } => 500,
            Self::Io { .. } => 500,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            message: self.to_string(),
            code: self.code(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.url() {
            Some(url) => Self::Transport(format!("{url}: {err}")),
            None => Self::Transport(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub message: String,
    pub code: u16,
}
