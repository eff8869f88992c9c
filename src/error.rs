use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while reading, writing or transforming genotype and phenotype matrices.
#[derive(Debug, Error)]
pub enum PrepError {
    /// The file could not be opened, created, read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file contents disagree with the layout they claim to have.
    #[error("malformed file {path}: {message}")]
    Format { path: PathBuf, message: String },
    /// A caller-supplied parameter is out of range or inconsistent with the data.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A fitted standardization could not be encoded or decoded.
    #[error("serialization failure for {path}: {message}")]
    Serialization { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, PrepError>;

impl PrepError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        PrepError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: &Path, message: impl Into<String>) -> Self {
        PrepError::Format {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PrepError::InvalidArgument(message.into())
    }
}
