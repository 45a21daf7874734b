//! Error types for model and rule file handling

use thiserror::Error;

/// Errors raised while reading model or rule files
#[derive(Error, Debug)]
pub enum Error {
    /// File could not be read or written
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed model file
    #[error("model file, line {line}: {msg}")]
    Parse {
        /// 1-based source line
        line: usize,
        /// What went wrong
        msg: String,
    },

    /// Failure inside the core engine
    #[error(transparent)]
    Core(#[from] core_enforce::EnforceError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
