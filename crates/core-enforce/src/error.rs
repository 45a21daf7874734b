//! Error types for core-enforce

use thiserror::Error;

/// Result type alias for enforcement operations
pub type Result<T> = std::result::Result<T, EnforceError>;

/// Errors that can occur while building a model or answering a request
#[derive(Error, Debug)]
pub enum EnforceError {
    /// Malformed model definition (fatal to construction)
    #[error("invalid model: {0}")]
    ModelParse(String),

    /// Rule arity mismatch, missing section or unknown definition key
    #[error("model shape: {0}")]
    ModelShape(String),

    /// Matcher references an unknown or ambiguous policy definition
    #[error("matcher misconfigured: {0}")]
    MatcherMisconfigured(String),

    /// Type mismatch or undefined symbol at expression evaluation time
    #[error("expression error: {0}")]
    Expression(String),

    /// Malformed path pattern (unterminated suffix, adjacent keys, ...)
    #[error("path pattern: {0}")]
    PatternCompile(String),

    /// Underlying storage failure; the model is left unchanged
    #[error("storage adapter: {0}")]
    Adapter(String),

    /// I/O failure on a storage path
    #[error("adapter io: {0}")]
    AdapterIo(#[from] std::io::Error),

    /// Operation is not supported by the configured adapter
    #[error("operation not supported by adapter")]
    NotSupported,
}

impl EnforceError {
    /// Shorthand used by the expression compiler and evaluator
    pub(crate) fn expr(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    /// Shorthand used by the model layer
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::ModelShape(msg.into())
    }
}
