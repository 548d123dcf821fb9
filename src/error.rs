//! Error types for claycode

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for claycode
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Field errors
    #[error("Cannot initialize GF(2^{w}): {reason}")]
    FieldInit { w: u32, reason: String },

    #[error("Division by zero in GF(2^{w})")]
    DivisionByZero { w: u32 },

    // Solver errors
    #[error("Singular decoding matrix: {0}")]
    SingularMatrix(String),

    // Session errors
    #[error("Invalid session state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: String,
    },

    #[error("Buffer size mismatch: expected {expected} bytes, got {got}")]
    BufferSize { expected: usize, got: usize },

    #[error("Unit {unit} has {got} bytes, expected {expected}")]
    UnitSize {
        unit: usize,
        expected: usize,
        got: usize,
    },

    #[error("Invalid erasure set: {0}")]
    InvalidErasure(String),

    // Storage errors
    #[error("Integrity check failed: expected {expected}, got {got}")]
    IntegrityMismatch { expected: String, got: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors raised before any stripe is processed
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::Config(_) | Error::FieldInit { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
