//! FILENAME: matrix-engine/src/error.rs

use thiserror::Error;

/// Result type for the few fallible entry points (JSON loaders, checked constructors).
pub type MatrixResult<T> = Result<T, MatrixError>;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Invalid settings: {0}")]
    Config(#[source] serde_json::Error),

    #[error("Invalid matrix data: {0}")]
    Data(#[source] serde_json::Error),

    #[error("Invalid matrix state: {0}")]
    State(#[source] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
