//! Common error types for DQA

use thiserror::Error;

/// Common result type for DQA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across DQA crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
