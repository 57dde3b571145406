//! Error types for the reminder engine
//!
//! All errors use thiserror for structured error handling.
//! Most of them are logged and swallowed by the scheduler; only
//! configuration and contract violations reach the host.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A scheduler was requested for a category that has none.
    #[error("No reminder scheduler for category: {0}")]
    UnknownCategory(String),

    /// A stored value could not be mapped back onto a model type.
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
