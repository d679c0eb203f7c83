//! Error types for container entities

use thiserror::Error;

/// Errors that can occur while interpreting container metadata.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// Label selector has an empty key
    #[error("invalid label selector: {0:?}")]
    InvalidLabel(String),
}
