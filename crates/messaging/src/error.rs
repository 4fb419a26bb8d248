//! Messaging error types.

use common::RepositoryError;
use thiserror::Error;

use crate::broker::BrokerError;

/// Errors that can occur in the publisher, subscriber or dead-letter manager.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker refused or failed an operation.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The ledger or subscription store failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A caller supplied an unusable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience type alias for messaging results.
pub type Result<T> = std::result::Result<T, MessagingError>;
