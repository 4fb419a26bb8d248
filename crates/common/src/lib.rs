//! Shared types for the saga coordinator workspace.
//!
//! Identifiers are UUID newtypes so a saga id can never be passed where a
//! message id is expected. [`RepositoryError`] is the error every persistence
//! interface in the workspace reports.

pub mod error;
pub mod types;

pub use error::RepositoryError;
pub use types::{
    BatchId, DeadLetterId, Headers, MessageId, Priority, SagaId, StepId, SubscriptionId,
};
