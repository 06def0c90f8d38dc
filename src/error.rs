use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, services::identity::IdentityError};

/// Errors surfaced by the participant protocols.
///
/// `FanoutFailed` and `MessageFailed` are never returned to callers: the
/// vote document respectively the optimistic input clear already settled the
/// user-visible outcome, so those failures are only logged.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The identity provider could not issue or recover a credential.
    /// Blocks any write.
    #[error("identity unavailable")]
    AuthUnavailable(#[source] IdentityError),
    /// A session-gate upsert failed; no local state was committed and the
    /// whole entry may be retried.
    #[error("classroom entry failed")]
    EntryFailed(#[source] StorageError),
    /// The vote document write failed; the optimistic flag has been rolled
    /// back and the vote may be retried.
    #[error("vote submission failed")]
    VoteFailed(#[source] StorageError),
    /// A stream-event or counter write failed after the vote was durable.
    #[error("vote fan-out failed")]
    FanoutFailed(#[source] StorageError),
    /// A chat append or counter write failed.
    #[error("message send failed")]
    MessageFailed(#[source] StorageError),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<IdentityError> for ClientError {
    fn from(err: IdentityError) -> Self {
        ClientError::AuthUnavailable(err)
    }
}

impl From<ValidationErrors> for ClientError {
    fn from(err: ValidationErrors) -> Self {
        ClientError::InvalidInput(format!("validation failed: {}", err))
    }
}
