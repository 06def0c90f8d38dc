//! Identity resolution for the participant. The provider seam stands in for
//! the external identity service; the shipped implementation recovers a
//! device-scoped anonymous identity or mints a fresh one.

use std::error::Error;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::state::local::LocalStore;

/// Durable participant identity, stable for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantIdentity {
    /// Opaque stable identifier.
    pub id: String,
}

/// Failure to issue or recover an identity credential.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl IdentityError {
    /// Construct an unavailable error from any provider failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        IdentityError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Seam to the external identity collaborator. Implementations must be
/// idempotent: repeated calls within a session return the same identity
/// without re-provisioning.
pub trait IdentityProvider: Send + Sync {
    /// Obtain the participant identity, provisioning one if necessary.
    fn ensure_identity(&self) -> BoxFuture<'_, Result<ParticipantIdentity, IdentityError>>;
}

/// Device-scoped anonymous identity backed by the participant marker file.
/// The first resolution mints a UUID and persists it; later resolutions (and
/// later sessions on the same device) recover the persisted value.
pub struct AnonymousIdentity {
    local: LocalStore,
    cached: OnceCell<ParticipantIdentity>,
}

impl AnonymousIdentity {
    /// Build a provider over the given marker store.
    pub fn new(local: LocalStore) -> Self {
        Self {
            local,
            cached: OnceCell::new(),
        }
    }

    async fn resolve(&self) -> Result<ParticipantIdentity, IdentityError> {
        let marker = self.local.load();
        if let Some(id) = marker.participant_id.clone() {
            return Ok(ParticipantIdentity { id });
        }

        let identity = ParticipantIdentity {
            id: Uuid::new_v4().simple().to_string(),
        };
        let mut updated = marker;
        updated.participant_id = Some(identity.id.clone());
        self.local.save(&updated).map_err(|source| {
            IdentityError::unavailable("could not persist participant identity".into(), source)
        })?;
        Ok(identity)
    }
}

impl IdentityProvider for AnonymousIdentity {
    fn ensure_identity(&self) -> BoxFuture<'_, Result<ParticipantIdentity, IdentityError>> {
        Box::pin(async move {
            self.cached
                .get_or_try_init(|| self.resolve())
                .await
                .cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> LocalStore {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "pawlive-identity-{}-{name}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        LocalStore::at(path)
    }

    #[tokio::test]
    async fn repeated_resolution_returns_the_same_identity() {
        let provider = AnonymousIdentity::new(temp_store("idempotent"));
        let first = provider.ensure_identity().await.unwrap();
        let second = provider.ensure_identity().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn identity_survives_a_new_provider_on_the_same_device() {
        let store = temp_store("durable");
        let first = AnonymousIdentity::new(store.clone())
            .ensure_identity()
            .await
            .unwrap();
        let second = AnonymousIdentity::new(store)
            .ensure_identity()
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn minting_leaves_entry_marker_incomplete() {
        let store = temp_store("marker");
        AnonymousIdentity::new(store.clone())
            .ensure_identity()
            .await
            .unwrap();
        let marker = store.load();
        assert!(marker.participant_id.is_some());
        assert!(!marker.is_entered());
    }
}
