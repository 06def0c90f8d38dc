//! Session gate: one-time registration of a display name, producing the
//! global profile and the per-classroom attendee record.

use serde::Deserialize;
use tracing::{info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    error::ClientError,
    services::identity::IdentityProvider,
    state::{SharedSession, local::ParticipantMarker},
};

/// Payload for entering a classroom.
#[derive(Debug, Deserialize)]
pub struct EnterRequest {
    /// Display name to register; must be non-empty after trimming.
    pub full_name: String,
}

impl Validate for EnterRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_display_name(&self.full_name) {
            errors.add("full_name", e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Validates that a display name is non-empty after trimming.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_empty");
        err.message = Some("display name must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Enter the classroom. Resolves identity, performs both merge-upserts, and
/// only then persists the local entry marker and transitions the session to
/// *Entered*. Both upserts are idempotent merges, so the whole operation is
/// safe to retry after an [`ClientError::EntryFailed`].
pub async fn enter(
    session: &SharedSession,
    provider: &dyn IdentityProvider,
    request: EnterRequest,
) -> Result<(), ClientError> {
    request.validate()?;
    let full_name = request.full_name.trim().to_string();

    let identity = provider.ensure_identity().await?;
    let repo = session.repository();

    repo.upsert_profile(&identity.id, &full_name)
        .await
        .map_err(ClientError::EntryFailed)?;
    repo.upsert_attendee(&identity.id, &full_name)
        .await
        .map_err(ClientError::EntryFailed)?;

    // Remote registration is durable; a marker write failure only costs the
    // returning-participant shortcut, so it does not fail the entry.
    let marker = ParticipantMarker {
        participant_id: Some(identity.id.clone()),
        full_name: Some(full_name.clone()),
    };
    if let Err(err) = session.local().save(&marker) {
        warn!(error = %err, "failed to persist entry marker");
    }

    session.mark_entered(identity, full_name).await;
    info!(classroom_id = session.classroom_id(), "entered classroom");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::memory::MemoryStore;
    use crate::dao::document_store::DocumentStore;
    use crate::services::identity::{IdentityError, ParticipantIdentity};
    use crate::state::local::LocalStore;
    use crate::state::SessionState;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::Arc;

    struct FixedIdentity(&'static str);

    impl IdentityProvider for FixedIdentity {
        fn ensure_identity(&self) -> BoxFuture<'_, Result<ParticipantIdentity, IdentityError>> {
            let id = self.0.to_string();
            Box::pin(async move { Ok(ParticipantIdentity { id }) })
        }
    }

    struct BrokenIdentity;

    impl IdentityProvider for BrokenIdentity {
        fn ensure_identity(&self) -> BoxFuture<'_, Result<ParticipantIdentity, IdentityError>> {
            Box::pin(async move {
                Err(IdentityError::unavailable(
                    "offline".into(),
                    std::io::Error::other("no network"),
                ))
            })
        }
    }

    fn temp_local(name: &str) -> LocalStore {
        let mut path = std::env::temp_dir();
        path.push(format!("pawlive-entry-{}-{name}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        LocalStore::at(path)
    }

    fn make_session(store: &MemoryStore, local: LocalStore) -> crate::state::SharedSession {
        SessionState::new(Arc::new(store.clone()), "c1", local, 100)
    }

    #[tokio::test]
    async fn enter_registers_profile_and_attendee_then_marks_entered() {
        let store = MemoryStore::new();
        let local = temp_local("happy");
        let session = make_session(&store, local.clone());

        enter(
            &session,
            &FixedIdentity("u1"),
            EnterRequest {
                full_name: "  Ada  ".into(),
            },
        )
        .await
        .unwrap();

        let profile = store.fetch("participants::u1").await.unwrap().unwrap();
        assert_eq!(profile["fullName"], json!("Ada"));
        assert_eq!(profile["role"], json!("student"));

        let attendee = store
            .fetch("classrooms::c1::attendees::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attendee["fullName"], json!("Ada"));

        assert!(session.is_entered());
        assert!(local.load().is_entered());
    }

    #[tokio::test]
    async fn blank_name_is_rejected_before_any_write() {
        let store = MemoryStore::new();
        let session = make_session(&store, temp_local("blank"));

        let err = enter(
            &session,
            &FixedIdentity("u1"),
            EnterRequest {
                full_name: "   ".into(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::InvalidInput(_)));
        assert!(!session.is_entered());
        assert_eq!(store.fetch("participants::u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn auth_failure_blocks_entry() {
        let store = MemoryStore::new();
        let local = temp_local("auth");
        let session = make_session(&store, local.clone());

        let err = enter(
            &session,
            &BrokenIdentity,
            EnterRequest {
                full_name: "Ada".into(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::AuthUnavailable(_)));
        assert!(!session.is_entered());
        assert!(!local.load().is_entered());
    }

    #[tokio::test]
    async fn reentry_is_idempotent_over_stored_content() {
        let store = MemoryStore::new();
        let session = make_session(&store, temp_local("idempotent"));

        for _ in 0..2 {
            enter(
                &session,
                &FixedIdentity("u1"),
                EnterRequest {
                    full_name: "Ada".into(),
                },
            )
            .await
            .unwrap();
        }

        let profile = store.fetch("participants::u1").await.unwrap().unwrap();
        assert_eq!(profile["fullName"], json!("Ada"));
        let attendee = store
            .fetch("classrooms::c1::attendees::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attendee["fullName"], json!("Ada"));
    }
}
