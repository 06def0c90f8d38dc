//! Chat submission protocol: fire-and-forget append with an optimistic
//! input clear. Message loss is acceptable degraded behavior; failures are
//! logged and never block the sender.

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{dao::models::MessageEntity, error::ClientError, state::SharedSession};

/// Append a chat message. No-op when the classroom is known inactive, the
/// identity is unknown, or the text is blank. Does not retry.
pub async fn send_message(session: &SharedSession, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        debug!("message ignored: blank text");
        return;
    }
    let Some(identity) = session.identity().await else {
        debug!("message ignored: identity not resolved");
        return;
    };
    // Only an explicit offline classroom blocks sending; a classroom that
    // has not loaded yet does not.
    if session
        .classroom()
        .await
        .is_some_and(|classroom| !classroom.is_active)
    {
        debug!("message ignored: classroom offline");
        return;
    }

    let message = MessageEntity {
        participant_id: identity.id.clone(),
        sender_name: session.full_name().await.unwrap_or_default(),
        text: trimmed.to_string(),
        timestamp: OffsetDateTime::now_utc(),
    };

    let repo = session.repository();
    match repo.append_message(&message).await {
        Ok(_doc_id) => {
            if let Err(err) = repo.record_message_sent(&identity.id).await {
                warn!(
                    error = %ClientError::MessageFailed(err),
                    "message counter increment failed; message already appended"
                );
            }
        }
        Err(err) => {
            warn!(error = %ClientError::MessageFailed(err), "message append failed");
        }
    }
}

/// Send the session's chat input buffer, clearing it before the write so the
/// input is free for the next message regardless of the outcome.
pub async fn send_buffered(session: &SharedSession) {
    let text = session.take_chat_input().await;
    send_message(session, &text).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::memory::MemoryStore;
    use crate::dao::document_store::DocumentStore;
    use crate::dao::models::ClassroomEntity;
    use crate::services::identity::ParticipantIdentity;
    use crate::state::local::LocalStore;
    use crate::state::{SessionState, SharedSession};
    use serde_json::json;
    use std::sync::Arc;

    fn temp_local(name: &str) -> LocalStore {
        let mut path = std::env::temp_dir();
        path.push(format!("pawlive-chat-{}-{name}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        LocalStore::at(path)
    }

    async fn chat_session(store: &MemoryStore, name: &str) -> SharedSession {
        let session = SessionState::new(Arc::new(store.clone()), "c1", temp_local(name), 100);
        session
            .mark_entered(ParticipantIdentity { id: "u1".into() }, "Ada".into())
            .await;
        session
    }

    async fn message_count(store: &MemoryStore) -> usize {
        let mut watch = store.watch_prefix("classrooms::c1::messages::", 100);
        watch.next().await.unwrap().rows.len()
    }

    #[tokio::test]
    async fn message_is_appended_and_counter_incremented() {
        let store = MemoryStore::new();
        let session = chat_session(&store, "happy").await;

        send_message(&session, "  hello everyone  ").await;

        let mut watch = store.watch_prefix("classrooms::c1::messages::", 100);
        let rows = watch.next().await.unwrap().rows;
        assert_eq!(rows.len(), 1);
        let (_id, body) = &rows[0];
        assert_eq!(body["text"], json!("hello everyone"));
        assert_eq!(body["uid"], json!("u1"));
        assert_eq!(body["senderName"], json!("Ada"));

        let attendee = store
            .fetch("classrooms::c1::attendees::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attendee["messageCount"], json!(1));
    }

    #[tokio::test]
    async fn blank_text_is_ignored() {
        let store = MemoryStore::new();
        let session = chat_session(&store, "blank").await;

        send_message(&session, "   ").await;
        assert_eq!(message_count(&store).await, 0);
    }

    #[tokio::test]
    async fn offline_classroom_blocks_sending() {
        let store = MemoryStore::new();
        let session = chat_session(&store, "offline").await;
        session
            .set_classroom(ClassroomEntity {
                title: "T".into(),
                is_active: false,
                status: Default::default(),
                active_poll_id: None,
            })
            .await;

        send_message(&session, "anyone there?").await;
        assert_eq!(message_count(&store).await, 0);
    }

    #[tokio::test]
    async fn unknown_identity_blocks_sending() {
        let store = MemoryStore::new();
        let session = SessionState::new(Arc::new(store.clone()), "c1", temp_local("noid"), 100);

        send_message(&session, "hello").await;
        assert_eq!(message_count(&store).await, 0);
    }

    #[tokio::test]
    async fn send_buffered_clears_input_before_the_write() {
        let store = MemoryStore::new();
        let session = chat_session(&store, "buffered").await;

        session.set_chat_input("first").await;
        send_buffered(&session).await;

        assert_eq!(session.take_chat_input().await, "");
        assert_eq!(message_count(&store).await, 1);

        // An empty buffer sends nothing.
        send_buffered(&session).await;
        assert_eq!(message_count(&store).await, 1);
    }
}
