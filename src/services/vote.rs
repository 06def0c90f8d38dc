//! Vote submission protocol: deduplicated multi-document write guarded by
//! the optimistic local vote flag.
//!
//! The vote document is the primary, authoritative write. Stream events and
//! the attendee counter trail it as best-effort fan-out; losing them
//! under-counts a visualization but never a poll result.

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    dao::models::{SelectedOption, StreamEventEntity, VoteEntity},
    error::ClientError,
    state::SharedSession,
};

/// Submit a vote for the given option indices.
///
/// Preconditions are checked client-side and an unmet one makes the call a
/// silent no-op: a poll must be cached, identity known, the selection
/// non-empty, and no vote recorded yet. On a primary write failure the
/// optimistic flag is rolled back and [`ClientError::VoteFailed`] is
/// returned; fan-out failures are logged and the vote stands.
pub async fn submit_vote(session: &SharedSession, selection: &[usize]) -> Result<(), ClientError> {
    let Some(identity) = session.identity().await else {
        debug!("vote ignored: identity not resolved");
        return Ok(());
    };
    let Some(active) = session.active_poll().await else {
        debug!("vote ignored: no poll on screen");
        return Ok(());
    };
    if selection.is_empty() {
        debug!("vote ignored: empty selection");
        return Ok(());
    }
    // Claims the optimistic flag; a rapid second submission stops here.
    if !session.try_begin_vote().await {
        debug!("vote ignored: already voted");
        return Ok(());
    }

    let selected_option = if active.poll.is_multiple_choice {
        SelectedOption::Multiple(selection.to_vec())
    } else {
        SelectedOption::Single(selection[0])
    };
    let vote = VoteEntity {
        participant_id: identity.id.clone(),
        voter_name: session.full_name().await.unwrap_or_default(),
        selected_option,
        timestamp: OffsetDateTime::now_utc(),
    };

    let repo = session.repository();
    if let Err(err) = repo.put_vote(&active.id, &vote).await {
        session.rollback_vote().await;
        return Err(ClientError::VoteFailed(err));
    }

    // Fan-out: one stream event per selected option, issued concurrently.
    let events = selection.iter().map(|&option_index| {
        let repo = repo.clone();
        let poll_id = active.id.clone();
        let participant_id = identity.id.clone();
        async move {
            let event = StreamEventEntity {
                option_id: option_index.to_string(),
                timestamp: OffsetDateTime::now_utc(),
            };
            repo.put_stream_event(&poll_id, &participant_id, option_index, &event)
                .await
        }
    });
    for err in futures::future::join_all(events)
        .await
        .into_iter()
        .filter_map(Result::err)
    {
        warn!(
            error = %ClientError::FanoutFailed(err),
            poll_id = %active.id,
            "stream event write failed; vote already durable"
        );
    }

    if let Err(err) = repo.record_vote_cast(&identity.id).await {
        warn!(
            error = %ClientError::FanoutFailed(err),
            "vote counter increment failed; vote already durable"
        );
    }

    Ok(())
}

/// Submit the multi-select buffer accumulated through
/// [`SessionState::toggle_option`](crate::state::SessionState::toggle_option).
pub async fn submit_selected(session: &SharedSession) -> Result<(), ClientError> {
    let selection = session.selected_options().await;
    submit_vote(session, &selection).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::memory::MemoryStore;
    use crate::dao::document_store::{
        DocumentStore, DocumentWatch, MergePatch, PrefixWatch,
    };
    use crate::dao::models::PollEntity;
    use crate::dao::storage::{StorageError, StorageResult};
    use crate::services::identity::ParticipantIdentity;
    use crate::state::local::LocalStore;
    use crate::state::{SessionState, SharedSession};
    use futures::future::BoxFuture;
    use serde_json::{Value, json};
    use std::sync::Arc;

    /// Memory store that fails writes whose document id matches a prefix.
    #[derive(Clone)]
    struct FailingWrites {
        inner: MemoryStore,
        failing_prefix: &'static str,
    }

    impl DocumentStore for FailingWrites {
        fn fetch(&self, doc_id: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
            self.inner.fetch(doc_id)
        }

        fn put(&self, doc_id: &str, body: Value) -> BoxFuture<'static, StorageResult<()>> {
            if doc_id.starts_with(self.failing_prefix) {
                let doc_id = doc_id.to_string();
                return Box::pin(async move {
                    Err(StorageError::unavailable(
                        format!("write to `{doc_id}` refused"),
                        std::io::Error::other("injected failure"),
                    ))
                });
            }
            self.inner.put(doc_id, body)
        }

        fn merge(&self, doc_id: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.merge(doc_id, patch)
        }

        fn append(&self, prefix: &str, body: Value) -> BoxFuture<'static, StorageResult<String>> {
            self.inner.append(prefix, body)
        }

        fn watch_document(&self, doc_id: &str) -> DocumentWatch {
            self.inner.watch_document(doc_id)
        }

        fn watch_prefix(&self, prefix: &str, window: usize) -> PrefixWatch {
            self.inner.watch_prefix(prefix, window)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }
    }

    fn temp_local(name: &str) -> LocalStore {
        let mut path = std::env::temp_dir();
        path.push(format!("pawlive-vote-{}-{name}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        LocalStore::at(path)
    }

    async fn voting_session(
        store: Arc<dyn DocumentStore>,
        name: &str,
        multiple_choice: bool,
    ) -> SharedSession {
        let session = SessionState::new(store, "c1", temp_local(name), 100);
        session
            .mark_entered(ParticipantIdentity { id: "u1".into() }, "Ada".into())
            .await;
        session
            .set_poll(
                "p1".into(),
                PollEntity {
                    question: "Q?".into(),
                    options: vec!["a".into(), "b".into(), "c".into()],
                    is_multiple_choice: multiple_choice,
                },
            )
            .await;
        session
    }

    #[tokio::test]
    async fn multi_select_vote_writes_document_and_two_stream_events() {
        let store = MemoryStore::new();
        let session = voting_session(Arc::new(store.clone()), "multi", true).await;

        submit_vote(&session, &[0, 2]).await.unwrap();

        let vote = store
            .fetch("classrooms::c1::polls::p1::votes::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vote["selectedOption"], json!([0, 2]));
        assert_eq!(vote["voterName"], json!("Ada"));

        for option_index in [0, 2] {
            let event = store
                .fetch(&format!("streams::p1::events::u1_{option_index}"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event["optionId"], json!(option_index.to_string()));
        }
        assert_eq!(
            store
                .fetch("streams::p1::events::u1_1")
                .await
                .unwrap(),
            None
        );

        let attendee = store
            .fetch("classrooms::c1::attendees::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attendee["voteCount"], json!(1));
    }

    #[tokio::test]
    async fn single_choice_vote_stores_a_scalar_index() {
        let store = MemoryStore::new();
        let session = voting_session(Arc::new(store.clone()), "single", false).await;

        submit_vote(&session, &[1]).await.unwrap();

        let vote = store
            .fetch("classrooms::c1::polls::p1::votes::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vote["selectedOption"], json!(1));
    }

    #[tokio::test]
    async fn second_submission_is_a_silent_no_op() {
        let store = MemoryStore::new();
        let session = voting_session(Arc::new(store.clone()), "double", false).await;

        submit_vote(&session, &[0]).await.unwrap();
        submit_vote(&session, &[1]).await.unwrap();

        let vote = store
            .fetch("classrooms::c1::polls::p1::votes::u1")
            .await
            .unwrap()
            .unwrap();
        // The first submission stands; the second never reached the store.
        assert_eq!(vote["selectedOption"], json!(0));
        let attendee = store
            .fetch("classrooms::c1::attendees::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attendee["voteCount"], json!(1));
    }

    #[tokio::test]
    async fn unmet_preconditions_write_nothing() {
        let store = MemoryStore::new();

        // No poll cached.
        let session = SessionState::new(Arc::new(store.clone()), "c1", temp_local("nopoll"), 100);
        session
            .mark_entered(ParticipantIdentity { id: "u1".into() }, "Ada".into())
            .await;
        submit_vote(&session, &[0]).await.unwrap();
        assert!(!session.has_voted().await);

        // Empty selection.
        let session = voting_session(Arc::new(store.clone()), "empty", true).await;
        submit_vote(&session, &[]).await.unwrap();
        assert!(!session.has_voted().await);
        assert_eq!(
            store
                .fetch("classrooms::c1::polls::p1::votes::u1")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn primary_write_failure_rolls_back_the_optimistic_flag() {
        let store = FailingWrites {
            inner: MemoryStore::new(),
            failing_prefix: "classrooms::c1::polls::p1::votes::",
        };
        let session = voting_session(Arc::new(store.clone()), "rollback", false).await;

        let err = submit_vote(&session, &[0]).await.unwrap_err();
        assert!(matches!(err, ClientError::VoteFailed(_)));
        assert!(!session.has_voted().await);

        // No fan-out may run after a failed primary write.
        assert_eq!(
            store.inner.fetch("streams::p1::events::u1_0").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn fanout_failure_leaves_the_vote_standing() {
        let store = FailingWrites {
            inner: MemoryStore::new(),
            failing_prefix: "streams::",
        };
        let session = voting_session(Arc::new(store.clone()), "fanout", false).await;

        submit_vote(&session, &[0]).await.unwrap();

        assert!(session.has_voted().await);
        let vote = store
            .inner
            .fetch("classrooms::c1::polls::p1::votes::u1")
            .await
            .unwrap();
        assert!(vote.is_some());
    }

    #[tokio::test]
    async fn submit_selected_drains_the_toggle_buffer() {
        let store = MemoryStore::new();
        let session = voting_session(Arc::new(store.clone()), "buffer", true).await;

        session.toggle_option(2).await;
        session.toggle_option(0).await;
        session.toggle_option(2).await;
        session.toggle_option(2).await;

        submit_selected(&session).await.unwrap();

        let vote = store
            .fetch("classrooms::c1::polls::p1::votes::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vote["selectedOption"], json!([0, 2]));
    }
}
