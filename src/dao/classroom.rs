use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use crate::dao::{
    document_store::{DocumentStore, DocumentWatch, MergePatch, PrefixWatch},
    models::{MessageEntity, StreamEventEntity, VoteEntity},
    paths,
    storage::{StorageError, StorageResult},
};

/// Typed data access over the document store for one classroom, hiding
/// document-id construction and wire encoding from the protocols.
#[derive(Clone)]
pub struct ClassroomRepository {
    store: Arc<dyn DocumentStore>,
    classroom_id: String,
}

impl ClassroomRepository {
    /// Bind a repository to one classroom.
    pub fn new(store: Arc<dyn DocumentStore>, classroom_id: impl Into<String>) -> Self {
        Self {
            store,
            classroom_id: classroom_id.into(),
        }
    }

    /// Classroom this repository is bound to.
    pub fn classroom_id(&self) -> &str {
        &self.classroom_id
    }

    /// Merge-upsert the global participant profile.
    pub async fn upsert_profile(&self, participant_id: &str, full_name: &str) -> StorageResult<()> {
        let patch = MergePatch::new()
            .set("fullName", Value::from(full_name))
            .set("role", Value::from("student"))
            .set("createdAt", Value::from(wire_millis(OffsetDateTime::now_utc())));
        self.store
            .merge(&paths::profile_doc(participant_id), patch)
            .await
    }

    /// Merge-upsert this participant's attendee record in the classroom.
    pub async fn upsert_attendee(&self, participant_id: &str, full_name: &str) -> StorageResult<()> {
        let patch = MergePatch::new()
            .set("fullName", Value::from(full_name))
            .set("joinedAt", Value::from(wire_millis(OffsetDateTime::now_utc())));
        self.store
            .merge(&paths::attendee_doc(&self.classroom_id, participant_id), patch)
            .await
    }

    /// Write the vote document at its `(pollId, participantId)` key.
    pub async fn put_vote(&self, poll_id: &str, vote: &VoteEntity) -> StorageResult<()> {
        let doc_id = paths::vote_doc(&self.classroom_id, poll_id, &vote.participant_id);
        let body = serde_json::to_value(vote).map_err(|source| StorageError::codec(&doc_id, source))?;
        self.store.put(&doc_id, body).await
    }

    /// Write one per-option stream event for the visualization consumer.
    pub async fn put_stream_event(
        &self,
        poll_id: &str,
        participant_id: &str,
        option_index: usize,
        event: &StreamEventEntity,
    ) -> StorageResult<()> {
        let doc_id = paths::stream_event_doc(poll_id, participant_id, option_index);
        let body =
            serde_json::to_value(event).map_err(|source| StorageError::codec(&doc_id, source))?;
        self.store.put(&doc_id, body).await
    }

    /// Append a chat message, returning the generated document id.
    pub async fn append_message(&self, message: &MessageEntity) -> StorageResult<String> {
        let prefix = paths::message_prefix(&self.classroom_id);
        let body =
            serde_json::to_value(message).map_err(|source| StorageError::codec(&prefix, source))?;
        self.store.append(&prefix, body).await
    }

    /// Additive-increment the attendee's vote counter.
    pub async fn record_vote_cast(&self, participant_id: &str) -> StorageResult<()> {
        self.store
            .merge(
                &paths::attendee_doc(&self.classroom_id, participant_id),
                MergePatch::new().increment("voteCount", 1),
            )
            .await
    }

    /// Additive-increment the attendee's message counter.
    pub async fn record_message_sent(&self, participant_id: &str) -> StorageResult<()> {
        self.store
            .merge(
                &paths::attendee_doc(&self.classroom_id, participant_id),
                MergePatch::new().increment("messageCount", 1),
            )
            .await
    }

    /// Subscribe to the classroom document.
    pub fn watch_classroom(&self) -> DocumentWatch {
        self.store
            .watch_document(&paths::classroom_doc(&self.classroom_id))
    }

    /// Subscribe to a poll document in this classroom.
    pub fn watch_poll(&self, poll_id: &str) -> DocumentWatch {
        self.store
            .watch_document(&paths::poll_doc(&self.classroom_id, poll_id))
    }

    /// Subscribe to this participant's vote document for a poll. Only
    /// existence matters to the caller.
    pub fn watch_vote(&self, poll_id: &str, participant_id: &str) -> DocumentWatch {
        self.store
            .watch_document(&paths::vote_doc(&self.classroom_id, poll_id, participant_id))
    }

    /// Subscribe to the bounded, timestamp-ordered message window.
    pub fn watch_messages(&self, window: usize) -> PrefixWatch {
        self.store
            .watch_prefix(&paths::message_prefix(&self.classroom_id), window)
    }
}

/// Millisecond wire timestamp matching the entity encoding.
fn wire_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::memory::MemoryStore;
    use crate::dao::models::SelectedOption;
    use serde_json::json;

    fn repository(store: &MemoryStore) -> ClassroomRepository {
        ClassroomRepository::new(Arc::new(store.clone()), "c1")
    }

    #[tokio::test]
    async fn entry_upserts_do_not_clobber_counters() {
        let store = MemoryStore::new();
        let repo = repository(&store);

        repo.upsert_attendee("u1", "Ada").await.unwrap();
        repo.record_message_sent("u1").await.unwrap();
        // Re-entering merges name fields without resetting the counter.
        repo.upsert_attendee("u1", "Ada L.").await.unwrap();

        let attendee = store
            .fetch("classrooms::c1::attendees::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attendee["fullName"], json!("Ada L."));
        assert_eq!(attendee["messageCount"], json!(1));
    }

    #[tokio::test]
    async fn vote_lands_at_its_dedup_key() {
        let store = MemoryStore::new();
        let repo = repository(&store);

        let vote = VoteEntity {
            participant_id: "u1".into(),
            voter_name: "Ada".into(),
            selected_option: SelectedOption::Multiple(vec![0, 2]),
            timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        };
        repo.put_vote("p1", &vote).await.unwrap();

        let stored = store
            .fetch("classrooms::c1::polls::p1::votes::u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["selectedOption"], json!([0, 2]));
    }
}
