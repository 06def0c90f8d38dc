//! Flat document-id construction for the conceptual store paths.
//!
//! Backends address documents by a single string id. Collections are encoded
//! as id prefixes so a backend can range-scan them.

/// Separator between path segments inside a document id.
const SEP: &str = "::";

/// Global participant profile document.
pub fn profile_doc(participant_id: &str) -> String {
    format!("participants{SEP}{participant_id}")
}

/// Classroom document, moderator-owned.
pub fn classroom_doc(classroom_id: &str) -> String {
    format!("classrooms{SEP}{classroom_id}")
}

/// Per-classroom attendee record for one participant.
pub fn attendee_doc(classroom_id: &str, participant_id: &str) -> String {
    format!("classrooms{SEP}{classroom_id}{SEP}attendees{SEP}{participant_id}")
}

/// Poll document scoped to a classroom.
pub fn poll_doc(classroom_id: &str, poll_id: &str) -> String {
    format!("classrooms{SEP}{classroom_id}{SEP}polls{SEP}{poll_id}")
}

/// Vote document keyed by `(pollId, participantId)`.
pub fn vote_doc(classroom_id: &str, poll_id: &str, participant_id: &str) -> String {
    format!("classrooms{SEP}{classroom_id}{SEP}polls{SEP}{poll_id}{SEP}votes{SEP}{participant_id}")
}

/// Stream event keyed by `(pollId, participantId, optionIndex)`.
pub fn stream_event_doc(poll_id: &str, participant_id: &str, option_index: usize) -> String {
    format!("streams{SEP}{poll_id}{SEP}events{SEP}{participant_id}_{option_index}")
}

/// Prefix under which classroom messages are appended with generated ids.
pub fn message_prefix(classroom_id: &str) -> String {
    format!("classrooms{SEP}{classroom_id}{SEP}messages{SEP}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_id_carries_poll_and_participant() {
        assert_eq!(
            vote_doc("c1", "p1", "u1"),
            "classrooms::c1::polls::p1::votes::u1"
        );
    }

    #[test]
    fn stream_event_id_is_unique_per_option() {
        assert_ne!(
            stream_event_doc("p1", "u1", 0),
            stream_event_doc("p1", "u1", 2)
        );
        assert_eq!(stream_event_doc("p1", "u1", 2), "streams::p1::events::u1_2");
    }

    #[test]
    fn message_ids_share_the_classroom_prefix() {
        let prefix = message_prefix("c1");
        assert!(format!("{prefix}some-generated-id").starts_with(&prefix));
    }
}
