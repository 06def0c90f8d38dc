use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use time::OffsetDateTime;

/// Lifecycle status of a classroom as written by the moderator console.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassroomStatus {
    /// No poll workflow is running; participants see the chat.
    #[default]
    None,
    /// The active poll accepts votes.
    Voting,
    /// The active poll is shown but no longer accepts votes.
    Locked,
}

/// Classroom document. Mutated exclusively by the moderator; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomEntity {
    /// Display title shown in the chat header.
    #[serde(default)]
    pub title: String,
    /// Whether the session is live. Only an explicit `false` means offline.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Current poll workflow status.
    #[serde(default)]
    pub status: ClassroomStatus,
    /// Reference to the poll currently driven by the moderator, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_poll_id: Option<String>,
}

/// Poll document scoped to one classroom. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollEntity {
    /// Question text shown above the options.
    pub question: String,
    /// Ordered option labels; votes reference them by index.
    pub options: Vec<String>,
    /// Whether a vote may select several options.
    #[serde(default)]
    pub is_multiple_choice: bool,
}

/// Shape of a vote's selection, determined by the poll's multiple-choice flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SelectedOption {
    /// Single-choice poll: one option index.
    Single(usize),
    /// Multiple-choice poll: the ordered selected indices.
    Multiple(Vec<usize>),
}

/// Vote document keyed by `(pollId, participantId)`. The key is the sole
/// de-duplication mechanism: document existence, not content, is the
/// authoritative "has voted" signal.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteEntity {
    /// Identity of the voting participant.
    #[serde(rename = "uid")]
    pub participant_id: String,
    /// Display name at the time of voting.
    pub voter_name: String,
    /// Selected option index or indices, shaped per the poll.
    pub selected_option: SelectedOption,
    /// Submission time in wire milliseconds.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: OffsetDateTime,
}

/// Per-option fan-out event consumed by the visualization collaborator.
/// Write-only from this client.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventEntity {
    /// Stringified option index, mirroring the consumer's expected shape.
    pub option_id: String,
    /// Emission time in wire milliseconds.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: OffsetDateTime,
}

/// Chat message appended to a classroom, ordered ascending by timestamp.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntity {
    /// Identity of the sender, used by consumers to mark own messages.
    #[serde(rename = "uid")]
    pub participant_id: String,
    /// Display name of the sender at send time.
    pub sender_name: String,
    /// Message body.
    pub text: String,
    /// Send time in wire milliseconds.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: OffsetDateTime,
}

fn default_true() -> bool {
    true
}
