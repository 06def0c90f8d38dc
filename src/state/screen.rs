//! Pure derivation of the participant-facing screen from the independently
//! updating remote signals. Safe to re-evaluate on every snapshot arrival;
//! the result depends only on the argument tuple, never on arrival order.

use crate::dao::models::{ClassroomEntity, ClassroomStatus};

/// Whether the rendered poll still accepts interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Options are interactive and a vote may be submitted.
    Voting,
    /// The moderator locked the poll; options render but are inert.
    Locked,
}

/// Exactly one participant-facing mode at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    /// Classroom document not yet loaded.
    Connecting,
    /// The moderator ended the session.
    ClassOffline,
    /// Classroom is live but this participant has not registered a name.
    EntryGate,
    /// A poll is on screen.
    Poll {
        /// Mirrors the classroom status (voting or locked).
        phase: PollPhase,
        /// Confirmation sub-state; overrides interactivity in either phase.
        has_voted: bool,
    },
    /// Fallback: entered, classroom live, no poll on screen.
    Chat,
}

/// Derive the current screen. The tie-break order is fixed: offline wins
/// over everything (including the entry gate), then the entry gate, then an
/// on-screen poll, then the chat fallback.
pub fn derive_screen(
    classroom: Option<&ClassroomEntity>,
    poll_cached: bool,
    has_voted: bool,
    entered: bool,
) -> ScreenState {
    let Some(classroom) = classroom else {
        return ScreenState::Connecting;
    };

    if !classroom.is_active {
        return ScreenState::ClassOffline;
    }

    if !entered {
        return ScreenState::EntryGate;
    }

    let phase = match classroom.status {
        ClassroomStatus::Voting => Some(PollPhase::Voting),
        ClassroomStatus::Locked => Some(PollPhase::Locked),
        ClassroomStatus::None => None,
    };
    if let Some(phase) = phase
        && poll_cached
    {
        return ScreenState::Poll { phase, has_voted };
    }

    ScreenState::Chat
}
