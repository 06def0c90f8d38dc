//! Shared session state: the locally cached projections of remote documents,
//! the optimistic local flags, and the derived-screen channel.

pub mod local;
pub mod screen;
pub mod subscriptions;

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{RwLock, watch};

use crate::dao::{
    classroom::ClassroomRepository,
    document_store::DocumentStore,
    models::{ClassroomEntity, MessageEntity, PollEntity},
};
use crate::services::identity::ParticipantIdentity;

pub use self::local::{LocalStore, ParticipantMarker};
pub use self::screen::{PollPhase, ScreenState, derive_screen};

/// Handle to the shared session state, cloned cheaply across tasks.
pub type SharedSession = Arc<SessionState>;

/// The poll currently cached for rendering, along with its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePoll {
    /// Poll document id referenced by the classroom.
    pub id: String,
    /// Cached poll content.
    pub poll: PollEntity,
}

/// Central state for one participant session.
///
/// Remote projections (`classroom`, `poll`, `messages`, vote existence) have
/// a single writer, the subscription driver; optimistic flags (`has_voted`,
/// selection and input buffers) are written by the submission protocols.
/// Every mutation republishes the derived screen.
pub struct SessionState {
    store: Arc<dyn DocumentStore>,
    classroom_id: String,
    local: LocalStore,
    message_window: usize,

    identity: RwLock<Option<ParticipantIdentity>>,
    full_name: RwLock<Option<String>>,
    entered: watch::Sender<bool>,

    classroom: RwLock<Option<ClassroomEntity>>,
    poll: RwLock<Option<ActivePoll>>,
    has_voted: RwLock<bool>,
    selected_options: RwLock<Vec<usize>>,
    chat_input: RwLock<String>,
    messages: RwLock<IndexMap<String, MessageEntity>>,

    screen: watch::Sender<ScreenState>,
    shutdown: watch::Sender<bool>,
}

impl SessionState {
    /// Construct session state for one classroom, seeding identity and entry
    /// status from the persisted participant marker so a returning
    /// participant skips the entry gate.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        classroom_id: impl Into<String>,
        local: LocalStore,
        message_window: usize,
    ) -> SharedSession {
        let marker = local.load();
        let identity = marker
            .participant_id
            .clone()
            .map(|id| ParticipantIdentity { id });
        let entered = marker.is_entered();

        let (entered_tx, _rx) = watch::channel(entered);
        let (screen_tx, _rx) = watch::channel(ScreenState::Connecting);
        let (shutdown_tx, _rx) = watch::channel(false);

        Arc::new(Self {
            store,
            classroom_id: classroom_id.into(),
            local,
            message_window,
            identity: RwLock::new(identity),
            full_name: RwLock::new(marker.full_name),
            entered: entered_tx,
            classroom: RwLock::new(None),
            poll: RwLock::new(None),
            has_voted: RwLock::new(false),
            selected_options: RwLock::new(Vec::new()),
            chat_input: RwLock::new(String::new()),
            messages: RwLock::new(IndexMap::new()),
            screen: screen_tx,
            shutdown: shutdown_tx,
        })
    }

    /// Typed repository bound to this session's classroom.
    pub fn repository(&self) -> ClassroomRepository {
        ClassroomRepository::new(self.store.clone(), self.classroom_id.clone())
    }

    /// Classroom this session is attached to.
    pub fn classroom_id(&self) -> &str {
        &self.classroom_id
    }

    /// Local marker store for this device.
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Bounded size of the message window subscription.
    pub fn message_window(&self) -> usize {
        self.message_window
    }

    /// Resolved participant identity, if known.
    pub async fn identity(&self) -> Option<ParticipantIdentity> {
        self.identity.read().await.clone()
    }

    /// Record the resolved identity.
    pub async fn set_identity(&self, identity: ParticipantIdentity) {
        *self.identity.write().await = Some(identity);
    }

    /// Display name registered at entry, if any.
    pub async fn full_name(&self) -> Option<String> {
        self.full_name.read().await.clone()
    }

    /// Whether the session gate has been passed.
    pub fn is_entered(&self) -> bool {
        *self.entered.borrow()
    }

    /// Subscribe to entry-state changes.
    pub fn entered_watcher(&self) -> watch::Receiver<bool> {
        self.entered.subscribe()
    }

    /// Transition to *Entered* after both entry upserts succeeded.
    pub async fn mark_entered(&self, identity: ParticipantIdentity, full_name: String) {
        *self.identity.write().await = Some(identity);
        *self.full_name.write().await = Some(full_name);
        self.entered.send_if_modified(|entered| {
            let changed = !*entered;
            *entered = true;
            changed
        });
        self.publish_screen().await;
    }

    /// Subscribe to derived screen-state changes.
    pub fn screen_watcher(&self) -> watch::Receiver<ScreenState> {
        self.screen.subscribe()
    }

    /// Currently derived screen.
    pub fn current_screen(&self) -> ScreenState {
        *self.screen.borrow()
    }

    /// Latest classroom projection.
    pub async fn classroom(&self) -> Option<ClassroomEntity> {
        self.classroom.read().await.clone()
    }

    /// Install a classroom snapshot. Publishing is left to the driver, which
    /// first reconciles dependent watches; otherwise a poll-id change could
    /// momentarily attribute the old poll's vote status to the new poll.
    pub async fn set_classroom(&self, classroom: ClassroomEntity) {
        *self.classroom.write().await = Some(classroom);
    }

    /// Currently cached poll.
    pub async fn active_poll(&self) -> Option<ActivePoll> {
        self.poll.read().await.clone()
    }

    /// Install a poll snapshot.
    pub async fn set_poll(&self, id: String, poll: PollEntity) {
        *self.poll.write().await = Some(ActivePoll { id, poll });
        self.publish_screen().await;
    }

    /// Drop the cached poll (not done on a transition to locked).
    pub async fn clear_poll(&self) {
        *self.poll.write().await = None;
        self.publish_screen().await;
    }

    /// Record observed existence of this participant's vote document. A
    /// disappearing document also clears the selection buffer.
    pub async fn set_vote_observed(&self, exists: bool) {
        *self.has_voted.write().await = exists;
        if !exists {
            self.selected_options.write().await.clear();
        }
        self.publish_screen().await;
    }

    /// Reset vote state before a new vote subscription can deliver, so an
    /// old poll's vote status is never attributed to a new poll.
    pub async fn reset_vote_state(&self) {
        *self.has_voted.write().await = false;
        self.selected_options.write().await.clear();
        self.publish_screen().await;
    }

    /// Whether a vote has been observed or optimistically recorded.
    pub async fn has_voted(&self) -> bool {
        *self.has_voted.read().await
    }

    /// Optimistically claim the vote slot. Returns `false` when a vote is
    /// already recorded, which makes rapid double-submission a no-op.
    pub async fn try_begin_vote(&self) -> bool {
        let mut has_voted = self.has_voted.write().await;
        if *has_voted {
            return false;
        }
        *has_voted = true;
        drop(has_voted);
        self.publish_screen().await;
        true
    }

    /// Roll the optimistic vote flag back after a failed primary write.
    pub async fn rollback_vote(&self) {
        *self.has_voted.write().await = false;
        self.publish_screen().await;
    }

    /// Toggle one option in the multi-select buffer.
    pub async fn toggle_option(&self, option_index: usize) {
        let mut selected = self.selected_options.write().await;
        if let Some(position) = selected.iter().position(|&idx| idx == option_index) {
            selected.remove(position);
        } else {
            selected.push(option_index);
        }
    }

    /// Current multi-select buffer.
    pub async fn selected_options(&self) -> Vec<usize> {
        self.selected_options.read().await.clone()
    }

    /// Replace the chat input buffer.
    pub async fn set_chat_input(&self, text: impl Into<String>) {
        *self.chat_input.write().await = text.into();
    }

    /// Take the chat input buffer, clearing it optimistically.
    pub async fn take_chat_input(&self) -> String {
        std::mem::take(&mut *self.chat_input.write().await)
    }

    /// Replace the message window with a fresh ordered snapshot.
    pub async fn replace_messages(&self, rows: Vec<(String, MessageEntity)>) {
        *self.messages.write().await = rows.into_iter().collect();
    }

    /// Ordered messages currently in the window.
    pub async fn messages(&self) -> Vec<MessageEntity> {
        self.messages.read().await.values().cloned().collect()
    }

    /// Re-derive the screen from the cached slots and publish on change.
    pub async fn publish_screen(&self) {
        let classroom = self.classroom.read().await;
        let poll_cached = self.poll.read().await.is_some();
        let has_voted = *self.has_voted.read().await;
        let entered = self.is_entered();

        let next = derive_screen(classroom.as_ref(), poll_cached, has_voted, entered);
        drop(classroom);

        self.screen.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Request total teardown of the subscription driver.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_watcher(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
