//! Dependency-ordered subscription driver.
//!
//! One task owns every remote watch. The classroom watch is unconditional;
//! the poll, vote, and message watches are derived from classroom fields,
//! entry status, and identity, and are torn down and rebuilt whenever their
//! governing identifiers change. Snapshots from independent watches arrive
//! in any relative order; every arrival re-derives the screen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::dao::classroom::ClassroomRepository;
use crate::dao::document_store::{DocumentSnapshot, DocumentWatch, PrefixSnapshot, PrefixWatch};
use crate::dao::models::{ClassroomEntity, ClassroomStatus, MessageEntity, PollEntity};
use crate::services::identity::IdentityProvider;
use crate::state::SharedSession;

const IDENTITY_RETRY_INITIAL: Duration = Duration::from_millis(1_000);
const IDENTITY_RETRY_MAX: Duration = Duration::from_secs(10);

/// Downstream watches rebuilt by [`reconcile`] when upstream values change.
#[derive(Default)]
struct DependentSlots {
    poll: Option<DocumentWatch>,
    poll_key: Option<String>,
    vote: Option<DocumentWatch>,
    vote_key: Option<(String, String)>,
    messages: Option<PrefixWatch>,
}

/// Spawn the driver for a session. The task ends when
/// [`SessionState::shutdown`](crate::state::SessionState::shutdown) fires or
/// the classroom watch terminates; ending the task cancels every watch.
pub fn spawn(session: SharedSession, provider: Arc<dyn IdentityProvider>) -> JoinHandle<()> {
    tokio::spawn(run(session, provider))
}

/// Drive the session's subscriptions until shutdown.
pub async fn run(session: SharedSession, provider: Arc<dyn IdentityProvider>) {
    let mut shutdown = session.shutdown_watcher();

    // Identity gates every subscription; keep trying until the provider
    // answers or the session is torn down.
    if !resolve_identity(&session, provider.as_ref(), &mut shutdown).await {
        return;
    }

    let repo = session.repository();
    let mut classroom_watch = repo.watch_classroom();
    let mut entered = session.entered_watcher();
    let mut slots = DependentSlots::default();

    session.publish_screen().await;
    // A returning participant restores as entered; attach dependent watches
    // right away instead of waiting for a state change.
    reconcile(&session, &repo, &mut slots).await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("subscription driver shutting down");
                break;
            }
            maybe = classroom_watch.next() => {
                let Some(snapshot) = maybe else {
                    warn!("classroom watch terminated; stopping driver");
                    break;
                };
                apply_classroom(&session, snapshot).await;
                reconcile(&session, &repo, &mut slots).await;
                session.publish_screen().await;
            }
            result = entered.changed() => {
                if result.is_err() {
                    break;
                }
                reconcile(&session, &repo, &mut slots).await;
            }
            Some(snapshot) = next_document(&mut slots.poll) => {
                apply_poll(&session, &slots.poll_key, snapshot).await;
            }
            Some(snapshot) = next_document(&mut slots.vote) => {
                session.set_vote_observed(snapshot.body.is_some()).await;
            }
            Some(snapshot) = next_window(&mut slots.messages) => {
                apply_messages(&session, snapshot).await;
            }
        }
    }
    // Dropping the slots and the classroom watch aborts their forwarder
    // tasks, so no snapshot can mutate state past this point.
}

async fn resolve_identity(
    session: &SharedSession,
    provider: &dyn IdentityProvider,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut delay = IDENTITY_RETRY_INITIAL;
    loop {
        if session.identity().await.is_some() {
            return true;
        }
        match provider.ensure_identity().await {
            Ok(identity) => {
                session.set_identity(identity).await;
                return true;
            }
            Err(err) => {
                warn!(error = %err, "identity resolution failed; retrying");
                tokio::select! {
                    _ = shutdown.changed() => return false,
                    _ = sleep(delay) => {}
                }
                delay = (delay * 2).min(IDENTITY_RETRY_MAX);
            }
        }
    }
}

/// Next snapshot of an optional document watch; pending while unattached so
/// the branch never fires in `select!`.
async fn next_document(slot: &mut Option<DocumentWatch>) -> Option<DocumentSnapshot> {
    match slot {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

async fn next_window(slot: &mut Option<PrefixWatch>) -> Option<PrefixSnapshot> {
    match slot {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

async fn apply_classroom(session: &SharedSession, snapshot: DocumentSnapshot) {
    let Some(body) = snapshot.body else {
        debug!(doc_id = %snapshot.doc_id, "classroom document absent");
        return;
    };
    match serde_json::from_value::<ClassroomEntity>(body) {
        Ok(classroom) => session.set_classroom(classroom).await,
        Err(err) => warn!(doc_id = %snapshot.doc_id, error = %err, "bad classroom snapshot"),
    }
}

async fn apply_poll(session: &SharedSession, poll_key: &Option<String>, snapshot: DocumentSnapshot) {
    let Some(poll_id) = poll_key.clone() else {
        // Snapshot from a watch that has just been torn down.
        return;
    };
    let Some(body) = snapshot.body else {
        session.clear_poll().await;
        return;
    };
    match serde_json::from_value::<PollEntity>(body) {
        Ok(poll) => session.set_poll(poll_id, poll).await,
        Err(err) => warn!(doc_id = %snapshot.doc_id, error = %err, "bad poll snapshot"),
    }
}

async fn apply_messages(session: &SharedSession, snapshot: PrefixSnapshot) {
    let rows: Vec<(String, MessageEntity)> = snapshot
        .rows
        .into_iter()
        .filter_map(|(id, body)| match serde_json::from_value(body) {
            Ok(message) => Some((id, message)),
            Err(err) => {
                warn!(doc_id = %id, error = %err, "bad message snapshot");
                None
            }
        })
        .collect();
    session.replace_messages(rows).await;
}

/// Tear down and rebuild dependent watches to match the current upstream
/// values. Order matters: vote state resets synchronously with a poll-id
/// change, before the replacement vote watch can deliver.
async fn reconcile(
    session: &SharedSession,
    repo: &ClassroomRepository,
    slots: &mut DependentSlots,
) {
    let classroom = session.classroom().await;
    let identity = session.identity().await;
    let entered = session.is_entered();
    let status = classroom
        .as_ref()
        .map(|classroom| classroom.status)
        .unwrap_or_default();
    let active_poll_id = classroom
        .as_ref()
        .and_then(|classroom| classroom.active_poll_id.clone());

    // Vote watch: follows the active poll whenever identity is known,
    // independent of status.
    let vote_key = active_poll_id
        .clone()
        .zip(identity.as_ref().map(|identity| identity.id.clone()));
    if slots.vote_key != vote_key {
        slots.vote = None;
        session.reset_vote_state().await;
        slots.vote = vote_key
            .as_ref()
            .map(|(poll_id, participant_id)| repo.watch_vote(poll_id, participant_id));
        slots.vote_key = vote_key;
        debug!(key = ?slots.vote_key, "vote watch rebuilt");
    }

    // Poll watch: only while the classroom is collecting votes and the
    // session is entered. A transition to locked drops the watch but keeps
    // the cached poll on screen.
    let want_poll = entered && identity.is_some() && status == ClassroomStatus::Voting;
    let poll_key = if want_poll { active_poll_id } else { None };
    if slots.poll_key != poll_key {
        slots.poll = None;
        if poll_key.is_none() && status != ClassroomStatus::Locked {
            session.clear_poll().await;
        }
        slots.poll = poll_key.as_ref().map(|poll_id| repo.watch_poll(poll_id));
        slots.poll_key = poll_key;
        debug!(key = ?slots.poll_key, "poll watch rebuilt");
    }

    // Message window: attached once the session is entered.
    let want_messages = entered && identity.is_some();
    if want_messages != slots.messages.is_some() {
        slots.messages = want_messages.then(|| repo.watch_messages(session.message_window()));
        debug!(attached = want_messages, "message watch rebuilt");
    }
}
