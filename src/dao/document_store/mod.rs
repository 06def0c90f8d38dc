//! Object-safe abstraction over the externally hosted document store.
//!
//! The store is consumed as an opaque realtime document service: point reads
//! and writes plus long-lived watches that deliver snapshots until cancelled.

pub mod memory;

#[cfg(feature = "couch-store")]
pub mod couchdb;

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dao::storage::StorageResult;

/// Field-level upsert: creates the document if absent, unions the supplied
/// fields into an existing one, and applies additive increments that commute
/// across concurrent writers. Unspecified fields are never touched.
#[derive(Debug, Clone, Default)]
pub struct MergePatch {
    fields: Map<String, Value>,
    increments: BTreeMap<String, i64>,
}

impl MergePatch {
    /// Start an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a value, replacing any previous value of that field.
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Add `delta` to a numeric field, treating an absent field as zero.
    pub fn increment(mut self, key: impl Into<String>, delta: i64) -> Self {
        *self.increments.entry(key.into()).or_insert(0) += delta;
        self
    }

    /// Whether the patch carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.increments.is_empty()
    }

    /// Apply the patch to a document body in place.
    ///
    /// Non-object bodies are replaced by an object first; increments on
    /// non-numeric fields restart the counter from the delta.
    pub fn apply_to(&self, body: &mut Value) {
        if !body.is_object() {
            *body = Value::Object(Map::new());
        }
        let object = body.as_object_mut().unwrap();

        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        for (key, delta) in &self.increments {
            let current = object.get(key).and_then(Value::as_i64).unwrap_or(0);
            object.insert(key.clone(), Value::from(current + delta));
        }
    }
}

/// Point-in-time value of a watched document. `body` is `None` while the
/// document does not exist, which is itself a meaningful signal (vote
/// existence drives the voted state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    /// Id of the watched document.
    pub doc_id: String,
    /// Current body, or `None` when absent.
    pub body: Option<Value>,
}

/// Point-in-time result of a watched prefix range: `(doc_id, body)` rows
/// ordered ascending by their numeric `timestamp` field and bounded to the
/// most recent entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixSnapshot {
    /// Ordered window rows.
    pub rows: Vec<(String, Value)>,
}

/// Cancellation guard for a watch's forwarder task. Dropping the guard
/// aborts the task, so no snapshot can be delivered past cancellation.
#[derive(Debug)]
pub struct WatchGuard {
    handle: JoinHandle<()>,
}

impl WatchGuard {
    /// Wrap a forwarder task handle.
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Live subscription to a single document. Delivers the current snapshot
/// immediately, then one snapshot per observed change, until cancelled.
#[derive(Debug)]
pub struct DocumentWatch {
    rx: mpsc::UnboundedReceiver<DocumentSnapshot>,
    _guard: WatchGuard,
}

impl DocumentWatch {
    /// Assemble a watch from its snapshot channel and forwarder guard.
    pub fn new(rx: mpsc::UnboundedReceiver<DocumentSnapshot>, guard: WatchGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Wait for the next snapshot. `None` once the watch has terminated.
    pub async fn next(&mut self) -> Option<DocumentSnapshot> {
        self.rx.recv().await
    }
}

/// Live subscription to a bounded, ordered window over a collection prefix.
#[derive(Debug)]
pub struct PrefixWatch {
    rx: mpsc::UnboundedReceiver<PrefixSnapshot>,
    _guard: WatchGuard,
}

impl PrefixWatch {
    /// Assemble a watch from its snapshot channel and forwarder guard.
    pub fn new(rx: mpsc::UnboundedReceiver<PrefixSnapshot>, guard: WatchGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Wait for the next window snapshot. `None` once the watch has terminated.
    pub async fn next(&mut self) -> Option<PrefixSnapshot> {
        self.rx.recv().await
    }
}

/// Abstraction over the hosted document store consumed by the sync core.
pub trait DocumentStore: Send + Sync {
    /// Read a document, `None` when it does not exist.
    fn fetch(&self, doc_id: &str) -> BoxFuture<'static, StorageResult<Option<Value>>>;

    /// Write a full document body, creating or replacing it.
    fn put(&self, doc_id: &str, body: Value) -> BoxFuture<'static, StorageResult<()>>;

    /// Merge-upsert a document (see [`MergePatch`]).
    fn merge(&self, doc_id: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>>;

    /// Create a document under `prefix` with a generated id, returning the id.
    fn append(&self, prefix: &str, body: Value) -> BoxFuture<'static, StorageResult<String>>;

    /// Subscribe to a single document's snapshots.
    fn watch_document(&self, doc_id: &str) -> DocumentWatch;

    /// Subscribe to the ordered window of the most recent `window` documents
    /// under `prefix`, sorted ascending by their `timestamp` field.
    fn watch_prefix(&self, prefix: &str, window: usize) -> PrefixWatch;

    /// Probe backend connectivity.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Sort rows ascending by their numeric `timestamp` field and keep the most
/// recent `window` entries. Shared by backends implementing `watch_prefix`.
pub(crate) fn order_window(mut rows: Vec<(String, Value)>, window: usize) -> Vec<(String, Value)> {
    rows.sort_by_key(|(id, body)| (timestamp_of(body), id.clone()));
    if rows.len() > window {
        rows.drain(..rows.len() - window);
    }
    rows
}

fn timestamp_of(body: &Value) -> i64 {
    body.get("timestamp").and_then(Value::as_i64).unwrap_or(0)
}
