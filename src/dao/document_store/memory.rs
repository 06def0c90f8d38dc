//! In-memory document store used by tests and for running without a remote
//! backend. Change notification fans out over a broadcast channel; each watch
//! runs a forwarder task that re-reads the affected state on every notice.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use futures::future::BoxFuture;

use crate::dao::document_store::{
    DocumentSnapshot, DocumentStore, DocumentWatch, MergePatch, PrefixSnapshot, PrefixWatch,
    WatchGuard, order_window,
};
use crate::dao::storage::StorageResult;

/// Broadcast capacity for change notices; laggards resync from the table.
const CHANGE_CAPACITY: usize = 64;

/// Process-local [`DocumentStore`] backed by a concurrent map.
#[derive(Clone)]
pub struct MemoryStore {
    docs: Arc<DashMap<String, Value>>,
    changes: broadcast::Sender<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _receiver) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            docs: Arc::new(DashMap::new()),
            changes,
        }
    }

    fn notify(changes: &broadcast::Sender<String>, doc_id: &str) {
        let _ = changes.send(doc_id.to_string());
    }

    fn current(docs: &DashMap<String, Value>, doc_id: &str) -> Option<Value> {
        docs.get(doc_id).map(|entry| entry.value().clone())
    }

    fn window(docs: &DashMap<String, Value>, prefix: &str, window: usize) -> Vec<(String, Value)> {
        let rows = docs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        order_window(rows, window)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn fetch(&self, doc_id: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let docs = self.docs.clone();
        let doc_id = doc_id.to_string();
        Box::pin(async move { Ok(Self::current(&docs, &doc_id)) })
    }

    fn put(&self, doc_id: &str, body: Value) -> BoxFuture<'static, StorageResult<()>> {
        let docs = self.docs.clone();
        let changes = self.changes.clone();
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            docs.insert(doc_id.clone(), body);
            Self::notify(&changes, &doc_id);
            Ok(())
        })
    }

    fn merge(&self, doc_id: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>> {
        let docs = self.docs.clone();
        let changes = self.changes.clone();
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            {
                // The entry guard serializes concurrent patches on one
                // document, which keeps additive increments exact.
                let mut entry = docs
                    .entry(doc_id.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                patch.apply_to(entry.value_mut());
            }
            Self::notify(&changes, &doc_id);
            Ok(())
        })
    }

    fn append(&self, prefix: &str, body: Value) -> BoxFuture<'static, StorageResult<String>> {
        let docs = self.docs.clone();
        let changes = self.changes.clone();
        let doc_id = format!("{prefix}{}", Uuid::new_v4().simple());
        Box::pin(async move {
            docs.insert(doc_id.clone(), body);
            Self::notify(&changes, &doc_id);
            Ok(doc_id)
        })
    }

    fn watch_document(&self, doc_id: &str) -> DocumentWatch {
        let docs = self.docs.clone();
        let mut changes = self.changes.subscribe();
        let doc_id = doc_id.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let snapshot = DocumentSnapshot {
                doc_id: doc_id.clone(),
                body: Self::current(&docs, &doc_id),
            };
            if tx.send(snapshot).is_err() {
                return;
            }

            loop {
                match changes.recv().await {
                    Ok(changed) if changed == doc_id => {}
                    Ok(_) => continue,
                    // A lagged receiver missed notices; resync from the table.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                let snapshot = DocumentSnapshot {
                    doc_id: doc_id.clone(),
                    body: Self::current(&docs, &doc_id),
                };
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        DocumentWatch::new(rx, WatchGuard::new(handle))
    }

    fn watch_prefix(&self, prefix: &str, window: usize) -> PrefixWatch {
        let docs = self.docs.clone();
        let mut changes = self.changes.subscribe();
        let prefix = prefix.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let snapshot = PrefixSnapshot {
                rows: Self::window(&docs, &prefix, window),
            };
            if tx.send(snapshot).is_err() {
                return;
            }

            loop {
                match changes.recv().await {
                    Ok(changed) if changed.starts_with(&prefix) => {}
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                let snapshot = PrefixSnapshot {
                    rows: Self::window(&docs, &prefix, window),
                };
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        PrefixWatch::new(rx, WatchGuard::new(handle))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_fetch_round_trips() {
        let store = MemoryStore::new();
        store.put("doc::1", json!({"a": 1})).await.unwrap();
        let body = store.fetch("doc::1").await.unwrap();
        assert_eq!(body, Some(json!({"a": 1})));
        assert_eq!(store.fetch("doc::2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn merge_creates_and_unions() {
        let store = MemoryStore::new();
        store
            .merge("att::u1", MergePatch::new().set("fullName", json!("Ada")))
            .await
            .unwrap();
        store
            .merge("att::u1", MergePatch::new().increment("voteCount", 1))
            .await
            .unwrap();

        let body = store.fetch("att::u1").await.unwrap().unwrap();
        assert_eq!(body["fullName"], json!("Ada"));
        assert_eq!(body["voteCount"], json!(1));
    }

    #[tokio::test]
    async fn concurrent_increments_count_every_writer() {
        let store = MemoryStore::new();
        let participants = 32;

        let tasks: Vec<_> = (0..participants)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .merge("att::u1", MergePatch::new().increment("messageCount", 1))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let body = store.fetch("att::u1").await.unwrap().unwrap();
        assert_eq!(body["messageCount"], json!(participants));
    }

    #[tokio::test]
    async fn watch_document_delivers_initial_and_updates() {
        let store = MemoryStore::new();
        let mut watch = store.watch_document("doc::1");

        let initial = watch.next().await.unwrap();
        assert_eq!(initial.body, None);

        store.put("doc::1", json!({"v": 1})).await.unwrap();
        let update = watch.next().await.unwrap();
        assert_eq!(update.body, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn watch_prefix_orders_and_bounds_window() {
        let store = MemoryStore::new();
        let mut watch = store.watch_prefix("msg::", 2);
        assert!(watch.next().await.unwrap().rows.is_empty());

        for (ts, text) in [(30, "late"), (10, "early"), (20, "middle")] {
            store
                .append("msg::", json!({"timestamp": ts, "text": text}))
                .await
                .unwrap();
            watch.next().await.unwrap();
        }

        store
            .append("msg::", json!({"timestamp": 40, "text": "newest"}))
            .await
            .unwrap();
        let snapshot = watch.next().await.unwrap();
        let texts: Vec<&str> = snapshot
            .rows
            .iter()
            .map(|(_, body)| body["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["late", "newest"]);
    }

    #[tokio::test]
    async fn dropped_watch_stops_delivering() {
        let store = MemoryStore::new();
        let watch = store.watch_document("doc::1");
        drop(watch);
        // The forwarder is aborted by the guard; further writes must not panic.
        store.put("doc::1", json!({"v": 1})).await.unwrap();
    }
}
