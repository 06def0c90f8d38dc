use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::dao::document_store::{
    DocumentSnapshot, DocumentStore, DocumentWatch, MergePatch, PrefixSnapshot, PrefixWatch,
    WatchGuard, order_window,
};
use crate::dao::storage::StorageResult;

use super::{
    changes::{LONGPOLL_TIMEOUT_MS, change_batches},
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{AllDocsResponse, ChangesResponse, CouchDocument, END_SUFFIX, strip_meta},
};

/// Bound on MVCC retry loops for merge-upserts under write contention.
const CONFLICT_RETRY_LIMIT: u32 = 5;

const SNAPSHOT_RETRY_INITIAL: Duration = Duration::from_millis(1_000);
const SNAPSHOT_RETRY_MAX: Duration = Duration::from_secs(10);

/// CouchDB-backed document store.
#[derive(Clone)]
pub struct CouchStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn database_request(&self, method: Method) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, self.database);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .database_request(Method::GET)
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self.database_request(Method::PUT).send().await.map_err(
                    |source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    },
                )?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<CouchDocument>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Write a document envelope, reporting a 409 as a retryable conflict.
    async fn try_put(&self, doc_id: &str, document: &CouchDocument) -> CouchResult<bool> {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Read-modify-write loop that re-reads the latest revision after every
    /// MVCC conflict, so concurrent field-level updates all land.
    async fn update_document(
        &self,
        doc_id: &str,
        apply: impl Fn(&mut Value),
    ) -> CouchResult<()> {
        for _attempt in 0..CONFLICT_RETRY_LIMIT {
            let existing = self.get_document(doc_id).await?;
            let (rev, mut body) = match existing {
                Some(doc) => (doc.rev, doc.body),
                None => (None, Value::Object(Map::new())),
            };
            apply(&mut body);

            let document = CouchDocument {
                id: doc_id.to_string(),
                rev,
                body,
            };
            if self.try_put(doc_id, &document).await? {
                return Ok(());
            }
        }

        Err(CouchDaoError::ConflictExhausted {
            doc_id: doc_id.to_string(),
            attempts: CONFLICT_RETRY_LIMIT,
        })
    }

    async fn list_window(&self, prefix: &str, window: usize) -> CouchResult<Vec<(String, Value)>> {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let rows = payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc.map(|doc| (row.id, strip_meta(doc))))
            .collect();
        Ok(order_window(rows, window))
    }

    /// Sequence token to start a change follower from, so snapshots fetched
    /// before the follower's first poll cannot outrun it.
    pub(super) async fn current_seq(&self) -> CouchResult<Value> {
        let database = self.database.to_string();
        let response = self
            .database_request(Method::GET)
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            });
        }

        let info =
            response
                .json::<Value>()
                .await
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: database,
                    source,
                })?;
        Ok(info.get("update_seq").cloned().unwrap_or(Value::from("now")))
    }

    /// One long-poll round against `_changes`.
    pub(super) async fn poll_changes(&self, since: &Value) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let since_token = match since {
            Value::String(token) => token.clone(),
            other => other.to_string(),
        };
        let query = [
            ("feed", "longpoll".to_string()),
            ("timeout", LONGPOLL_TIMEOUT_MS.to_string()),
            ("since", since_token),
        ];

        let response = self
            .request(Method::GET, CHANGES)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }

    /// Fetch a document body, retrying with backoff until the backend
    /// answers. Watch tasks prefer delayed snapshots over dead streams.
    async fn document_body_with_retry(&self, doc_id: &str) -> Option<Value> {
        let mut delay = SNAPSHOT_RETRY_INITIAL;
        loop {
            match self.get_document(doc_id).await {
                Ok(doc) => return doc.map(|doc| strip_meta(doc.body)),
                Err(err) => {
                    warn!(doc_id, error = %err, "snapshot fetch failed; retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(SNAPSHOT_RETRY_MAX);
                }
            }
        }
    }

    async fn window_with_retry(&self, prefix: &str, window: usize) -> Vec<(String, Value)> {
        let mut delay = SNAPSHOT_RETRY_INITIAL;
        loop {
            match self.list_window(prefix, window).await {
                Ok(rows) => return rows,
                Err(err) => {
                    warn!(prefix, error = %err, "window query failed; retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(SNAPSHOT_RETRY_MAX);
                }
            }
        }
    }

    async fn follower_start(&self) -> Value {
        match self.current_seq().await {
            Ok(seq) => seq,
            Err(err) => {
                warn!(error = %err, "could not read update_seq; following from now");
                Value::from("now")
            }
        }
    }
}

impl DocumentStore for CouchStore {
    fn fetch(&self, doc_id: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            let doc = store.get_document(&doc_id).await?;
            Ok(doc.map(|doc| strip_meta(doc.body)))
        })
    }

    fn put(&self, doc_id: &str, body: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            store
                .update_document(&doc_id, |current| *current = body.clone())
                .await
                .map_err(Into::into)
        })
    }

    fn merge(&self, doc_id: &str, patch: MergePatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            store
                .update_document(&doc_id, |current| patch.apply_to(current))
                .await
                .map_err(Into::into)
        })
    }

    fn append(&self, prefix: &str, body: Value) -> BoxFuture<'static, StorageResult<String>> {
        let store = self.clone();
        let doc_id = format!("{prefix}{}", Uuid::new_v4().simple());
        Box::pin(async move {
            let document = CouchDocument {
                id: doc_id.clone(),
                rev: None,
                body,
            };
            if store.try_put(&doc_id, &document).await? {
                Ok(doc_id)
            } else {
                // A generated id collided, which indicates a broken id source
                // rather than a retryable race.
                Err(CouchDaoError::ConflictExhausted { doc_id, attempts: 1 }.into())
            }
        })
    }

    fn watch_document(&self, doc_id: &str) -> DocumentWatch {
        let store = self.clone();
        let doc_id = doc_id.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let since = store.follower_start().await;
            let feed = change_batches(store.clone(), since);
            tokio::pin!(feed);

            let snapshot = DocumentSnapshot {
                doc_id: doc_id.clone(),
                body: store.document_body_with_retry(&doc_id).await,
            };
            if tx.send(snapshot).is_err() {
                return;
            }

            while let Some(ids) = feed.next().await {
                if !ids.iter().any(|id| id == &doc_id) {
                    continue;
                }
                let snapshot = DocumentSnapshot {
                    doc_id: doc_id.clone(),
                    body: store.document_body_with_retry(&doc_id).await,
                };
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        DocumentWatch::new(rx, WatchGuard::new(handle))
    }

    fn watch_prefix(&self, prefix: &str, window: usize) -> PrefixWatch {
        let store = self.clone();
        let prefix = prefix.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let since = store.follower_start().await;
            let feed = change_batches(store.clone(), since);
            tokio::pin!(feed);

            let snapshot = PrefixSnapshot {
                rows: store.window_with_retry(&prefix, window).await,
            };
            if tx.send(snapshot).is_err() {
                return;
            }

            while let Some(ids) = feed.next().await {
                if !ids.iter().any(|id| id.starts_with(&prefix)) {
                    continue;
                }
                let snapshot = PrefixSnapshot {
                    rows: store.window_with_retry(&prefix, window).await,
                };
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        PrefixWatch::new(rx, WatchGuard::new(handle))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.current_seq().await?;
            Ok(())
        })
    }
}
