//! Long-polling `_changes` follower shared by the document and prefix
//! watches. Each watch runs one follower; failures back off and retry so a
//! flaky connection degrades to delayed snapshots rather than a dead watch.

use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use super::store::CouchStore;

const INITIAL_RETRY: Duration = Duration::from_millis(1_000);
const MAX_RETRY: Duration = Duration::from_secs(10);

/// Long-poll timeout requested from CouchDB, in milliseconds.
pub(super) const LONGPOLL_TIMEOUT_MS: u64 = 30_000;

/// Follow the database's change feed from `since`, yielding batches of
/// changed document ids. The stream never ends on its own; the owning watch
/// task is aborted on cancellation.
pub(super) fn change_batches(
    store: CouchStore,
    since: Value,
) -> impl Stream<Item = Vec<String>> + Send {
    stream! {
        let mut since = since;
        let mut delay = INITIAL_RETRY;

        loop {
            match store.poll_changes(&since).await {
                Ok(page) => {
                    delay = INITIAL_RETRY;
                    since = page.last_seq;
                    let ids: Vec<String> = page.results.into_iter().map(|row| row.id).collect();
                    if !ids.is_empty() {
                        yield ids;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "changes feed poll failed; backing off");
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY);
                }
            }
        }
    }
}
