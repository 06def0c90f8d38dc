use serde::{Deserialize, Serialize};
use serde_json::Value;

/// High key suffix used to close `_all_docs` prefix ranges.
pub const END_SUFFIX: &str = "\u{ffff}";

/// Envelope around an arbitrary document body, carrying CouchDB's MVCC
/// metadata. The body keeps every field that is not `_id`/`_rev`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: Value,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// One page of the `_changes` feed.
#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    /// Opaque sequence token; a string on modern CouchDB, a number on 1.x.
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
}

/// Strip `_id`/`_rev` metadata from a fetched document body so callers see
/// only application fields.
pub fn strip_meta(mut body: Value) -> Value {
    if let Some(object) = body.as_object_mut() {
        object.remove("_id");
        object.remove("_rev");
    }
    body
}
