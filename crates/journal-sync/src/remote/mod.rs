//! Remote document store contract.
//!
//! The store is an external collaborator (a hosted document database). The
//! engine only relies on this narrow interface:
//! - point reads and queries over collections
//! - atomic batched writes tagged with a correlation ID
//! - subscriptions that deliver full snapshots plus per-document changes
//!
//! Implementations:
//! - `InMemoryRemote` - For testing and embedding
//! - `DirStore` (in journal-daemon) - JSON documents in a shared directory
//!
//! Paths alternate collection and document segments, e.g.
//! `journals/{journal}/entries/{entry}`. Field operations address top-level
//! fields only.

pub mod memory;
pub mod ops;

pub use memory::InMemoryRemote;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid operation on {path}: {reason}")]
    InvalidOperation { path: String, reason: String },

    /// A `FieldChange::Expect` did not hold; nothing in the batch was written.
    #[error("Precondition failed on {path}: field {field} changed")]
    PreconditionFailed { path: String, field: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Correlation ID attached to every write.
///
/// The store records it on each document the write touched, which lets a
/// subscriber tell its own echoes apart from other devices' changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteTag(uuid::Uuid);

impl WriteTag {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for WriteTag {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for WriteTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full path, e.g. `journals/abc/entries/def`.
    pub path: String,
    /// Document body (a JSON object).
    pub data: Value,
    /// Tag of the write that last touched this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_tag: Option<WriteTag>,
}

impl Document {
    pub fn new(path: impl Into<String>, data: Value) -> Self {
        Self {
            path: path.into(),
            data,
            write_tag: None,
        }
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path of the collection containing this document.
    pub fn collection(&self) -> &str {
        self.path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }
}

/// Single-field mutation used by `WriteOp::Update`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    /// Overwrite a field.
    Set { field: String, value: Value },
    /// Append values not already present in an array field.
    ArrayUnion { field: String, values: Vec<Value> },
    /// Remove every occurrence of the values from an array field.
    ArrayRemove { field: String, values: Vec<Value> },
    /// Add to a numeric field (missing counts as zero).
    Increment { field: String, by: i64 },
    /// Fail the whole batch unless the field currently holds `value`
    /// (missing counts as null).
    Expect { field: String, value: Value },
}

/// One operation of a batched write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the whole document.
    Set { path: String, data: Value },
    /// Deep-merge into the document, creating it if missing.
    Merge { path: String, data: Value },
    /// Apply field changes to an existing document (fails if missing).
    Update {
        path: String,
        changes: Vec<FieldChange>,
    },
    /// Remove the document.
    Delete { path: String },
}

impl WriteOp {
    pub fn path(&self) -> &str {
        match self {
            WriteOp::Set { path, .. }
            | WriteOp::Merge { path, .. }
            | WriteOp::Update { path, .. }
            | WriteOp::Delete { path } => path,
        }
    }
}

/// Query filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Array field contains the value.
    ArrayContains { field: String, value: Value },
    /// Field equals the value.
    Equals { field: String, value: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Query over the documents directly inside one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filter: None,
            order_by: None,
        }
    }

    pub fn where_array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter::ArrayContains {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_equals(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter::Equals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    pub fn order_by_asc(mut self, field: &str) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            descending: false,
        });
        self
    }
}

/// What a subscription watches.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Document(String),
    Query(Query),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// One delivery from a subscription.
///
/// The first batch holds the initial result with every document `Added`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    /// Full result after the change, in query order.
    pub docs: Vec<Document>,
    /// What changed since the previous batch.
    pub changes: Vec<DocChange>,
}

impl ChangeBatch {
    pub fn added(&self) -> impl Iterator<Item = &Document> {
        self.changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Added)
            .map(|c| &c.doc)
    }
}

/// Stream of change batches. A stream error ends the subscription.
pub type ChangeStream = BoxStream<'static, Result<ChangeBatch>>;

struct CancelInner {
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Cancels a subscription. Clones share state; cancelling twice is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    pub fn new(on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Some(Box::new(on_cancel))),
            }),
        }
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let on_cancel = self
            .inner
            .on_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(f) = on_cancel {
            f();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A live subscription: the change stream plus its cancel handle.
pub struct Subscription {
    pub changes: ChangeStream,
    pub cancel: CancelHandle,
}

/// Remote document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read one document.
    async fn get(&self, path: &str) -> Result<Option<Document>>;

    /// Deep-merge `data` into a document, creating it if missing.
    async fn set_merge(&self, path: &str, data: Value, tag: WriteTag) -> Result<()> {
        self.batch_write(
            vec![WriteOp::Merge {
                path: path.to_string(),
                data,
            }],
            tag,
        )
        .await
    }

    /// Apply all operations atomically: either every op lands or none does.
    async fn batch_write(&self, ops: Vec<WriteOp>, tag: WriteTag) -> Result<()>;

    /// Run a query once.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Watch a document or query until cancelled.
    async fn subscribe(&self, target: Target) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_document_id_and_collection() {
        let doc = Document::new("journals/j1/entries/e1", json!({}));
        assert_eq!(doc.id(), "e1");
        assert_eq!(doc.collection(), "journals/j1/entries");
    }

    #[test]
    fn test_cancel_handle_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let handle = CancelHandle::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        let other = handle.clone();

        handle.cancel();
        other.cancel();
        handle.cancel();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_write_tags_are_unique() {
        assert_ne!(WriteTag::new(), WriteTag::new());
    }
}
