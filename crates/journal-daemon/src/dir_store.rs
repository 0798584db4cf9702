//! Remote store backed by a directory of JSON documents.
//!
//! Document `a/b/c/d` lives at `<root>/a/b/c/d.json` as
//! `{"data": {...}, "writeTag": "..."}`. Several devices may point at the same
//! directory (a network share, a synced folder); each one learns about the
//! others' writes through a debounced file watcher.
//!
//! Batches are staged in memory and only written once every op applied, so a
//! failing batch writes nothing. Writes from one process are serialized;
//! concurrent writers in different processes are last-writer-wins per file.

use crate::watcher::StoreWatcher;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use journal_sync::remote::{
    ops, CancelHandle, ChangeBatch, ChangeKind, DocChange, Document, Query, RemoteError,
    RemoteStore, Result, Subscription, Target, WriteOp, WriteTag,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EXTENSION: &str = "json";

/// On-disk form of a document.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDoc {
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    write_tag: Option<WriteTag>,
}

struct Watcher {
    target: Target,
    last: Vec<Document>,
    tx: mpsc::UnboundedSender<Result<ChangeBatch>>,
}

/// Directory-backed document store. Clones share watchers.
#[derive(Clone)]
pub struct DirStore {
    root: PathBuf,
    watchers: Arc<Mutex<Vec<Watcher>>>,
    write_lock: Arc<Mutex<()>>,
}

fn storage_error(path: &str, e: impl std::fmt::Display) -> RemoteError {
    RemoteError::Storage(format!("{}: {}", path, e))
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            watchers: Arc::new(Mutex::new(Vec::new())),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &str) -> PathBuf {
        self.root.join(format!("{path}.{EXTENSION}"))
    }

    async fn read_doc(&self, path: &str) -> Result<Option<Document>> {
        let contents = match fs::read_to_string(self.file_path(path)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(path, e)),
        };
        let stored: StoredDoc =
            serde_json::from_str(&contents).map_err(|e| storage_error(path, e))?;
        Ok(Some(Document {
            path: path.to_string(),
            data: stored.data,
            write_tag: stored.write_tag,
        }))
    }

    /// Every readable document directly inside `collection`.
    async fn list_collection(&self, collection: &str) -> Result<Vec<Document>> {
        let dir = self.root.join(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(collection, e)),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(collection, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            match self.read_doc(&format!("{collection}/{id}")).await {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                // Most likely a write from another device in progress.
                Err(e) => warn!("Skipping unreadable document: {}", e),
            }
        }
        Ok(docs)
    }

    async fn evaluate(&self, target: &Target) -> Result<Vec<Document>> {
        match target {
            Target::Document(path) => Ok(self.read_doc(path).await?.into_iter().collect()),
            Target::Query(query) => {
                let docs = self.list_collection(&query.collection).await?;
                Ok(ops::run_query(query, docs.iter()))
            }
        }
    }

    async fn write_doc(&self, path: &str, data: Value, tag: WriteTag) -> Result<()> {
        let file = self.file_path(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(path, e))?;
        }
        let contents = serde_json::to_string_pretty(&StoredDoc {
            data,
            write_tag: Some(tag),
        })
        .map_err(|e| storage_error(path, e))?;

        // Write beside the target and rename, so readers never see half a file.
        let id = path.rsplit('/').next().unwrap_or(path);
        let temp = file.with_file_name(format!(".{id}.tmp"));
        fs::write(&temp, contents)
            .await
            .map_err(|e| storage_error(path, e))?;
        fs::rename(&temp, &file)
            .await
            .map_err(|e| storage_error(path, e))
    }

    async fn delete_doc(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.file_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(path, e)),
        }
    }

    /// Re-evaluate every subscription and deliver what changed.
    pub async fn refresh(&self) {
        let mut watchers = self.watchers.lock().await;
        let mut kept = Vec::with_capacity(watchers.len());

        for mut watcher in watchers.drain(..) {
            if watcher.tx.is_closed() {
                continue;
            }
            match self.evaluate(&watcher.target).await {
                Ok(next) => {
                    let changes = ops::diff(&watcher.last, &next);
                    if !changes.is_empty() {
                        watcher.last = next.clone();
                        let batch = ChangeBatch {
                            docs: next,
                            changes,
                        };
                        if watcher.tx.unbounded_send(Ok(batch)).is_err() {
                            continue;
                        }
                    }
                    kept.push(watcher);
                }
                Err(e) => {
                    warn!("Dropping subscription: {}", e);
                    let _ = watcher.tx.unbounded_send(Err(e));
                }
            }
        }
        *watchers = kept;
    }

    /// Number of live subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.watchers
            .lock()
            .await
            .iter()
            .filter(|w| !w.tx.is_closed())
            .count()
    }

    /// Watch the directory and refresh subscriptions when other processes
    /// write to it. Stops when the returned task is aborted.
    pub fn spawn_watcher(&self) -> anyhow::Result<JoinHandle<()>> {
        let mut watcher = StoreWatcher::new(self.root.clone())?;
        let store = self.clone();
        info!("Watching store at {:?}", self.root);

        Ok(tokio::spawn(async move {
            while let Some(event) = watcher.event_rx().recv().await {
                debug!("Store change: {:?} {}", event.kind, event.path);
                // Coalesce whatever else arrived with it.
                while watcher.event_rx().try_recv().is_ok() {}
                store.refresh().await;
            }
        }))
    }
}

#[async_trait]
impl RemoteStore for DirStore {
    async fn get(&self, path: &str) -> Result<Option<Document>> {
        ops::validate_document_path(path)?;
        self.read_doc(path).await
    }

    async fn batch_write(&self, write_ops: Vec<WriteOp>, tag: WriteTag) -> Result<()> {
        {
            let _guard = self.write_lock.lock().await;

            let mut staged: BTreeMap<String, Option<Value>> = BTreeMap::new();
            for op in &write_ops {
                let path = op.path();
                ops::validate_document_path(path)?;
                let current = match staged.get(path) {
                    Some(staged) => staged.clone(),
                    None => self.read_doc(path).await?.map(|doc| doc.data),
                };
                let next = ops::apply(current.as_ref(), op)?;
                staged.insert(path.to_string(), next);
            }

            for (path, data) in staged {
                match data {
                    Some(data) => self.write_doc(&path, data, tag).await?,
                    None => self.delete_doc(&path).await?,
                }
            }
            debug!("Committed batch {} ({} ops)", tag, write_ops.len());
        }

        self.refresh().await;
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        ops::validate_collection_path(&query.collection)?;
        let docs = self.list_collection(&query.collection).await?;
        Ok(ops::run_query(query, docs.iter()))
    }

    async fn subscribe(&self, target: Target) -> Result<Subscription> {
        match &target {
            Target::Document(path) => ops::validate_document_path(path)?,
            Target::Query(query) => ops::validate_collection_path(&query.collection)?,
        }

        let mut watchers = self.watchers.lock().await;
        let initial = self.evaluate(&target).await?;
        let (tx, rx) = mpsc::unbounded();
        let changes = initial
            .iter()
            .map(|doc| DocChange {
                kind: ChangeKind::Added,
                doc: doc.clone(),
            })
            .collect();
        let _ = tx.unbounded_send(Ok(ChangeBatch {
            docs: initial.clone(),
            changes,
        }));

        let closer = tx.clone();
        watchers.push(Watcher {
            target,
            last: initial,
            tx,
        });

        Ok(Subscription {
            changes: rx.boxed(),
            cancel: CancelHandle::new(move || closer.close_channel()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_sync::remote::FieldChange;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, DirStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = DirStore::new(temp_dir.path().join("store")).unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let (_dir, store) = store();
        let tag = WriteTag::new();

        store
            .set_merge("journals/j1", json!({"name": "Family"}), tag)
            .await
            .unwrap();

        let doc = store.get("journals/j1").await.unwrap().unwrap();
        assert_eq!(doc.data["name"], "Family");
        assert_eq!(doc.write_tag, Some(tag));
        assert!(store.root().join("journals/j1.json").exists());
        assert!(store.get("journals/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let (_dir, store) = store();
        let ops = vec![
            WriteOp::Set {
                path: "journals/j1".into(),
                data: json!({"name": "Family"}),
            },
            WriteOp::Update {
                path: "journals/j1/invites/missing".into(),
                changes: vec![FieldChange::Increment {
                    field: "uses".into(),
                    by: 1,
                }],
            },
        ];

        let result = store.batch_write(ops, WriteTag::new()).await;

        assert!(matches!(result, Err(RemoteError::NotFound(_))));
        assert!(store.get("journals/j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_expectation_rejects_whole_batch() {
        let (_dir, store) = store();
        store
            .set_merge(
                "journals/j1/invites/i1",
                json!({"uses": 1, "maxUses": 2}),
                WriteTag::new(),
            )
            .await
            .unwrap();
        let join = |seen_uses: u32| {
            vec![
                WriteOp::Merge {
                    path: "journals/j1".into(),
                    data: json!({"memberIds": ["u3"]}),
                },
                WriteOp::Update {
                    path: "journals/j1/invites/i1".into(),
                    changes: vec![
                        FieldChange::Expect {
                            field: "uses".into(),
                            value: json!(seen_uses),
                        },
                        FieldChange::Increment {
                            field: "uses".into(),
                            by: 1,
                        },
                    ],
                },
            ]
        };

        let result = store.batch_write(join(0), WriteTag::new()).await;
        assert!(matches!(result, Err(RemoteError::PreconditionFailed { .. })));
        assert!(store.get("journals/j1").await.unwrap().is_none());

        store.batch_write(join(1), WriteTag::new()).await.unwrap();
        let invite = store.get("journals/j1/invites/i1").await.unwrap().unwrap();
        assert_eq!(invite.data["uses"], 2);
    }

    #[tokio::test]
    async fn test_query_filters_and_skips_temp_files() {
        let (_dir, store) = store();
        let tag = WriteTag::new();
        store
            .batch_write(
                vec![
                    WriteOp::Set {
                        path: "journals/a".into(),
                        data: json!({"memberIds": ["u1"]}),
                    },
                    WriteOp::Set {
                        path: "journals/b".into(),
                        data: json!({"memberIds": ["u2"]}),
                    },
                ],
                tag,
            )
            .await
            .unwrap();
        std::fs::write(store.root().join("journals/.c.tmp"), "{").unwrap();
        std::fs::write(store.root().join("journals/.d.json"), "{").unwrap();

        let docs = store
            .query(&Query::collection("journals").where_array_contains("memberIds", "u1"))
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "journals/a");
    }

    #[tokio::test]
    async fn test_unreadable_document_is_skipped_in_queries() {
        let (_dir, store) = store();
        store
            .set_merge("journals/a", json!({"name": "A"}), WriteTag::new())
            .await
            .unwrap();
        std::fs::write(store.root().join("journals/broken.json"), "{not json").unwrap();

        let docs = store.query(&Query::collection("journals")).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(store.get("journals/broken").await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_sees_own_writes_and_refresh() {
        let (_dir, store) = store();
        let mut sub = store
            .subscribe(Target::Query(
                Query::collection("journals/j1/entries").order_by_desc("createdAt"),
            ))
            .await
            .unwrap();
        let initial = sub.changes.next().await.unwrap().unwrap();
        assert!(initial.docs.is_empty());

        store
            .set_merge("journals/j1/entries/e1", json!({"createdAt": 1}), WriteTag::new())
            .await
            .unwrap();
        let batch = sub.changes.next().await.unwrap().unwrap();
        assert_eq!(batch.added().count(), 1);

        // Another process writes straight to disk.
        let other = DirStore::new(store.root().to_path_buf()).unwrap();
        other
            .set_merge("journals/j1/entries/e2", json!({"createdAt": 2}), WriteTag::new())
            .await
            .unwrap();
        store.refresh().await;
        let batch = sub.changes.next().await.unwrap().unwrap();
        assert_eq!(batch.docs[0].id(), "e2");
        assert_eq!(batch.changes.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_ends_subscription() {
        let (_dir, store) = store();
        let mut sub = store
            .subscribe(Target::Document("journals/j1".into()))
            .await
            .unwrap();
        assert_eq!(store.subscription_count().await, 1);

        sub.cancel.cancel();
        sub.cancel.cancel();

        assert_eq!(store.subscription_count().await, 0);
        assert!(sub.changes.next().await.is_some());
        assert!(sub.changes.next().await.is_none());
    }
}
