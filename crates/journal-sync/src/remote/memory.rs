//! In-memory remote store for testing and embedding.
//!
//! Behaves like the hosted store as far as the engine can observe: atomic
//! batches, tagged documents, snapshot subscriptions. Fault injection lets
//! tests simulate an unreachable backend or a broken change feed.

use super::ops;
use super::{
    CancelHandle, ChangeBatch, ChangeKind, DocChange, Document, Query, RemoteError, RemoteStore,
    Result, Subscription, Target, WriteOp, WriteTag,
};

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

struct Watcher {
    id: u64,
    target: Target,
    last: Vec<Document>,
    tx: mpsc::UnboundedSender<Result<ChangeBatch>>,
}

#[derive(Default)]
struct StoreState {
    docs: BTreeMap<String, Document>,
    watchers: Vec<Watcher>,
    next_watcher: u64,
    offline: bool,
    reject_subscriptions: bool,
    commits: usize,
}

impl StoreState {
    /// Push a batch to every watcher whose result changed.
    fn notify_watchers(&mut self) {
        let StoreState { docs, watchers, .. } = self;
        watchers.retain_mut(|watcher| {
            let next = ops::evaluate(&watcher.target, docs.values());
            let changes = ops::diff(&watcher.last, &next);
            if changes.is_empty() {
                return true;
            }
            watcher.last = next.clone();
            watcher
                .tx
                .unbounded_send(Ok(ChangeBatch {
                    docs: next,
                    changes,
                }))
                .is_ok()
        });
    }
}

/// In-memory document store. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every operation fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make new subscriptions fail while reads and writes keep working.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.lock().reject_subscriptions = reject;
    }

    /// Deliver an error to every live subscription and drop them.
    pub fn break_subscriptions(&self, reason: &str) {
        let mut state = self.lock();
        for watcher in state.watchers.drain(..) {
            let _ = watcher
                .tx
                .unbounded_send(Err(RemoteError::Unavailable(reason.to_string())));
        }
    }

    /// Number of successful batched writes so far.
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Read a document without going through the async API.
    pub fn document(&self, path: &str) -> Option<Document> {
        self.lock().docs.get(path).cloned()
    }

    /// Write a document as if another client had written it.
    pub fn put(&self, path: &str, data: Value, tag: Option<WriteTag>) {
        let mut state = self.lock();
        state.docs.insert(
            path.to_string(),
            Document {
                path: path.to_string(),
                data,
                write_tag: tag,
            },
        );
        state.notify_watchers();
    }

    /// Remove a document as if another client had deleted it.
    pub fn remove(&self, path: &str) {
        let mut state = self.lock();
        if state.docs.remove(path).is_some() {
            state.notify_watchers();
        }
    }

    fn check_online(state: &StoreState) -> Result<()> {
        if state.offline {
            Err(RemoteError::Unavailable("store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get(&self, path: &str) -> Result<Option<Document>> {
        ops::validate_document_path(path)?;
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(state.docs.get(path).cloned())
    }

    async fn batch_write(&self, write_ops: Vec<WriteOp>, tag: WriteTag) -> Result<()> {
        let mut state = self.lock();
        Self::check_online(&state)?;

        // Stage every op first so a failure leaves the store untouched.
        let mut staged: BTreeMap<String, Option<Value>> = BTreeMap::new();
        for op in &write_ops {
            let path = op.path();
            let current = match staged.get(path) {
                Some(staged) => staged.clone(),
                None => state.docs.get(path).map(|d| d.data.clone()),
            };
            let next = ops::apply(current.as_ref(), op)?;
            staged.insert(path.to_string(), next);
        }

        for (path, data) in staged {
            match data {
                Some(data) => {
                    state.docs.insert(
                        path.clone(),
                        Document {
                            path,
                            data,
                            write_tag: Some(tag),
                        },
                    );
                }
                None => {
                    state.docs.remove(&path);
                }
            }
        }
        state.commits += 1;
        debug!("Committed batch {} ({} ops)", tag, write_ops.len());
        state.notify_watchers();
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        ops::validate_collection_path(&query.collection)?;
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(ops::run_query(query, state.docs.values()))
    }

    async fn subscribe(&self, target: Target) -> Result<Subscription> {
        match &target {
            Target::Document(path) => ops::validate_document_path(path)?,
            Target::Query(query) => ops::validate_collection_path(&query.collection)?,
        }

        let mut state = self.lock();
        Self::check_online(&state)?;
        if state.reject_subscriptions {
            return Err(RemoteError::Unavailable(
                "subscriptions are rejected".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded();
        let initial = ops::evaluate(&target, state.docs.values());
        let changes = initial
            .iter()
            .map(|doc| DocChange {
                kind: ChangeKind::Added,
                doc: doc.clone(),
            })
            .collect();
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.unbounded_send(Ok(ChangeBatch {
            docs: initial.clone(),
            changes,
        }));

        let id = state.next_watcher;
        state.next_watcher += 1;
        state.watchers.push(Watcher {
            id,
            target,
            last: initial,
            tx,
        });

        let weak = Arc::downgrade(&self.state);
        let cancel = CancelHandle::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.watchers.retain(|w| w.id != id);
            }
        });

        Ok(Subscription {
            changes: rx.boxed(),
            cancel,
        })
    }
}
