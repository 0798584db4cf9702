//! Projection Listener: keeps the cached view of each shared journal in step
//! with the remote store and raises notifications for new activity.
//!
//! Each journal has at most one live subscription. A subscription watches two
//! targets (the entries collection and the journal's metadata document) and
//! is pumped by one task. A per-subscription liveness flag is checked under
//! its lock before any callback touches state, so once `unsubscribe` returns
//! nothing more is written for that journal.

use crate::cache::EntryCache;
use crate::context::SyncContext;
use crate::directory::Directory;
use crate::events::SyncEvent;
use crate::ids::JournalId;
use crate::model::{self, JournalMeta, SharedEntry};
use crate::notify::NotificationRequest;
use crate::paths;
use crate::remote::{
    CancelHandle, ChangeBatch, ChangeKind, ChangeStream, Query, RemoteError, Target,
};
use crate::tracker::WriteTracker;

use futures::StreamExt;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Title used when the journal's name is not known yet.
const FALLBACK_TITLE: &str = "Shared journal";
/// Characters of entry text shown in a notification body.
const SNIPPET_CHARS: usize = 80;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to subscribe to journal {journal_id}: {source}")]
    Subscribe {
        journal_id: JournalId,
        #[source]
        source: RemoteError,
    },
}

pub type Result<T> = std::result::Result<T, ListenerError>;

/// Subscription state of one journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Unsubscribed,
    Subscribing,
    Active,
    /// The subscription errored. Idle until subscribed again.
    Failed,
}

impl Display for ListenerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Unsubscribed => "unsubscribed",
            ListenerState::Subscribing => "subscribing",
            ListenerState::Active => "active",
            ListenerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Handles of one live journal subscription.
struct LiveSubscription {
    alive: Arc<Mutex<bool>>,
    cancels: Vec<CancelHandle>,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    /// Mark the subscription dead, then cancel its feeds and task.
    ///
    /// `pump` holds the `alive` lock for the whole of each (synchronous)
    /// callback, so taking it here waits for an in-flight callback to finish
    /// and no callback starts afterwards. Callbacks must not await while
    /// holding it.
    fn stop(self) {
        *self.alive.lock().unwrap_or_else(|e| e.into_inner()) = false;
        for cancel in &self.cancels {
            cancel.cancel();
        }
        self.task.abort();
    }
}

#[derive(Clone, Copy)]
enum Feed {
    Entries,
    Meta,
}

struct Inner {
    ctx: SyncContext,
    cache: EntryCache,
    directory: Directory,
    own_writes: WriteTracker,
    states: Mutex<HashMap<JournalId, ListenerState>>,
}

impl Inner {
    fn set_state(&self, journal_id: &JournalId, state: ListenerState) {
        let previous = {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            if state == ListenerState::Unsubscribed {
                states.remove(journal_id)
            } else {
                states.insert(journal_id.clone(), state)
            }
        };
        if previous.unwrap_or_default() != state {
            debug!("Listener for {} is now {}", journal_id, state);
            self.ctx.events.emit(SyncEvent::ListenerStateChanged {
                journal_id: journal_id.to_string(),
                state: state.to_string(),
            });
        }
    }

    fn state(&self, journal_id: &JournalId) -> ListenerState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(journal_id)
            .copied()
            .unwrap_or_default()
    }

    fn on_entries(&self, journal_id: &JournalId, batch: &ChangeBatch) {
        let mut entries: Vec<SharedEntry> = batch
            .docs
            .iter()
            .filter_map(|doc| match SharedEntry::from_document(doc) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping shared entry: {}", e);
                    None
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let count = entries.len();
        if self.cache.replace_shared(journal_id, entries) {
            debug!("Shared view of {} now has {} entries", journal_id, count);
            self.ctx.events.emit(SyncEvent::SharedViewUpdated {
                journal_id: journal_id.to_string(),
                entries: count,
            });
        }

        let me = self.ctx.auth.current_identity().map(|user| user.id);
        let now = self.ctx.clock.now_ms();
        let window = self.ctx.config.recency_window().as_millis() as i64;

        for change in batch.changes.iter().filter(|c| c.kind == ChangeKind::Added) {
            if change
                .doc
                .write_tag
                .is_some_and(|tag| self.own_writes.is_own(&tag))
            {
                continue;
            }
            let Ok(entry) = SharedEntry::from_document(&change.doc) else {
                continue;
            };
            if now - entry.created_at > window {
                continue;
            }
            if me.as_ref() == Some(&entry.author_id) {
                continue;
            }
            self.announce(journal_id, &entry);
        }
    }

    fn announce(&self, journal_id: &JournalId, entry: &SharedEntry) {
        let title = self
            .directory
            .get(journal_id)
            .map(|meta| meta.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        let author = if entry.author.is_empty() {
            "Someone"
        } else {
            entry.author.as_str()
        };
        let body = format!("{}: {}", author, model::snippet(&entry.text, SNIPPET_CHARS));

        info!("New entry in {} from {}", journal_id, author);
        self.ctx.notifier.notify(NotificationRequest {
            journal_id: journal_id.clone(),
            title: title.clone(),
            body,
        });
        self.ctx.events.emit(SyncEvent::NotificationSent {
            journal_id: journal_id.to_string(),
            title,
        });
    }

    fn on_meta(&self, journal_id: &JournalId, batch: &ChangeBatch) {
        match batch.docs.first() {
            Some(doc) => match JournalMeta::from_document(doc) {
                Ok(meta) => {
                    if self.directory.upsert(meta) {
                        debug!("Directory entry for {} refreshed", journal_id);
                    }
                }
                Err(e) => warn!("Ignoring journal metadata: {}", e),
            },
            None => {
                if self.directory.remove(journal_id).is_some() {
                    info!("Journal {} no longer exists", journal_id);
                }
            }
        }
    }
}

/// Drives the two feeds of one journal until cancelled or failed.
async fn pump(
    inner: Arc<Inner>,
    journal_id: JournalId,
    alive: Arc<Mutex<bool>>,
    mut entries: ChangeStream,
    mut meta: ChangeStream,
    cancels: Vec<CancelHandle>,
) {
    loop {
        let (feed, item) = tokio::select! {
            item = entries.next() => (Feed::Entries, item),
            item = meta.next() => (Feed::Meta, item),
        };

        // Held until the callback below returns; see `LiveSubscription::stop`.
        let mut live = alive.lock().unwrap_or_else(|e| e.into_inner());
        if !*live {
            return;
        }
        match item {
            Some(Ok(batch)) => match feed {
                Feed::Entries => inner.on_entries(&journal_id, &batch),
                Feed::Meta => inner.on_meta(&journal_id, &batch),
            },
            Some(Err(e)) => {
                warn!("Subscription for {} failed: {}", journal_id, e);
                *live = false;
                for cancel in &cancels {
                    cancel.cancel();
                }
                inner.set_state(&journal_id, ListenerState::Failed);
                return;
            }
            None => {
                warn!("Subscription for {} ended unexpectedly", journal_id);
                *live = false;
                for cancel in &cancels {
                    cancel.cancel();
                }
                inner.set_state(&journal_id, ListenerState::Failed);
                return;
            }
        }
    }
}

/// Owns every shared journal subscription of this device.
pub struct ProjectionListener {
    inner: Arc<Inner>,
    slots: tokio::sync::Mutex<HashMap<JournalId, LiveSubscription>>,
}

impl ProjectionListener {
    pub fn new(
        ctx: SyncContext,
        cache: EntryCache,
        directory: Directory,
        own_writes: WriteTracker,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                cache,
                directory,
                own_writes,
                states: Mutex::new(HashMap::new()),
            }),
            slots: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Tags registered here are treated as this device's own writes.
    pub fn own_writes(&self) -> &WriteTracker {
        &self.inner.own_writes
    }

    pub fn state(&self, journal_id: &JournalId) -> ListenerState {
        self.inner.state(journal_id)
    }

    /// Journals with a live subscription.
    pub async fn active_journals(&self) -> Vec<JournalId> {
        let slots = self.slots.lock().await;
        let mut ids: Vec<JournalId> = slots
            .keys()
            .filter(|id| self.inner.state(id) == ListenerState::Active)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Start listening to a journal, replacing any existing subscription.
    ///
    /// On error the journal is left in `Failed`.
    pub async fn subscribe(&self, journal_id: &JournalId) -> Result<()> {
        let mut slots = self.slots.lock().await;
        if let Some(previous) = slots.remove(journal_id) {
            debug!("Replacing subscription for {}", journal_id);
            previous.stop();
        }
        self.inner.set_state(journal_id, ListenerState::Subscribing);

        let remote = &self.inner.ctx.remote;
        let failed = |source: RemoteError| {
            self.inner.set_state(journal_id, ListenerState::Failed);
            ListenerError::Subscribe {
                journal_id: journal_id.clone(),
                source,
            }
        };

        let entries_query =
            Query::collection(paths::journal_entries(journal_id)).order_by_desc("createdAt");
        let entries = remote
            .subscribe(Target::Query(entries_query))
            .await
            .map_err(failed)?;
        let meta = match remote
            .subscribe(Target::Document(paths::journal(journal_id)))
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                entries.cancel.cancel();
                return Err(failed(e));
            }
        };

        let alive = Arc::new(Mutex::new(true));
        let cancels = vec![entries.cancel.clone(), meta.cancel.clone()];
        self.inner.set_state(journal_id, ListenerState::Active);
        let task = tokio::spawn(pump(
            Arc::clone(&self.inner),
            journal_id.clone(),
            Arc::clone(&alive),
            entries.changes,
            meta.changes,
            cancels.clone(),
        ));

        slots.insert(
            journal_id.clone(),
            LiveSubscription {
                alive,
                cancels,
                task,
            },
        );
        info!("Listening to journal {}", journal_id);
        Ok(())
    }

    /// Stop listening to a journal. No-op when not subscribed.
    pub async fn unsubscribe(&self, journal_id: &JournalId) {
        let mut slots = self.slots.lock().await;
        if let Some(live) = slots.remove(journal_id) {
            live.stop();
            debug!("Stopped listening to journal {}", journal_id);
        }
        self.inner.set_state(journal_id, ListenerState::Unsubscribed);
    }

    /// Stop every subscription.
    pub async fn shutdown(&self) {
        let mut slots = self.slots.lock().await;
        for (journal_id, live) in slots.drain() {
            live.stop();
            self.inner.set_state(&journal_id, ListenerState::Unsubscribed);
        }
    }
}

impl Drop for ProjectionListener {
    fn drop(&mut self) {
        for (_, live) in self.slots.get_mut().drain() {
            live.stop();
        }
    }
}
