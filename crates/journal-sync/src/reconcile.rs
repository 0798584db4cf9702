//! Reconciliation Engine: brings the local entry set and the remote entry set
//! of the signed-in user into agreement.
//!
//! A cycle works as follows:
//!
//! 1. Pull every remote entry under `users/{identity}/entries`
//! 2. Merge each remote entry against the cache using only timestamps:
//!    - unknown locally, or newer remotely with nothing pending locally: adopt
//!    - newer remotely *and* pending locally: conflict, concatenate both texts
//!      unless that remote version was already merged by an earlier cycle
//!    - otherwise keep the local entry
//! 3. Push every pending entry in one batched write
//! 4. Mark pushed entries synced and commit the merged set to the cache
//!
//! Pull and push failures abort the cycle before the cache is touched.
//! Conflict merges are not pushed in the cycle that produced them; the next
//! cycle pushes them.

use crate::cache::EntryCache;
use crate::clock::Millis;
use crate::context::SyncContext;
use crate::events::SyncEvent;
use crate::model::{JournalEntry, ModelError};
use crate::paths;
use crate::remote::{Query, RemoteError, WriteOp, WriteTag};

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Separates the remote and local text of a conflicting entry.
pub const CONFLICT_MARKER: &str = "\n\n----- conflicting edit from another device above, this device below -----\n\n";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("A sync is already in progress")]
    InProgress,

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// What one cycle did, by entry date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote versions taken as-is.
    pub adopted: Vec<String>,
    /// Entries whose diverging edits were concatenated.
    pub conflicts: Vec<String>,
    /// Entries sent to the remote store.
    pub pushed: Vec<String>,
    /// Remote documents that could not be decoded.
    pub skipped_remote: usize,
    /// Entries edited locally while the cycle ran, left for the next cycle.
    pub deferred_local: usize,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        !self.adopted.is_empty() || !self.conflicts.is_empty() || !self.pushed.is_empty()
    }
}

/// Decision for one remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Take the remote entry; it is synced.
    Adopt(JournalEntry),
    /// Both sides diverged; texts concatenated, pushed next cycle.
    Conflict(JournalEntry),
    /// Local entry stays as it is.
    Keep,
}

/// Merge one remote entry against the local entry for the same date.
///
/// `remote.synced_at` must equal `remote.updated_at` (as produced by
/// `JournalEntry::from_remote`).
pub fn merge_entry(
    local: Option<&JournalEntry>,
    remote: &JournalEntry,
    now: Millis,
) -> MergeDecision {
    let Some(local) = local else {
        return MergeDecision::Adopt(remote.clone());
    };

    if remote.updated_at <= local.synced_at {
        return MergeDecision::Keep;
    }
    if !local.is_pending() {
        return MergeDecision::Adopt(remote.clone());
    }
    if local.merged_remote_at == Some(remote.updated_at) {
        // Our own merge of this exact remote version, not pushed yet.
        return MergeDecision::Keep;
    }

    MergeDecision::Conflict(JournalEntry {
        date: local.date.clone(),
        text: concat_texts(&remote.text, &local.text),
        mood_tag: local.mood_tag.clone().or_else(|| remote.mood_tag.clone()),
        prompt_text: local
            .prompt_text
            .clone()
            .or_else(|| remote.prompt_text.clone()),
        created_at: local.created_at.min(remote.created_at),
        // A fresh local change, ordered after both versions.
        updated_at: now.max(remote.updated_at + 1).max(local.updated_at + 1),
        synced_at: 0,
        merged_remote_at: Some(remote.updated_at),
    })
}

/// Remote text, marker, local text. A side that is empty or identical to the
/// other adds nothing, so no marker is inserted for it.
fn concat_texts(remote: &str, local: &str) -> String {
    if local.is_empty() || local == remote {
        remote.to_string()
    } else if remote.is_empty() {
        local.to_string()
    } else {
        format!("{remote}{CONFLICT_MARKER}{local}")
    }
}

/// Pulls, merges and pushes private entries for the signed-in user.
pub struct ReconciliationEngine {
    ctx: SyncContext,
    cache: EntryCache,
    /// Held for the duration of a cycle; overlapping calls are rejected.
    in_flight: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(ctx: SyncContext, cache: EntryCache) -> Self {
        Self {
            ctx,
            cache,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one full pull-merge-push cycle.
    ///
    /// Returns `SyncError::InProgress` immediately if another cycle is
    /// running. On any error the cache is left exactly as it was.
    pub async fn sync_with_cloud(&self) -> Result<SyncReport> {
        let _guard = self.in_flight.try_lock().map_err(|_| SyncError::InProgress)?;

        let result = self.run_cycle().await;
        let timestamp = self.ctx.clock.now_ms();
        match &result {
            Ok(report) => {
                if report.has_changes() {
                    info!(
                        "Sync complete: {} adopted, {} conflict(s), {} pushed",
                        report.adopted.len(),
                        report.conflicts.len(),
                        report.pushed.len()
                    );
                } else {
                    debug!("Sync complete: already up to date");
                }
                self.ctx.events.emit(SyncEvent::SyncCompleted {
                    adopted: report.adopted.len(),
                    conflicts: report.conflicts.len(),
                    pushed: report.pushed.len(),
                    timestamp,
                });
            }
            Err(e) => {
                warn!("Sync failed: {}", e);
                self.ctx.events.emit(SyncEvent::SyncFailed {
                    error: e.to_string(),
                    timestamp,
                });
            }
        }
        result
    }

    async fn run_cycle(&self) -> Result<SyncReport> {
        let user = self
            .ctx
            .auth
            .current_identity()
            .ok_or(SyncError::NotSignedIn)?;
        let mut report = SyncReport::default();

        // 1. Pull
        let docs = self
            .ctx
            .remote
            .query(&Query::collection(paths::user_entries(&user.id)))
            .await?;
        let mut remote_entries = Vec::with_capacity(docs.len());
        for doc in &docs {
            match JournalEntry::from_remote(doc) {
                Ok(entry) => remote_entries.push(entry),
                Err(e) => {
                    warn!("Skipping remote entry: {}", e);
                    report.skipped_remote += 1;
                }
            }
        }

        // 2. Merge
        let base = self.cache.entries();
        let now = self.ctx.clock.now_ms();
        let mut merged = base.clone();
        let mut push_next_cycle = BTreeSet::new();

        for remote in &remote_entries {
            match merge_entry(base.get(&remote.date), remote, now) {
                MergeDecision::Adopt(entry) => {
                    debug!("Adopting remote entry {}", entry.date);
                    report.adopted.push(entry.date.clone());
                    merged.insert(entry.date.clone(), entry);
                }
                MergeDecision::Conflict(entry) => {
                    info!("Conflicting edits on {}, keeping both", entry.date);
                    self.ctx.events.emit(SyncEvent::ConflictMerged {
                        date: entry.date.clone(),
                        timestamp: now,
                    });
                    report.conflicts.push(entry.date.clone());
                    push_next_cycle.insert(entry.date.clone());
                    merged.insert(entry.date.clone(), entry);
                }
                MergeDecision::Keep => {}
            }
        }

        // 3. Push
        let to_push: Vec<&JournalEntry> = merged
            .values()
            .filter(|e| e.is_pending() && !push_next_cycle.contains(&e.date))
            .collect();
        let mut pushed: BTreeMap<String, Millis> = BTreeMap::new();
        if !to_push.is_empty() {
            let ops = to_push
                .iter()
                .map(|entry| {
                    Ok(WriteOp::Set {
                        path: paths::user_entry(&user.id, &entry.date),
                        data: entry.to_remote()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.ctx.remote.batch_write(ops, WriteTag::new()).await?;
            pushed = to_push
                .iter()
                .map(|e| (e.date.clone(), e.updated_at))
                .collect();
        }

        // 4. Commit
        for (date, updated_at) in &pushed {
            if let Some(entry) = merged.get_mut(date) {
                entry.synced_at = *updated_at;
                entry.merged_remote_at = None;
            }
        }
        report.pushed = pushed.keys().cloned().collect();

        let changed: BTreeMap<String, JournalEntry> = merged
            .into_iter()
            .filter(|(date, entry)| base.get(date) != Some(entry))
            .collect();
        report.deferred_local = self.cache.commit_reconciled(&base, changed, &pushed);

        Ok(report)
    }
}
