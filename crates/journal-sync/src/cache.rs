//! Local Entry Cache: the device's single source of truth for entries.
//!
//! Holds private entries keyed by date, the projected view of every shared
//! journal, and the draft sub-state of in-progress writing sessions. Every
//! mutation is synchronous and happens under one lock, so readers never see
//! a half-applied update.
//!
//! Only the reconciliation engine touches `synced_at` and only the projection
//! listener replaces shared views; everyone else goes through `upsert`.

use crate::clock::{Clock, Millis};
use crate::ids::JournalId;
use crate::model::{self, EntryPatch, JournalEntry, SharedEntry};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Timer of an in-progress writing session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftTimer {
    /// When the running segment started; `None` while paused.
    pub started_at: Option<Millis>,
    /// Time accumulated by finished segments.
    pub elapsed_ms: Millis,
}

impl DraftTimer {
    pub fn total_ms(&self, now: Millis) -> Millis {
        self.elapsed_ms + self.started_at.map_or(0, |s| (now - s).max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PomodoroPhase {
    Focus,
    Break,
}

/// Focus/break timer attached to a writing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroState {
    pub phase: PomodoroPhase,
    pub phase_ends_at: Millis,
    pub completed_cycles: u32,
}

/// Serializable contents of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSnapshot {
    pub entries: BTreeMap<String, JournalEntry>,
    /// Shared journal views, newest entry first.
    pub shared: BTreeMap<JournalId, Vec<SharedEntry>>,
    pub drafts: BTreeMap<String, String>,
    pub draft_timers: BTreeMap<String, DraftTimer>,
    pub pomodoro_state: BTreeMap<String, PomodoroState>,
}

/// Shared handle to the device's entry cache. Clones share state.
#[derive(Clone)]
pub struct EntryCache {
    state: Arc<RwLock<CacheSnapshot>>,
    clock: Arc<dyn Clock>,
}

impl EntryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::from_snapshot(CacheSnapshot::default(), clock)
    }

    pub fn from_snapshot(snapshot: CacheSnapshot, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(snapshot)),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheSnapshot> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheSnapshot> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the whole cache, for persistence.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.read().clone()
    }

    // ========== Private entries ==========

    pub fn get(&self, date: &str) -> Option<JournalEntry> {
        self.read().entries.get(date).cloned()
    }

    pub fn entries(&self) -> BTreeMap<String, JournalEntry> {
        self.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Entries with local changes not yet pushed.
    pub fn pending(&self) -> Vec<JournalEntry> {
        self.read()
            .entries
            .values()
            .filter(|e| e.is_pending())
            .cloned()
            .collect()
    }

    /// Merge `patch` onto the entry for `date`, creating it if needed.
    ///
    /// Fields absent from the patch are kept. `updated_at` always moves
    /// forward, even if the clock did not.
    pub fn upsert(&self, date: &str, patch: EntryPatch) -> model::Result<JournalEntry> {
        model::validate_date(date)?;
        let now = self.clock.now_ms();
        let mut state = self.write();

        let entry = state
            .entries
            .entry(date.to_string())
            .or_insert_with(|| JournalEntry {
                date: date.to_string(),
                text: String::new(),
                mood_tag: None,
                prompt_text: None,
                created_at: now,
                updated_at: 0,
                synced_at: 0,
                merged_remote_at: None,
            });

        if let Some(text) = patch.text {
            entry.text = text;
        }
        if let Some(mood) = patch.mood_tag {
            entry.mood_tag = Some(mood);
        }
        if let Some(prompt) = patch.prompt_text {
            entry.prompt_text = Some(prompt);
        }
        entry.updated_at = now.max(entry.updated_at + 1);

        Ok(entry.clone())
    }

    /// Remove an entry. Local only: nothing is deleted remotely.
    pub fn delete_entry(&self, date: &str) -> Option<JournalEntry> {
        self.write().entries.remove(date)
    }

    /// Overwrite every entry, bypassing merge semantics. Restore-from-backup only.
    pub fn replace_entries(&self, entries: BTreeMap<String, JournalEntry>) {
        let entries = entries
            .into_iter()
            .map(|(date, mut entry)| {
                entry.date = date.clone();
                (date, entry)
            })
            .collect();
        self.write().entries = entries;
    }

    /// Install the result of a reconciliation cycle.
    ///
    /// `base` is the entry set the cycle started from. Entries edited or
    /// deleted locally while the cycle was in flight keep their local state;
    /// if such an entry was pushed, its `synced_at` still records the pushed
    /// version. Returns how many dates were left alone.
    pub(crate) fn commit_reconciled(
        &self,
        base: &BTreeMap<String, JournalEntry>,
        merged: BTreeMap<String, JournalEntry>,
        pushed: &BTreeMap<String, Millis>,
    ) -> usize {
        let mut state = self.write();
        let mut skipped = 0;

        for (date, entry) in merged {
            if state.entries.get(&date) == base.get(&date) {
                state.entries.insert(date, entry);
                continue;
            }

            skipped += 1;
            match state.entries.get_mut(&date) {
                Some(current) => {
                    if let Some(&pushed_at) = pushed.get(&date) {
                        current.synced_at = current.synced_at.max(pushed_at.min(current.updated_at));
                    }
                    debug!("Entry {} edited during sync, keeping local version", date);
                }
                None => debug!("Entry {} deleted during sync, not restoring", date),
            }
        }
        skipped
    }

    // ========== Shared journal views ==========

    /// Cached entries of a shared journal, newest first.
    pub fn shared_entries(&self, journal_id: &JournalId) -> Vec<SharedEntry> {
        self.read()
            .shared
            .get(journal_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn shared_journals(&self) -> Vec<JournalId> {
        self.read().shared.keys().cloned().collect()
    }

    /// Replace a shared view. Returns false when nothing changed.
    pub(crate) fn replace_shared(&self, journal_id: &JournalId, entries: Vec<SharedEntry>) -> bool {
        let mut state = self.write();
        if state.shared.get(journal_id) == Some(&entries) {
            return false;
        }
        state.shared.insert(journal_id.clone(), entries);
        true
    }

    /// Drop the cached view of a journal. Returns whether one existed.
    pub fn purge_shared(&self, journal_id: &JournalId) -> bool {
        self.write().shared.remove(journal_id).is_some()
    }

    // ========== Drafts ==========

    pub fn draft(&self, date: &str) -> Option<String> {
        self.read().drafts.get(date).cloned()
    }

    pub fn set_draft(&self, date: &str, text: impl Into<String>) -> model::Result<()> {
        model::validate_date(date)?;
        self.write().drafts.insert(date.to_string(), text.into());
        Ok(())
    }

    /// Discard the draft and its timers (e.g. after the entry is saved).
    pub fn clear_draft(&self, date: &str) {
        let mut state = self.write();
        state.drafts.remove(date);
        state.draft_timers.remove(date);
        state.pomodoro_state.remove(date);
    }

    pub fn draft_timer(&self, date: &str) -> Option<DraftTimer> {
        self.read().draft_timers.get(date).cloned()
    }

    /// Start (or resume) the writing timer of `date`.
    pub fn start_draft_timer(&self, date: &str) -> model::Result<DraftTimer> {
        model::validate_date(date)?;
        let now = self.clock.now_ms();
        let mut state = self.write();
        let timer = state.draft_timers.entry(date.to_string()).or_default();
        if timer.started_at.is_none() {
            timer.started_at = Some(now);
        }
        Ok(timer.clone())
    }

    /// Pause the writing timer of `date`, folding the running segment in.
    pub fn pause_draft_timer(&self, date: &str) -> Option<DraftTimer> {
        let now = self.clock.now_ms();
        let mut state = self.write();
        let timer = state.draft_timers.get_mut(date)?;
        if let Some(started) = timer.started_at.take() {
            timer.elapsed_ms += (now - started).max(0);
        }
        Some(timer.clone())
    }

    pub fn pomodoro(&self, date: &str) -> Option<PomodoroState> {
        self.read().pomodoro_state.get(date).cloned()
    }

    pub fn set_pomodoro(&self, date: &str, pomodoro: PomodoroState) -> model::Result<()> {
        model::validate_date(date)?;
        self.write()
            .pomodoro_state
            .insert(date.to_string(), pomodoro);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::ModelError;

    fn cache_at(now: Millis) -> (EntryCache, ManualClock) {
        let clock = ManualClock::new(now);
        (EntryCache::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_upsert_creates_and_merges() {
        let (cache, clock) = cache_at(100);

        let created = cache
            .upsert("2024-03-01", EntryPatch::text("morning").with_mood("calm"))
            .unwrap();
        assert_eq!(created.created_at, 100);
        assert_eq!(created.updated_at, 100);
        assert_eq!(created.synced_at, 0);
        assert!(created.is_pending());

        clock.set(250);
        let updated = cache
            .upsert("2024-03-01", EntryPatch::default().with_prompt("What went well?"))
            .unwrap();
        assert_eq!(updated.text, "morning");
        assert_eq!(updated.mood_tag.as_deref(), Some("calm"));
        assert_eq!(updated.prompt_text.as_deref(), Some("What went well?"));
        assert_eq!(updated.created_at, 100);
        assert_eq!(updated.updated_at, 250);
    }

    #[test]
    fn test_upsert_moves_forward_with_stalled_clock() {
        let (cache, _clock) = cache_at(100);
        cache.upsert("2024-03-01", EntryPatch::text("a")).unwrap();
        let second = cache.upsert("2024-03-01", EntryPatch::text("b")).unwrap();
        assert_eq!(second.updated_at, 101);
    }

    #[test]
    fn test_upsert_rejects_bad_date() {
        let (cache, _clock) = cache_at(1);
        assert!(matches!(
            cache.upsert("03/01/2024", EntryPatch::text("x")),
            Err(ModelError::InvalidDate(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_is_local() {
        let (cache, _clock) = cache_at(1);
        cache.upsert("2024-03-01", EntryPatch::text("x")).unwrap();
        assert!(cache.delete_entry("2024-03-01").is_some());
        assert!(cache.delete_entry("2024-03-01").is_none());
        assert!(cache.get("2024-03-01").is_none());
    }

    #[test]
    fn test_replace_entries_overwrites_everything() {
        let (cache, _clock) = cache_at(1);
        cache.upsert("2024-03-01", EntryPatch::text("old")).unwrap();

        let mut backup = BTreeMap::new();
        backup.insert(
            "2024-01-01".to_string(),
            JournalEntry {
                date: "wrong".into(),
                text: "restored".into(),
                mood_tag: None,
                prompt_text: None,
                created_at: 5,
                updated_at: 5,
                synced_at: 5,
                merged_remote_at: None,
            },
        );
        cache.replace_entries(backup);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("2024-03-01").is_none());
        assert_eq!(cache.get("2024-01-01").unwrap().date, "2024-01-01");
    }

    #[test]
    fn test_commit_keeps_concurrent_edit() {
        let (cache, clock) = cache_at(100);
        cache.upsert("2024-03-01", EntryPatch::text("v1")).unwrap();
        let base = cache.entries();

        let mut merged = base.clone();
        merged.get_mut("2024-03-01").unwrap().synced_at = 100;
        let mut pushed = BTreeMap::new();
        pushed.insert("2024-03-01".to_string(), 100);

        // Edited while the push was in flight.
        clock.set(150);
        cache.upsert("2024-03-01", EntryPatch::text("v2")).unwrap();

        let skipped = cache.commit_reconciled(&base, merged, &pushed);

        assert_eq!(skipped, 1);
        let entry = cache.get("2024-03-01").unwrap();
        assert_eq!(entry.text, "v2");
        assert_eq!(entry.synced_at, 100);
        assert!(entry.is_pending());
    }

    #[test]
    fn test_commit_does_not_resurrect_deleted() {
        let (cache, _clock) = cache_at(100);
        cache.upsert("2024-03-01", EntryPatch::text("v1")).unwrap();
        let base = cache.entries();
        cache.delete_entry("2024-03-01");

        cache.commit_reconciled(&base, base.clone(), &BTreeMap::new());

        assert!(cache.get("2024-03-01").is_none());
    }

    #[test]
    fn test_replace_shared_reports_change() {
        let (cache, _clock) = cache_at(1);
        let journal: JournalId = "j1".parse().unwrap();
        let entry = SharedEntry {
            id: "e1".parse().unwrap(),
            text: "hi".into(),
            mood_tag: None,
            prompt_text: None,
            author: "Ada".into(),
            author_id: "u1".into(),
            created_at: 1,
            updated_at: 1,
        };

        assert!(cache.replace_shared(&journal, vec![entry.clone()]));
        assert!(!cache.replace_shared(&journal, vec![entry]));
        assert_eq!(cache.shared_entries(&journal).len(), 1);
        assert!(cache.purge_shared(&journal));
        assert!(cache.shared_entries(&journal).is_empty());
    }

    #[test]
    fn test_draft_timer_accumulates() {
        let (cache, clock) = cache_at(1_000);
        cache.set_draft("2024-03-01", "half a thought").unwrap();
        cache.start_draft_timer("2024-03-01").unwrap();

        clock.advance(30_000);
        let paused = cache.pause_draft_timer("2024-03-01").unwrap();
        assert_eq!(paused.elapsed_ms, 30_000);
        assert!(paused.started_at.is_none());

        cache.start_draft_timer("2024-03-01").unwrap();
        clock.advance(5_000);
        let timer = cache.draft_timer("2024-03-01").unwrap();
        assert_eq!(timer.total_ms(clock.now_ms()), 35_000);

        cache.clear_draft("2024-03-01");
        assert!(cache.draft("2024-03-01").is_none());
        assert!(cache.draft_timer("2024-03-01").is_none());
    }

    #[test]
    fn test_snapshot_roundtrips_through_json() {
        let (cache, _clock) = cache_at(7);
        cache.upsert("2024-03-01", EntryPatch::text("x")).unwrap();
        cache
            .set_pomodoro(
                "2024-03-01",
                PomodoroState {
                    phase: PomodoroPhase::Focus,
                    phase_ends_at: 1_500_007,
                    completed_cycles: 2,
                },
            )
            .unwrap();

        let json = serde_json::to_string(&cache.snapshot()).unwrap();
        let restored: CacheSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cache.snapshot());
    }
}
