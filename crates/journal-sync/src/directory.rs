//! Local mirror of the shared journals this device belongs to.
//!
//! Read-through cache of `JournalMeta` documents: written optimistically by
//! membership operations and confirmed by the projection listener.

use crate::ids::JournalId;
use crate::model::JournalMeta;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Shared handle to the journal directory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    journals: Arc<RwLock<BTreeMap<JournalId, JournalMeta>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_journals(journals: impl IntoIterator<Item = JournalMeta>) -> Self {
        let directory = Self::new();
        directory.merge(journals);
        directory
    }

    pub fn get(&self, id: &JournalId) -> Option<JournalMeta> {
        self.journals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &JournalId) -> bool {
        self.journals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// All journals, ordered by ID.
    pub fn list(&self) -> Vec<JournalMeta> {
        self.journals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Insert or replace. Returns false if the stored copy was identical.
    pub fn upsert(&self, meta: JournalMeta) -> bool {
        let mut journals = self.journals.write().unwrap_or_else(|e| e.into_inner());
        if journals.get(&meta.id) == Some(&meta) {
            return false;
        }
        journals.insert(meta.id.clone(), meta);
        true
    }

    /// Upsert many. Returns the IDs that were not known before.
    pub fn merge(&self, metas: impl IntoIterator<Item = JournalMeta>) -> Vec<JournalId> {
        let mut journals = self.journals.write().unwrap_or_else(|e| e.into_inner());
        let mut added = Vec::new();
        for meta in metas {
            if journals.insert(meta.id.clone(), meta.clone()).is_none() {
                added.push(meta.id);
            }
        }
        added
    }

    pub fn remove(&self, id: &JournalId) -> Option<JournalMeta> {
        self.journals
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }
}
