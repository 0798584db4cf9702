//! Writing to shared journals.
//!
//! A post writes the entry and the journal's `lastEntry` preview in one
//! tagged batch. The tag is registered with the listener's tracker so the
//! echo is not announced on this device.

use crate::context::SyncContext;
use crate::directory::Directory;
use crate::ids::{EntryId, JournalId};
use crate::model::{self, EntryPatch, LastEntry, ModelError, SharedEntry};
use crate::paths;
use crate::remote::{FieldChange, RemoteError, WriteOp};
use crate::tracker::WriteTracker;

use thiserror::Error;
use tracing::{debug, info};

/// Characters of entry text kept in the journal's preview.
const PREVIEW_CHARS: usize = 140;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Entry text must not be empty")]
    EmptyEntry,

    #[error("Not a member of journal {0}")]
    NotMember(JournalId),

    #[error("Entry {0} was written by someone else")]
    NotAuthor(EntryId),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, SharedError>;

pub struct SharedEntries {
    ctx: SyncContext,
    directory: Directory,
    own_writes: WriteTracker,
}

impl SharedEntries {
    pub fn new(ctx: SyncContext, directory: Directory, own_writes: WriteTracker) -> Self {
        Self {
            ctx,
            directory,
            own_writes,
        }
    }

    /// Publish a draft to a shared journal the current user belongs to.
    pub async fn post_entry(&self, journal_id: &JournalId, draft: EntryPatch) -> Result<SharedEntry> {
        let user = self
            .ctx
            .auth
            .current_identity()
            .ok_or(SharedError::NotSignedIn)?;
        let mut meta = self
            .directory
            .get(journal_id)
            .filter(|meta| meta.has_member(&user.id))
            .ok_or_else(|| SharedError::NotMember(journal_id.clone()))?;

        let text = draft.text.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(SharedError::EmptyEntry);
        }

        let now = self.ctx.clock.now_ms();
        let entry = SharedEntry {
            id: EntryId::generate(),
            text,
            mood_tag: draft.mood_tag,
            prompt_text: draft.prompt_text,
            author: user.display_name,
            author_id: user.id,
            created_at: now,
            updated_at: now,
        };
        let preview = LastEntry {
            text: model::snippet(&entry.text, PREVIEW_CHARS),
            author: entry.author.clone(),
            created_at: now,
        };

        let tag = self.own_writes.issue();
        self.ctx
            .remote
            .batch_write(
                vec![
                    WriteOp::Set {
                        path: paths::journal_entry(journal_id, &entry.id),
                        data: entry.to_document_data()?,
                    },
                    WriteOp::Update {
                        path: paths::journal(journal_id),
                        changes: vec![FieldChange::Set {
                            field: "lastEntry".into(),
                            value: model::encode(&preview)?,
                        }],
                    },
                ],
                tag,
            )
            .await?;

        meta.last_entry = Some(preview);
        self.directory.upsert(meta);
        info!("Posted entry {} to journal {}", entry.id, journal_id);
        Ok(entry)
    }

    /// Delete one of the current user's entries. Deleting a missing entry
    /// succeeds.
    pub async fn delete_entry(&self, journal_id: &JournalId, entry_id: &EntryId) -> Result<()> {
        let user = self
            .ctx
            .auth
            .current_identity()
            .ok_or(SharedError::NotSignedIn)?;
        let path = paths::journal_entry(journal_id, entry_id);

        let Some(doc) = self.ctx.remote.get(&path).await? else {
            debug!("Entry {} already gone", path);
            return Ok(());
        };
        let entry = SharedEntry::from_document(&doc)?;
        if entry.author_id != user.id {
            return Err(SharedError::NotAuthor(entry_id.clone()));
        }

        let tag = self.own_writes.issue();
        self.ctx
            .remote
            .batch_write(vec![WriteOp::Delete { path }], tag)
            .await?;
        info!("Deleted entry {} from journal {}", entry_id, journal_id);
        Ok(())
    }
}
