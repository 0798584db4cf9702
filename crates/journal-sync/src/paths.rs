//! Remote document layout.

use crate::auth::Identity;
use crate::ids::{EntryId, InviteId, JournalId};

pub const JOURNALS: &str = "journals";

pub fn journal(id: &JournalId) -> String {
    format!("{JOURNALS}/{id}")
}

pub fn journal_entries(id: &JournalId) -> String {
    format!("{JOURNALS}/{id}/entries")
}

pub fn journal_entry(id: &JournalId, entry: &EntryId) -> String {
    format!("{JOURNALS}/{id}/entries/{entry}")
}

pub fn invite(journal: &JournalId, invite: &InviteId) -> String {
    format!("{JOURNALS}/{journal}/invites/{invite}")
}

pub fn user_entries(identity: &Identity) -> String {
    format!("users/{identity}/entries")
}

pub fn user_entry(identity: &Identity, date: &str) -> String {
    format!("users/{identity}/entries/{date}")
}
