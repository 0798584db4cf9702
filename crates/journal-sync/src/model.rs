//! Journal data model: private entries, shared entries, journal metadata, invites.
//!
//! Remote documents use camelCase field names. Local-only bookkeeping
//! (`synced_at`) never leaves the device.

use crate::auth::Identity;
use crate::clock::Millis;
use crate::ids::{EntryId, InviteId, JournalId};
use crate::remote::Document;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid entry date {0:?}: expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid document at {path}: {source}")]
    InvalidDocument {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid document ID at {path}: {reason}")]
    InvalidId { path: String, reason: String },

    #[error("Could not encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Check that `date` is a real calendar date in `YYYY-MM-DD` form.
pub fn validate_date(date: &str) -> Result<()> {
    if date.len() != 10 || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(ModelError::InvalidDate(date.to_string()));
    }
    Ok(())
}

/// First `max_chars` characters of `text`, trimmed, with an ellipsis when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

fn decode<T: serde::de::DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(doc.data.clone()).map_err(|source| ModelError::InvalidDocument {
        path: doc.path.clone(),
        source,
    })
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(ModelError::Encode)
}

fn parse_id<T: std::str::FromStr<Err = crate::ids::IdError>>(doc: &Document) -> Result<T> {
    doc.id().parse().map_err(|e: crate::ids::IdError| ModelError::InvalidId {
        path: doc.path.clone(),
        reason: e.to_string(),
    })
}

// ============================================================================
// Private entries
// ============================================================================

/// One private journal entry per calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// `YYYY-MM-DD`, the cache key.
    pub date: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub mood_tag: Option<String>,
    #[serde(default)]
    pub prompt_text: Option<String>,
    /// Set on first write, never changed.
    pub created_at: Millis,
    /// Bumped on every local mutation.
    pub updated_at: Millis,
    /// The `updated_at` last known to match the remote store. Local only.
    #[serde(default)]
    pub synced_at: Millis,
    /// `updated_at` of the remote version a conflict merge already folded
    /// into `text`, until the merge is pushed. Local only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_remote_at: Option<Millis>,
}

impl JournalEntry {
    /// True when the entry has local changes the remote has not seen.
    pub fn is_pending(&self) -> bool {
        self.updated_at > self.synced_at
    }

    /// Remote representation (`users/{identity}/entries/{date}`).
    pub fn to_remote(&self) -> Result<Value> {
        encode(&EntryDoc {
            date: self.date.clone(),
            text: self.text.clone(),
            mood_tag: self.mood_tag.clone(),
            prompt_text: self.prompt_text.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Decode a remote entry. The document ID is the authoritative date and
    /// `synced_at` is set to the remote `updated_at`.
    pub fn from_remote(doc: &Document) -> Result<Self> {
        let date = doc.id().to_string();
        validate_date(&date)?;
        let remote: EntryDoc = decode(doc)?;
        Ok(Self {
            date,
            text: remote.text,
            mood_tag: remote.mood_tag,
            prompt_text: remote.prompt_text,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
            synced_at: remote.updated_at,
            merged_remote_at: None,
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryDoc {
    #[serde(default)]
    date: String,
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mood_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt_text: Option<String>,
    #[serde(default)]
    created_at: Millis,
    #[serde(default)]
    updated_at: Millis,
}

/// Partial update applied by `EntryCache::upsert`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub text: Option<String>,
    pub mood_tag: Option<String>,
    pub prompt_text: Option<String>,
}

impl EntryPatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood_tag = Some(mood.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_text = Some(prompt.into());
        self
    }
}

// ============================================================================
// Shared journals
// ============================================================================

/// An entry inside a shared journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedEntry {
    pub id: EntryId,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,
    /// Author's display name at the time of writing.
    #[serde(default)]
    pub author: String,
    pub author_id: Identity,
    pub created_at: Millis,
    #[serde(default)]
    pub updated_at: Millis,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedEntryDoc {
    #[serde(default)]
    text: String,
    #[serde(default)]
    mood_tag: Option<String>,
    #[serde(default)]
    prompt_text: Option<String>,
    #[serde(default)]
    author: String,
    author_id: Identity,
    created_at: Millis,
    #[serde(default)]
    updated_at: Millis,
}

impl SharedEntry {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let id = parse_id(doc)?;
        let raw: SharedEntryDoc = decode(doc)?;
        Ok(Self {
            id,
            text: raw.text,
            mood_tag: raw.mood_tag,
            prompt_text: raw.prompt_text,
            author: raw.author,
            author_id: raw.author_id,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        })
    }

    pub fn to_document_data(&self) -> Result<Value> {
        encode(self)
    }
}

/// Denormalized preview of a journal's newest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastEntry {
    pub text: String,
    pub author: String,
    pub created_at: Millis,
}

/// Metadata document of a shared journal (`journals/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalMeta {
    pub id: JournalId,
    pub name: String,
    pub owner: Identity,
    pub created_at: Millis,
    /// Display names, in join order.
    #[serde(default)]
    pub members: Vec<String>,
    /// Identities of current members, each at most once.
    #[serde(default)]
    pub member_ids: Vec<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entry: Option<LastEntry>,
}

impl JournalMeta {
    pub fn has_member(&self, identity: &Identity) -> bool {
        self.member_ids.contains(identity)
    }

    /// Add a member locally, keeping both lists duplicate-free.
    pub fn admit(&mut self, identity: &Identity, display_name: &str) {
        if !self.members.iter().any(|m| m == display_name) {
            self.members.push(display_name.to_string());
        }
        if !self.has_member(identity) {
            self.member_ids.push(identity.clone());
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut meta: JournalMeta = decode(doc)?;
        // The path is authoritative for the ID.
        meta.id = parse_id(doc)?;
        Ok(meta)
    }

    pub fn to_document_data(&self) -> Result<Value> {
        encode(self)
    }
}

/// Role granted by an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Active,
    Revoked,
    Exhausted,
}

/// Invitation document (`journals/{journal}/invites/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: InviteId,
    pub journal_id: JournalId,
    pub creator: Identity,
    #[serde(default)]
    pub role: Role,
    pub status: InviteStatus,
    /// Successful joins so far. Only ever incremented.
    #[serde(default)]
    pub uses: u32,
    pub max_uses: u32,
    #[serde(default)]
    pub created_at: Millis,
}

impl Invite {
    pub fn is_active(&self) -> bool {
        self.status == InviteStatus::Active
    }

    pub fn is_exhausted(&self) -> bool {
        self.uses >= self.max_uses
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut invite: Invite = decode(doc)?;
        invite.id = parse_id(doc)?;
        Ok(invite)
    }

    pub fn to_document_data(&self) -> Result<Value> {
        encode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_date() {
        assert!(validate_date("2024-03-01").is_ok());
        assert!(validate_date("2024-02-30").is_err());
        assert!(validate_date("2024-3-1").is_err());
        assert!(validate_date("yesterday").is_err());
    }

    #[test]
    fn test_snippet_truncates_on_chars() {
        assert_eq!(snippet("  short  ", 10), "short");
        assert_eq!(snippet("héllo wörld", 5), "héllo…");
    }

    #[test]
    fn test_encode_failure_is_an_error() {
        let mut unencodable = std::collections::HashMap::new();
        unencodable.insert((1, 2), "tuple keys are not JSON object keys");

        assert!(matches!(encode(&unencodable), Err(ModelError::Encode(_))));
    }

    #[test]
    fn test_entry_remote_form_has_no_synced_at() {
        let entry = JournalEntry {
            date: "2024-03-01".into(),
            text: "hi".into(),
            mood_tag: Some("calm".into()),
            prompt_text: None,
            created_at: 10,
            updated_at: 20,
            synced_at: 15,
            merged_remote_at: Some(12),
        };
        let value = entry.to_remote().unwrap();
        assert_eq!(value["moodTag"], "calm");
        assert_eq!(value["updatedAt"], 20);
        assert!(value.get("syncedAt").is_none());
        assert!(value.get("mergedRemoteAt").is_none());
        assert!(value.get("promptText").is_none());
    }

    #[test]
    fn test_entry_from_remote_sets_synced_at() {
        let doc = Document::new(
            "users/u1/entries/2024-03-01",
            json!({"text": "remote", "createdAt": 5, "updatedAt": 200}),
        );
        let entry = JournalEntry::from_remote(&doc).unwrap();
        assert_eq!(entry.date, "2024-03-01");
        assert_eq!(entry.synced_at, 200);
        assert!(!entry.is_pending());
    }

    #[test]
    fn test_entry_from_remote_rejects_bad_date_key() {
        let doc = Document::new("users/u1/entries/notes", json!({"updatedAt": 1}));
        assert!(matches!(
            JournalEntry::from_remote(&doc),
            Err(ModelError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_meta_id_comes_from_path() {
        let doc = Document::new(
            "journals/abc",
            json!({
                "id": "stale",
                "name": "Trip",
                "owner": "u1",
                "createdAt": 1,
                "members": ["Ada"],
                "memberIds": ["u1"]
            }),
        );
        let meta = JournalMeta::from_document(&doc).unwrap();
        assert_eq!(meta.id.as_str(), "abc");
        assert!(meta.has_member(&Identity::new("u1")));
        assert!(meta.last_entry.is_none());
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut meta = JournalMeta {
            id: "j".parse().unwrap(),
            name: "J".into(),
            owner: Identity::new("u1"),
            created_at: 0,
            members: vec!["Ada".into()],
            member_ids: vec![Identity::new("u1")],
            last_entry: None,
        };
        meta.admit(&Identity::new("u2"), "Bo");
        meta.admit(&Identity::new("u2"), "Bo");
        assert_eq!(meta.members, vec!["Ada", "Bo"]);
        assert_eq!(meta.member_ids.len(), 2);
    }

    #[test]
    fn test_invite_status_wire_format() {
        let doc = Document::new(
            "journals/j/invites/i1",
            json!({
                "id": "i1",
                "journalId": "j",
                "creator": "u1",
                "role": "viewer",
                "status": "active",
                "uses": 2,
                "maxUses": 2
            }),
        );
        let invite = Invite::from_document(&doc).unwrap();
        assert_eq!(invite.role, Role::Viewer);
        assert!(invite.is_active());
        assert!(invite.is_exhausted());
        assert_eq!(invite.to_document_data().unwrap()["status"], "active");
    }
}
