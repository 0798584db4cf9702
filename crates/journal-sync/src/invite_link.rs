//! Invite deep links: `<scheme>://invite?journal=<journalId>&invite=<inviteId>`.

use crate::ids::{InviteId, JournalId};
use thiserror::Error;
use url::Url;

const INVITE_HOST: &str = "invite";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Malformed link: {0}")]
    Malformed(#[from] url::ParseError),

    #[error("Not an invite link: {0}")]
    NotAnInvite(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Parsed invite link. Missing or unusable parameters are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteLink {
    pub journal_id: Option<JournalId>,
    pub invite_id: Option<InviteId>,
}

impl InviteLink {
    /// Both IDs, if present.
    pub fn ids(&self) -> Option<(&JournalId, &InviteId)> {
        Some((self.journal_id.as_ref()?, self.invite_id.as_ref()?))
    }
}

/// Build the link for an invite.
pub fn build(scheme: &str, journal_id: &JournalId, invite_id: &InviteId) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("journal", journal_id.as_str())
        .append_pair("invite", invite_id.as_str())
        .finish();
    format!("{scheme}://{INVITE_HOST}?{query}")
}

/// Parse an invite link.
///
/// Only the host is checked; any scheme is accepted. Parameters are optional
/// so a truncated link still yields what it has.
pub fn parse(link: &str) -> Result<InviteLink> {
    let url = Url::parse(link.trim())?;
    if url.host_str() != Some(INVITE_HOST) {
        return Err(LinkError::NotAnInvite(link.to_string()));
    }

    let mut parsed = InviteLink::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "journal" => parsed.journal_id = value.parse().ok(),
            "invite" => parsed.invite_id = value.parse().ok(),
            _ => {}
        }
    }
    Ok(parsed)
}
