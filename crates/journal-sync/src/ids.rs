//! Identifiers for remote documents (journals, invites, shared entries).
//!
//! Generated IDs are 16 lowercase hex characters. Parsed IDs only need to be
//! usable as a single path segment, so IDs minted by other clients are accepted.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted ID.
const MAX_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("ID is empty")]
    Empty,
    #[error("ID is longer than {MAX_ID_LEN} characters")]
    TooLong,
    #[error("ID contains an invalid character: {0:?}")]
    InvalidChar(char),
}

/// Generate a random, non-zero 16-char hex ID.
fn random_hex_id() -> String {
    use rand::Rng;
    loop {
        let id: u64 = rand::rng().random();
        if id != 0 {
            return format!("{:016x}", id);
        }
    }
}

fn validate(s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    if s.len() > MAX_ID_LEN {
        return Err(IdError::TooLong);
    }
    if let Some(c) = s
        .chars()
        .find(|c| *c == '/' || c.is_whitespace() || c.is_control())
    {
        return Err(IdError::InvalidChar(c));
    }
    Ok(())
}

macro_rules! document_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random ID.
            pub fn generate() -> Self {
                Self(random_hex_id())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                validate(s)?;
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

document_id!(
    /// ID of a shared journal (`journals/{id}`).
    JournalId
);

document_id!(
    /// ID of an invitation (`journals/{journal}/invites/{id}`).
    InviteId
);

document_id!(
    /// ID of an entry inside a shared journal (`journals/{journal}/entries/{id}`).
    EntryId
);
