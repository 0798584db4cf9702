//! Authentication collaborator.
//!
//! The engine never signs anyone in; it only asks who is signed in right now.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, RwLock};

/// Authentication identifier of a user (the provider's UID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The signed-in user as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: Identity,
    /// Name shown to other members of shared journals.
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Identity::new(id),
            display_name: display_name.into(),
        }
    }
}

/// Authentication provider.
pub trait AuthProvider: Send + Sync {
    /// The signed-in user, or `None` when signed out.
    fn current_identity(&self) -> Option<UserIdentity>;
}

/// Provider with a fixed (but swappable) user. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user: Arc<RwLock<Option<UserIdentity>>>,
}

impl StaticAuth {
    pub fn signed_in(user: UserIdentity) -> Self {
        Self {
            user: Arc::new(RwLock::new(Some(user))),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: UserIdentity) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl AuthProvider for StaticAuth {
    fn current_identity(&self) -> Option<UserIdentity> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_auth_sign_in_out() {
        let auth = StaticAuth::signed_out();
        assert!(auth.current_identity().is_none());

        let shared = auth.clone();
        auth.sign_in(UserIdentity::new("uid-1", "Ada"));
        assert_eq!(shared.current_identity().unwrap().id, Identity::new("uid-1"));

        shared.sign_out();
        assert!(auth.current_identity().is_none());
    }

    #[test]
    fn test_identity_serializes_as_string() {
        let json = serde_json::to_string(&Identity::new("uid-7")).unwrap();
        assert_eq!(json, "\"uid-7\"");
    }
}
