//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by the sync services.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Remote additions older than this never trigger a notification.
    pub recency_window_secs: u64,
    /// Number of joins an invite admits before it is exhausted.
    pub invite_max_uses: u32,
    /// URL scheme of invite deep links (`<scheme>://invite?...`).
    pub link_scheme: String,
    /// How long a write tag is remembered for echo detection.
    pub own_write_ttl_secs: u64,
    /// Interval between background syncs in the daemon.
    pub sync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            recency_window_secs: 60,
            invite_max_uses: 50,
            link_scheme: "journal".to_string(),
            own_write_ttl_secs: 300,
            sync_interval_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_window_secs)
    }

    pub fn own_write_ttl(&self) -> Duration {
        Duration::from_secs(self.own_write_ttl_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}
