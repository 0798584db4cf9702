//! journal-sync: offline-first synchronization of private and shared journals.
//!
//! This crate provides:
//! - A local entry cache with pending-change bookkeeping
//! - Timestamp-based reconciliation of private entries with a remote store
//! - Shared journals: creation, invite links, joining and leaving
//! - A projection listener keeping shared views live and raising notifications
//! - `RemoteStore`, `AuthProvider`, `Notifier` and `Clock` trait abstractions

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod directory;
pub mod engine;
pub mod events;
pub mod ids;
pub mod invite_link;
pub mod listener;
pub mod membership;
pub mod model;
pub mod notify;
pub mod paths;
pub mod reconcile;
pub mod remote;
pub mod shared;
pub mod tracker;

pub use auth::{AuthProvider, Identity, StaticAuth, UserIdentity};
pub use cache::{CacheSnapshot, EntryCache};
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use config::SyncConfig;
pub use context::SyncContext;
pub use directory::Directory;
pub use engine::JournalSync;
pub use events::{EventBus, Subscription, SyncEvent};
pub use ids::{EntryId, InviteId, JournalId};
pub use listener::{ListenerState, ProjectionListener};
pub use membership::{InviteRejection, JoinOutcome, MembershipService};
pub use model::{EntryPatch, JournalEntry, JournalMeta, Role, SharedEntry};
pub use notify::{NotificationRequest, Notifier};
pub use reconcile::{ReconciliationEngine, SyncError, SyncReport};
pub use remote::{InMemoryRemote, RemoteError, RemoteStore};
pub use shared::SharedEntries;
pub use tracker::WriteTracker;
