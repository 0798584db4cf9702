//! journal-daemon library: Exposes the device components for testing.
//!
//! A thin layer over journal-sync that provides a directory-backed remote
//! store, state persistence and a log-only notifier.

pub mod device;
pub mod dir_store;
pub mod notifier;
pub mod storage;
pub mod watcher;

// Re-export key types for convenience
pub use device::{Device, DeviceOptions};
pub use dir_store::DirStore;
pub use notifier::LogNotifier;
pub use storage::{DeviceState, DeviceStorage};
pub use watcher::{DocEvent, DocEventKind, StoreWatcher};
