//! File watcher with debouncing for store changes.
//!
//! Uses notify-debouncer-mini so a burst of writes from another device (one
//! batch touching several documents) arrives as a handful of events.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Change to one document file.
#[derive(Debug, Clone)]
pub struct DocEvent {
    /// Document path (relative to the store root, without extension), or a
    /// collection path for directory changes
    pub path: String,
    pub kind: DocEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocEventKind {
    /// Document was created or modified
    Written,
    /// Document was deleted
    Removed,
}

/// Watches a store directory for document changes.
pub struct StoreWatcher {
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<DocEvent>,
}

impl StoreWatcher {
    /// Start watching `root` recursively with a 200ms debounce.
    pub fn new(root: PathBuf) -> Result<Self> {
        // FSEvents on macOS reports canonical paths (/private/var/...).
        let root = root.canonicalize().unwrap_or(root);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root_clone = root.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(doc_event) = Self::process_event(&event, &root_clone) {
                            if event_tx.send(doc_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Store watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Map a debounced event to a document event, if it concerns a document.
    fn process_event(event: &DebouncedEvent, root: &Path) -> Option<DocEvent> {
        let relative = event.path.strip_prefix(root).ok()?;
        let relative = relative.to_str()?.replace('\\', "/");

        // Temp files of in-flight writes are hidden
        if relative.starts_with('.') || relative.contains("/.") {
            return None;
        }
        // A new collection directory may hold documents written before the
        // watch on it was in place, so it counts as a change too.
        let path = match relative.strip_suffix(".json") {
            Some(path) => path.to_string(),
            None if event.path.is_dir() => relative,
            None => return None,
        };

        let kind = if event.path.exists() {
            DocEventKind::Written
        } else {
            DocEventKind::Removed
        };
        debug!("Document event: {:?} - {}", kind, path);

        Some(DocEvent { path, kind })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<DocEvent> {
        &mut self.event_rx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
