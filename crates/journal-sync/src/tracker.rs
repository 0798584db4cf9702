//! Tracks the tags of writes made by this device.
//!
//! Every write is tagged before it is sent. When the change comes back
//! through a subscription, the tag identifies it as our own echo so it is not
//! announced as activity from someone else.
//!
//! A write can echo through several subscriptions (entries and metadata), so
//! tags are not consumed on first sight; they expire after a TTL instead.

use crate::remote::WriteTag;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use web_time::Instant;

#[derive(Clone)]
pub struct WriteTracker {
    /// Tag -> when it was issued
    tags: Arc<Mutex<HashMap<WriteTag, Instant>>>,
    ttl: Duration,
}

impl WriteTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tags: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Issue a fresh tag and remember it as ours.
    pub fn issue(&self) -> WriteTag {
        let tag = WriteTag::new();
        let mut tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        tags.retain(|_, issued| issued.elapsed() < ttl);
        tags.insert(tag, Instant::now());
        tag
    }

    /// Whether `tag` was issued here and has not expired.
    pub fn is_own(&self, tag: &WriteTag) -> bool {
        let tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
        tags.get(tag)
            .is_some_and(|issued| issued.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.tags.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
