//! Wires the sync services around one device's cache and directory.

use crate::cache::EntryCache;
use crate::context::SyncContext;
use crate::directory::Directory;
use crate::listener::ProjectionListener;
use crate::membership::MembershipService;
use crate::reconcile::ReconciliationEngine;
use crate::shared::SharedEntries;
use crate::tracker::WriteTracker;

use std::sync::Arc;

/// Every service of one device, sharing one context, cache and directory.
pub struct JournalSync {
    pub ctx: SyncContext,
    pub cache: EntryCache,
    pub directory: Directory,
    pub reconciler: ReconciliationEngine,
    pub listener: Arc<ProjectionListener>,
    pub membership: MembershipService,
    pub shared: SharedEntries,
}

impl JournalSync {
    pub fn new(ctx: SyncContext, cache: EntryCache, directory: Directory) -> Self {
        let own_writes = WriteTracker::new(ctx.config.own_write_ttl());
        let listener = Arc::new(ProjectionListener::new(
            ctx.clone(),
            cache.clone(),
            directory.clone(),
            own_writes.clone(),
        ));
        Self {
            reconciler: ReconciliationEngine::new(ctx.clone(), cache.clone()),
            membership: MembershipService::new(
                ctx.clone(),
                directory.clone(),
                Arc::clone(&listener),
            ),
            shared: SharedEntries::new(ctx.clone(), directory.clone(), own_writes),
            listener,
            ctx,
            cache,
            directory,
        }
    }

    /// Stop listening to every journal.
    pub async fn shutdown(&self) {
        self.listener.shutdown().await;
    }
}
