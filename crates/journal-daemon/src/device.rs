//! One device: the sync engine over a `DirStore`, with persisted state.

use crate::dir_store::DirStore;
use crate::storage::{DeviceState, DeviceStorage};

use anyhow::Result;
use journal_sync::events::Subscription;
use journal_sync::{
    Directory, EntryCache, JournalSync, Notifier, StaticAuth, SyncConfig, SyncContext, SyncError,
    SystemClock, UserIdentity,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a device keeps things and who is using it.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Shared store directory (the "remote")
    pub store_dir: PathBuf,
    /// Private state directory of this device
    pub data_dir: PathBuf,
    pub user: UserIdentity,
    pub config: SyncConfig,
}

pub struct Device {
    store: DirStore,
    storage: DeviceStorage,
    engine: JournalSync,
    _events: Subscription,
}

impl Device {
    /// Open a device, restoring any saved state.
    pub fn open(options: DeviceOptions, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let store = DirStore::new(options.store_dir)?;
        let storage = DeviceStorage::new(&options.data_dir);
        let state = storage.load()?;
        debug!(
            "Loaded {} entries and {} journals",
            state.cache.entries.len(),
            state.journals.len()
        );

        let clock = Arc::new(SystemClock);
        let ctx = SyncContext::builder(
            Arc::new(store.clone()),
            Arc::new(StaticAuth::signed_in(options.user)),
        )
        .notifier(notifier)
        .clock(clock.clone())
        .config(options.config)
        .build();
        let engine = JournalSync::new(
            ctx,
            EntryCache::from_snapshot(state.cache, clock),
            Directory::from_journals(state.journals),
        );
        let events = engine
            .ctx
            .events
            .subscribe(|event| debug!("Sync event: {:?}", event));

        Ok(Self {
            store,
            storage,
            engine,
            _events: events,
        })
    }

    pub fn engine(&self) -> &JournalSync {
        &self.engine
    }

    pub fn store(&self) -> &DirStore {
        &self.store
    }

    pub fn save(&self) -> Result<()> {
        self.storage.save(&DeviceState {
            cache: self.engine.cache.snapshot(),
            journals: self.engine.directory.list(),
        })
    }

    /// Run until `shutdown` resolves: listen to every journal, watch the
    /// store, and sync and save on every interval tick.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let watch = self.store.spawn_watcher()?;

        match self.engine.membership.restore_journals().await {
            Ok(journals) => info!("Listening to {} journal(s)", journals.len()),
            Err(e) => warn!("Could not restore journals: {}", e),
        }

        let mut ticker = tokio::time::interval(self.engine.ctx.config.sync_interval());
        tokio::pin!(shutdown);

        info!("Device running. Press Ctrl+C to stop.");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Other failures are logged by the engine
                    if let Err(SyncError::InProgress) = self.engine.reconciler.sync_with_cloud().await {
                        debug!("Previous sync still running");
                    }
                    if let Err(e) = self.save() {
                        error!("Failed to save device state: {}", e);
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.engine.shutdown().await;
        watch.abort();
        self.save()?;
        info!("Shut down");
        Ok(())
    }
}
