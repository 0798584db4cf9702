//! Collaborators shared by every engine component.

use crate::auth::AuthProvider;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::events::EventBus;
use crate::notify::{NoopNotifier, Notifier};
use crate::remote::RemoteStore;

use std::sync::Arc;

/// Handles to the outside world. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    pub remote: Arc<dyn RemoteStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventBus>,
    pub config: SyncConfig,
}

impl SyncContext {
    /// Start from the two required collaborators; everything else defaults.
    pub fn builder(
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> SyncContextBuilder {
        SyncContextBuilder {
            remote,
            auth,
            notifier: Arc::new(NoopNotifier),
            clock: Arc::new(SystemClock),
            events: Arc::new(EventBus::new()),
            config: SyncConfig::default(),
        }
    }
}

pub struct SyncContextBuilder {
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    config: SyncConfig,
}

impl SyncContextBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SyncContext {
        SyncContext {
            remote: self.remote,
            auth: self.auth,
            notifier: self.notifier,
            clock: self.clock,
            events: self.events,
            config: self.config,
        }
    }
}
