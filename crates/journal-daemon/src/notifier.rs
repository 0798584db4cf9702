//! Notification dispatch for a headless device: notifications go to the log.

use journal_sync::{NotificationRequest, Notifier};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, request: NotificationRequest) {
        info!(
            journal = %request.journal_id,
            "Notification: {} - {}",
            request.title,
            request.body
        );
    }
}
