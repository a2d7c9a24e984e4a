use super::Agent;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(super) const STATUS_INTERVAL: Duration = Duration::from_secs(300);
pub(super) const RULES_INTERVAL: Duration = Duration::from_secs(300);

impl Agent {
    /// Ships the buffer every flush interval, or earlier when the buffer signals it is due.
    /// A flush in progress finishes before cancellation is observed.
    pub(super) async fn flush_loop(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.config().flush_interval();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
                _ = self.buffer.flush_ready() => {}
            }
            if !self.is_running() {
                break;
            }
            self.flush_buffer().await;
        }
        debug!("flush loop stopped");
    }

    pub(super) async fn status_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(STATUS_INTERVAL) => {}
            }
            if !self.is_running() {
                break;
            }
            let status = self.get_status();
            if !self.transport.send_status(&status).await {
                warn!(status = ?status.status, "Failed to report agent status");
            }
        }
        debug!("status loop stopped");
    }

    pub(super) async fn rules_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RULES_INTERVAL) => {}
            }
            if !self.is_running() {
                break;
            }
            self.get_dynamic_rules().await;
        }
        debug!("rules loop stopped");
    }
}
