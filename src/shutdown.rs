//! Cooperative stop requests for resample runs
//!
//! Engines poll the coordinator between batches, so a stop never lands
//! between a data write and its index commit. Async tasks such as the
//! registry refresher await it instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Coordinator shared by the CLI, pipelines and background tasks
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Sticky stop flag with async notification
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Coordinator with no stop requested
    pub fn new() -> Self {
        Self::default()
    }

    /// New coordinator behind an [`Arc`]
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Ask every run to stop at its next commit boundary.
    ///
    /// Only the first request records its reason and wakes waiters.
    pub fn request_shutdown(&self) {
        self.request_with_reason("requested");
    }

    /// Same as [`request_shutdown`](Self::request_shutdown) with a reason for the logs
    pub fn request_with_reason(&self, reason: &str) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.reason.lock() {
            *slot = Some(reason.to_string());
        }
        self.notify.notify_waiters();
    }

    /// Whether a stop was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Reason given by the first request
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Resolve once a stop is requested
    pub async fn wait_for_shutdown(&self) {
        // register before checking the flag so a concurrent request is not missed
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Whether an optional coordinator asks to stop
pub fn stop_requested(shutdown: Option<&SharedShutdown>) -> bool {
    shutdown.is_some_and(|s| s.is_shutdown_requested())
}

/// Turn the first Ctrl+C into a stop request
pub fn listen_for_ctrl_c(shutdown: SharedShutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, stopping after the current batch");
            shutdown.request_with_reason("ctrl-c");
        }
    })
}
