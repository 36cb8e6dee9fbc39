//! Periodic proactive refresh.
//!
//! [`RefreshScheduler`] drives [`TokenManager::ensure_valid_token`] on a fixed
//! interval so tokens are refreshed ahead of expiry rather than on the first
//! failing call. At most one loop runs per scheduler; starting it again
//! cancels the previous loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::token::{LifecycleError, TokenManager};

/// Spawn the refresh loop. It stops when `cancel` fires.
///
/// The first tick is skipped; the caller has just loaded or connected the
/// credential when the loop starts.
pub fn spawn_refresh_task(
    manager: Arc<dyn TokenManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "background token refresh started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match manager.ensure_valid_token().await {
                Ok(_) => debug!("scheduled token check passed"),
                Err(err @ LifecycleError::ReconnectRequired { .. }) => {
                    error!(error = %err, "scheduled refresh needs user action");
                }
                Err(LifecycleError::NotConnected { .. }) => {
                    debug!("scheduled refresh skipped, not connected");
                }
                Err(err) => warn!(error = %err, "scheduled refresh failed"),
            }
        }

        info!("background token refresh stopped");
    })
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single refresh loop of a session.
pub struct RefreshScheduler {
    manager: Arc<dyn TokenManager>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl RefreshScheduler {
    pub fn new(manager: Arc<dyn TokenManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the loop as a child of `parent`, cancelling any previous loop.
    pub fn start(&self, parent: &CancellationToken) {
        let cancel = parent.child_token();
        let handle = spawn_refresh_task(self.manager.clone(), self.interval, cancel.clone());

        if let Some(previous) = self.running.lock().replace(Running { cancel, handle }) {
            debug!("replacing running refresh loop");
            previous.cancel.cancel();
        }
    }

    /// Cancel the loop, if any. Returns its handle so callers may await exit.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let running = self.running.lock().take()?;
        running.cancel.cancel();
        Some(running.handle)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.cancel.is_cancelled() && !r.handle.is_finished())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
