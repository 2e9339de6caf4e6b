//! Background Expiry Sweeper
//!
//! `get` already refuses to return expired values, but a key that is set with
//! a TTL and never read again would stay in memory forever. The sweeper is a
//! Tokio task that wakes on a fixed interval and removes every expired entry.
//!
//! The task lives exactly as long as its [`ExpirySweeper`] handle. The server
//! holds the handle for its whole lifetime; tests that want deterministic
//! expiry simply never start one.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default time between sweeps, in milliseconds
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 2000;

/// Default time between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration =
    Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS);

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Time between sweeps (default: 2s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use respkv::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(engine, ExpiryConfig::default());
    ///
    /// // Dropping the handle stops the task
    /// drop(sweeper);
    /// # }
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let interval = config.interval;
        let task = tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Background expiry sweeper started");

        Self { shutdown_tx, task }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Background expiry sweeper stopped");
        }
    }

    /// Returns true once the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = engine.cleanup_expired();

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
