//! Coalescing usage stats writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::AuthError;
use crate::user::Stats;

/// Flush function type for batched stats updates, keyed by username.
pub type FlushFn = Arc<dyn Fn(HashMap<String, Stats>) -> FlushFuture + Send + Sync + 'static>;

/// Future type for flush operations.
pub type FlushFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), AuthError>> + Send + 'static>>;

/// Queue of pending per-user stats snapshots, written by a background task.
///
/// Enqueuing the same user twice before a flush keeps only the latest snapshot.
pub struct StatsQueue {
    pending: Arc<Mutex<HashMap<String, Stats>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatsQueue {
    /// Start the writer task. The first flush happens one `interval` from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(interval: Duration, flush_fn: FlushFn) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let pending: Arc<Mutex<HashMap<String, Stats>>> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let pending_clone = pending.clone();
        let cancel_clone = cancel.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        flush(&pending_clone, &flush_fn).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        flush(&pending_clone, &flush_fn).await;
                    }
                }
            }
        });

        Self {
            pending,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue a snapshot for `username`, replacing any pending one.
    #[inline]
    pub fn enqueue(&self, username: &str, stats: Stats) {
        self.pending.lock().insert(username.to_string(), stats);
    }

    /// Drop all pending snapshots.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Number of users with a pending snapshot.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stop the writer after one final flush, and wait for it.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "stats writer task failed");
        }
    }
}

impl Drop for StatsQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for StatsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

async fn flush(pending: &Mutex<HashMap<String, Stats>>, flush_fn: &FlushFn) {
    let batch = {
        let mut map = pending.lock();
        if map.is_empty() {
            return;
        }
        std::mem::take(&mut *map)
    }; // MutexGuard dropped here

    let users = batch.len();
    match flush_fn(batch).await {
        Ok(()) => debug!(users, "wrote user stats"),
        Err(e) => warn!(users, error = %e, "failed to write user stats, dropping batch"),
    }
}
