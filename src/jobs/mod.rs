//! Fire-and-forget background work that shutdown can wait for.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    running: AtomicUsize,
    idle: Notify,
}

/// Counts in-flight background tasks.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    inner: Arc<Inner>,
}

/// Decrements the count when the task ends, even by panic.
struct Guard(Arc<Inner>);

impl Drop for Guard {
    fn drop(&mut self) {
        if self.0.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, name: &'static str, job: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.running.fetch_add(1, Ordering::SeqCst);
        let guard = Guard(self.inner.clone());
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = job.await {
                tracing::error!(job = name, "background job failed: {:#}", e);
            }
        });
    }

    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Waits until no jobs are running, or `timeout` elapses.
    /// Returns the number of jobs still running.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let wait = async {
            loop {
                let idle = self.inner.idle.notified();
                if self.running() == 0 {
                    return;
                }
                idle.await;
            }
        };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            tracing::warn!(running = self.running(), "timed out draining background jobs");
        }
        self.running()
    }
}
