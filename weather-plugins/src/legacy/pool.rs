use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{sync::Semaphore, task, time};
use tracing::{debug, error, warn};

use crate::error::BridgeError;

/// Fixed-size pool for blocking legacy calls.
///
/// Clones share the same permits, so one pool can back every bridged
/// provider in the process. A call that times out keeps its permit until the
/// blocking work actually returns.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    timeout: Duration,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE, Self::DEFAULT_TIMEOUT)
    }
}

impl WorkerPool {
    pub const DEFAULT_SIZE: usize = 4;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size, timeout }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Workers not currently running a call.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuses every later submission with [`BridgeError::PoolClosed`].
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Runs `call` on a blocking worker and suspends the caller until it
    /// finishes or the pool's timeout elapses. The timeout covers waiting
    /// for a free worker as well as the call itself.
    pub async fn run<T, F>(&self, provider: &str, call: F) -> Result<T, BridgeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.timeout;
        let deadline = time::Instant::now() + timeout;

        let permit = match time::timeout_at(deadline, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(BridgeError::PoolClosed),
            Err(_) => {
                warn!(provider, after = ?timeout, "legacy call timed out waiting for a free worker");
                return Err(BridgeError::TimedOut { name: provider.to_string(), after: timeout });
            }
        };

        let owner = provider.to_string();
        let handle = task::spawn_blocking(move || {
            let started = Instant::now();
            let out = call();
            let elapsed = started.elapsed();
            if elapsed > timeout {
                debug!(provider = %owner, ?elapsed, "leaked legacy worker finished");
            }
            drop(permit);
            out
        });

        match time::timeout_at(deadline, handle).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(err)) => {
                error!(provider, "legacy worker failed: {err}");
                Err(BridgeError::WorkerPanicked(provider.to_string()))
            }
            Err(_) => {
                warn!(
                    provider,
                    after = ?timeout,
                    "legacy call timed out; its worker stays busy until the call returns"
                );
                Err(BridgeError::TimedOut { name: provider.to_string(), after: timeout })
            }
        }
    }
}
