//! Cooperative cancellation for retry and poll loops.
//!
//! A single [`CancellationSignal`] is created per invocation and cloned into
//! every long-running loop. Loops check it at each iteration boundary and
//! race it against their sleeps, so a user interrupt aborts a multi-minute
//! promotion promptly instead of after the next poll.

use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable cancellation flag backed by a watch channel.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// Create a signal in the not-cancelled state.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with [`DeployError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> DeployResult<()> {
        if self.is_cancelled() {
            Err(DeployError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender lives as long as any clone of self; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration`, returning early with `Cancelled` if requested.
    pub async fn sleep(&self, duration: Duration) -> DeployResult<()> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(DeployError::Cancelled),
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let signal = CancellationSignal::new();
        let clone = signal.clone();
        assert!(clone.check().is_ok());

        signal.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(DeployError::Cancelled)));
    }

    #[tokio::test]
    async fn test_sleep_returns_early_on_cancel() {
        let signal = CancellationSignal::new();
        let canceller = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = signal.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(DeployError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_completes_without_cancel() {
        let signal = CancellationSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)).await.is_ok());
    }
}
