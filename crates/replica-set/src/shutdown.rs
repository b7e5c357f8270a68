//! One-shot shutdown shared between signal handlers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mango_bootable::Bootable;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

struct Inner {
    started: AtomicBool,
    done: CancellationToken,
}

/// Makes sure a shutdown sequence runs at most once, however many signals
/// arrive while it is in flight.
///
/// Clones share state.
#[derive(Clone)]
pub struct ShutdownGuard {
    inner: Arc<Inner>,
}

impl ShutdownGuard {
    /// Creates a guard that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                started: AtomicBool::new(false),
                done: CancellationToken::new(),
            }),
        }
    }

    /// Runs `sequence` if no shutdown has been triggered yet.
    ///
    /// Returns `None` without polling `sequence` when another caller got
    /// there first.
    pub async fn run<F, T>(&self, sequence: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return None;
        }

        // mark done even if the sequence is dropped midway
        let _done = self.inner.done.clone().drop_guard();

        Some(sequence.await)
    }

    /// Runs `before`, then stops `target`, at most once.
    ///
    /// Returns `false` if another shutdown was already underway.
    pub async fn shutdown<B, F>(&self, target: &B, before: F) -> bool
    where
        B: Bootable,
        F: Future<Output = ()>,
    {
        self.run(async {
            info!("shutting down {}...", target.name());

            before.await;

            match target.stop().await {
                Ok(()) => info!("{} shutdown", target.name()),
                Err(e) => error!("failed to stop {}: {}", target.name(), e),
            }
        })
        .await
        .is_some()
    }

    /// Like [`shutdown`](Self::shutdown), but when another caller's shutdown
    /// is already underway, waits for it to finish before returning.
    ///
    /// Use this on exit paths so the process never outlives a stop in flight.
    pub async fn shutdown_and_wait<B, F>(&self, target: &B, before: F) -> bool
    where
        B: Bootable,
        F: Future<Output = ()>,
    {
        let ran = self.shutdown(target, before).await;
        self.wait().await;
        ran
    }

    /// Whether a shutdown has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Resolves once the triggered shutdown has finished.
    pub async fn wait(&self) {
        self.inner.done.cancelled().await;
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    #[derive(Default)]
    struct Counter {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Bootable for Counter {
        type Error = std::io::Error;

        fn name(&self) -> &str {
            "counter"
        }

        async fn start(&self) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), Self::Error> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn purge(&self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runs_once() {
        let guard = ShutdownGuard::new();

        assert_eq!(guard.run(async { 1 }).await, Some(1));
        assert_eq!(guard.run(async { 2 }).await, None);
        assert!(guard.is_triggered());
    }

    #[tokio::test]
    async fn test_concurrent_signals_stop_once() {
        let guard = ShutdownGuard::new();
        let target = Arc::new(Counter::default());

        let handles = (0..4)
            .map(|_| {
                let guard = guard.clone();
                let target = target.clone();
                tokio::spawn(async move { guard.shutdown(target.as_ref(), async {}).await })
            })
            .collect::<Vec<_>>();

        let mut ran = 0;
        for handle in handles {
            if handle.await.unwrap() {
                ran += 1;
            }
        }

        guard.wait().await;

        assert_eq!(ran, 1);
        assert_eq!(target.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_and_wait_outlasts_stop_in_flight() {
        let guard = ShutdownGuard::new();
        let target = Arc::new(Counter::default());

        let first = {
            let guard = guard.clone();
            let target = target.clone();
            tokio::spawn(async move { guard.shutdown(target.as_ref(), async {}).await })
        };

        while !guard.is_triggered() {
            tokio::task::yield_now().await;
        }

        let ran = guard.shutdown_and_wait(target.as_ref(), async {}).await;

        assert!(!ran);
        assert_eq!(target.stops.load(Ordering::SeqCst), 1);
        assert!(first.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_resolves_after_sequence() {
        let guard = ShutdownGuard::new();
        assert!(!guard.is_triggered());

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.wait().await })
        };

        let target = Counter::default();
        assert!(guard.shutdown(&target, async {}).await);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
