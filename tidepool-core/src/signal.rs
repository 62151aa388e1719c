//! One-shot latch.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A one-shot, idempotent latch.
///
/// A `Signal` starts unset; [`pulse`](Signal::pulse) moves it to set exactly
/// once, and every current and future waiter observes the transition.
/// Pulsing an already-pulsed signal is a no-op. Used for disconnect
/// watchers, sync interrupts, and test synchronization.
#[derive(Debug, Default)]
pub struct Signal {
    pulsed: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal, waking all waiters. Idempotent.
    pub fn pulse(&self) {
        if !self.pulsed.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether the signal has been pulsed.
    pub fn is_pulsed(&self) -> bool {
        self.pulsed.load(Ordering::SeqCst)
    }

    /// Wait until the signal is pulsed. Returns immediately if it already
    /// was. Any number of tasks may wait concurrently.
    pub async fn wait(&self) {
        loop {
            if self.is_pulsed() {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking, so a pulse that lands
            // between the check and the await is not missed.
            notified.as_mut().enable();
            if self.is_pulsed() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn pulse_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        assert!(!signal.is_pulsed());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.pulse();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
    }

    #[tokio::test]
    async fn wait_after_pulse_returns_immediately() {
        let signal = Signal::new();
        signal.pulse();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("already-pulsed signal should not block");
    }

    #[tokio::test]
    async fn pulse_is_idempotent() {
        let signal = Signal::new();
        signal.pulse();
        signal.pulse();
        assert!(signal.is_pulsed());
    }

    #[tokio::test]
    async fn multiple_waiters_all_wake() {
        let signal = Arc::new(Signal::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.pulse();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .expect("waiter should not panic");
        }
    }
}
