use std::time::Duration;

use tokio::sync::Notify;

/// Single-slot coalescing wake signal for the job worker.
///
/// Producers call [`notify`](WakeSignal::notify) after enqueuing work; the
/// call never blocks, and signals sent while one is already pending collapse
/// into a single wake. The worker waits with a bounded timeout so a wake
/// lost to a race only delays the next poll, never prevents it.
#[derive(Debug, Default)]
pub struct WakeSignal {
    notify: Notify,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
        }
    }

    /// Signal the worker. No-op if a wake is already stored.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Wait for a wake or until `timeout` elapses.
    ///
    /// Returns `true` if a wake was consumed, `false` on timeout. A wake
    /// stored before this call is consumed immediately.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wake_before_wait_is_consumed() {
        let signal = WakeSignal::new();
        signal.notify();
        assert!(signal.wait(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_wake() {
        let signal = WakeSignal::new();
        assert!(!signal.wait(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_repeated_notifies_coalesce() {
        let signal = WakeSignal::new();
        signal.notify();
        signal.notify();
        signal.notify();

        // Only one stored wake: the first wait consumes it, the second
        // must fall through to its timeout.
        assert!(signal.wait(Duration::from_millis(10)).await);
        assert!(!signal.wait(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_notify_wakes_blocked_waiter() {
        let signal = std::sync::Arc::new(WakeSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.notify();

        assert!(waiter.await.unwrap());
    }
}
