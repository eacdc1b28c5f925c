//! Equal-jitter exponential backoff, wrapped around every reconnect and
//! publish attempt.
//!
//! Each wait sleeps for `duration/2 + rand(0, duration/2)`, then doubles
//! `duration` for next time, capped at `max`. [`EqualJitterBackoff::reset`]
//! drops `duration` back to `init` after a successful call.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct EqualJitterBackoff {
    duration: Duration,
    init: Duration,
    max: Duration,
    closed: Arc<Notify>,
}

impl EqualJitterBackoff {
    pub fn new(init: Duration, max: Duration) -> Self {
        Self {
            duration: init,
            init,
            max,
            closed: Arc::new(Notify::new()),
        }
    }

    /// Resets the backoff to its initial duration, after a successful call.
    pub fn reset(&mut self) {
        self.duration = self.init;
    }

    /// Waits out the current backoff duration, then grows it for next time.
    /// Returns `false` if [`Self::close`] fired first, so a caller waiting
    /// on shutdown doesn't block the full backoff period.
    pub async fn wait(&mut self) -> bool {
        let half = self.duration / 2;
        let jitter = if half.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_nanos(rand::thread_rng().gen_range(0..half.as_nanos() as u64))
        };
        let backoff = half + jitter;

        let waited = tokio::select! {
            _ = tokio::time::sleep(backoff) => true,
            _ = self.closed.notified() => false,
        };

        self.duration = (self.duration * 2).min(self.max);
        waited
    }

    /// Unblocks any in-flight [`Self::wait`] call. `Notify::notify_one`
    /// stores a permit when no task is currently waiting, so a `close()`
    /// that races ahead of the next `wait()` still unblocks it instead of
    /// being lost.
    pub fn close(&self) {
        self.closed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_doubles_duration_up_to_max() {
        let mut b = EqualJitterBackoff::new(Duration::from_millis(1), Duration::from_millis(4));
        assert_eq!(b.duration, Duration::from_millis(1));
        b.wait().await;
        assert_eq!(b.duration, Duration::from_millis(2));
        b.wait().await;
        assert_eq!(b.duration, Duration::from_millis(4));
        b.wait().await;
        // capped at max, doesn't keep growing
        assert_eq!(b.duration, Duration::from_millis(4));
    }

    #[tokio::test]
    async fn reset_restores_initial_duration() {
        let mut b = EqualJitterBackoff::new(Duration::from_millis(1), Duration::from_millis(100));
        b.wait().await;
        b.wait().await;
        assert_ne!(b.duration, Duration::from_millis(1));
        b.reset();
        assert_eq!(b.duration, Duration::from_millis(1));
    }

    #[tokio::test]
    async fn close_unblocks_an_in_flight_wait() {
        let mut b = EqualJitterBackoff::new(Duration::from_secs(60), Duration::from_secs(60));
        let closed = b.closed.clone();
        let handle = tokio::spawn(async move {
            closed.notify_one();
        });
        let waited = b.wait().await;
        handle.await.unwrap();
        assert!(!waited);
    }
}
