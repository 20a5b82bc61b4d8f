//! Time source used by polling and retry loops.
//!
//! Stages never call `tokio::time` directly; they go through a [`Clock`] so
//! tests can drive virtual time with [`crate::testing::MockClock`].

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Source of "now" and of suspension between polls.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_clock_advances() {
        let clock = TokioClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now().duration_since(before) >= Duration::from_millis(5));
    }
}
