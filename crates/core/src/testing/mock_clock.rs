//! Virtual clock for polling and retry tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::clock::Clock;

/// Clock whose `sleep` advances virtual time instantly.
///
/// Every sleep is recorded, so tests can assert on backoff sequences and on
/// how long a polling loop believed it waited. All callers share one
/// timeline.
#[derive(Debug)]
pub struct MockClock {
    base: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Virtual time passed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Move virtual time forward without a sleep call.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner()) += duration;
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
