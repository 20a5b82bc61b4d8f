//! Per-run state shared by every stage.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::clock::{Clock, TokioClock};

/// Explicit run context handed to each stage.
///
/// Holds the cancellation token (user interrupt or fatal auth failure), the
/// clock used for polling, and the reason the run was aborted, if any.
/// Cloning is cheap; all clones observe the same cancellation.
#[derive(Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    abort_reason: Arc<Mutex<Option<String>>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Create a context backed by the tokio clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock))
    }

    /// Create a context with a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            clock,
            abort_reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Token observed by the stages; cancelling it stops new work.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop issuing new work without recording an abort reason.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Abort the run. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Ok(mut slot) = self.abort_reason.lock() {
            if slot.is_none() {
                warn!(reason = %reason, "Aborting run");
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().ok().and_then(|r| r.clone())
    }

    /// Sleep on the run clock. Returns `false` if the run was cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.clock.sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClock;

    #[test]
    fn test_abort_keeps_first_reason() {
        let ctx = RunContext::new();
        ctx.abort("bad token");
        ctx.abort("second");
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.abort_reason().as_deref(), Some("bad token"));
    }

    #[test]
    fn test_cancel_has_no_reason() {
        let ctx = RunContext::new();
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.abort_reason().is_none());
    }

    #[tokio::test]
    async fn test_sleep_returns_false_when_cancelled() {
        let ctx = RunContext::new();
        ctx.cancel();
        assert!(!ctx.sleep(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_sleep_uses_injected_clock() {
        let clock = Arc::new(MockClock::new());
        let ctx = RunContext::with_clock(clock.clone());
        assert!(ctx.sleep(Duration::from_secs(30)).await);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }
}
