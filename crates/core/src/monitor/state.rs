//! Polling state machine shared by asset monitoring and archive readiness.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::context::RunContext;
use crate::model::ErrorKind;
use crate::service::ServiceError;

use super::PollSettings;

/// What one successful poll says about the remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    /// Rejected by the server (bad input data).
    Failed(String),
    /// Server-side error.
    Errored(String),
}

/// Final result of a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVerdict {
    Ready,
    Failed(String),
    Errored { kind: ErrorKind, message: String },
    TimedOut,
    NotFound(String),
    Unauthorized(String),
    Cancelled,
}

/// What the loop should do after recording a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Wait(Duration),
    Done(PollVerdict),
}

/// Per-object polling state.
///
/// Transient poll failures count as "still pending" until more than
/// `max_poll_failures` happen back to back. The deadline is checked after
/// every pending poll, and the wait before the next poll never overshoots it,
/// so a timeout is reported no earlier than `max_wait` after the start.
#[derive(Debug)]
pub struct PollState {
    settings: PollSettings,
    started: Instant,
    polls: u32,
    consecutive_failures: u32,
}

impl PollState {
    pub fn new(settings: PollSettings, started: Instant) -> Self {
        Self {
            settings,
            started,
            polls: 0,
            consecutive_failures: 0,
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn record(&mut self, result: Result<Readiness, ServiceError>, now: Instant) -> NextStep {
        self.polls += 1;

        match result {
            Ok(Readiness::Ready) => return NextStep::Done(PollVerdict::Ready),
            Ok(Readiness::Failed(message)) => return NextStep::Done(PollVerdict::Failed(message)),
            Ok(Readiness::Errored(message)) => {
                return NextStep::Done(PollVerdict::Errored {
                    kind: ErrorKind::ProcessingFailed,
                    message,
                })
            }
            Ok(Readiness::Pending) => self.consecutive_failures = 0,
            Err(ServiceError::NotFound(message)) => {
                return NextStep::Done(PollVerdict::NotFound(message))
            }
            Err(ServiceError::Auth(message)) => {
                return NextStep::Done(PollVerdict::Unauthorized(message))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures > self.settings.max_poll_failures {
                    return NextStep::Done(PollVerdict::Errored {
                        kind: e.kind(),
                        message: format!(
                            "{} consecutive poll failures, last: {e}",
                            self.consecutive_failures
                        ),
                    });
                }
            }
        }

        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.settings.max_wait {
            return NextStep::Done(PollVerdict::TimedOut);
        }
        let remaining = self.settings.max_wait - elapsed;
        NextStep::Wait(self.settings.interval.min(remaining))
    }
}

/// How a polling loop ended.
#[derive(Debug, Clone)]
pub struct Settled<V> {
    pub verdict: PollVerdict,
    pub polls: u32,
    /// Last value successfully read.
    pub last: Option<V>,
}

/// Poll until the object settles, the deadline passes, or the run is
/// cancelled. Sleeps go through the run clock.
pub async fn poll_until_settled<V, F, Fut, C>(
    ctx: &RunContext,
    settings: PollSettings,
    mut poll: F,
    classify: C,
) -> Settled<V>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<V, ServiceError>>,
    C: Fn(&V) -> Readiness,
{
    let clock = ctx.clock().clone();
    let mut state = PollState::new(settings, clock.now());
    let mut last = None;

    loop {
        if ctx.is_cancelled() {
            return Settled {
                verdict: PollVerdict::Cancelled,
                polls: state.polls(),
                last,
            };
        }

        let result = poll().await.map(|value| {
            let readiness = classify(&value);
            last = Some(value);
            readiness
        });

        match state.record(result, clock.now()) {
            NextStep::Done(verdict) => {
                return Settled {
                    verdict,
                    polls: state.polls(),
                    last,
                }
            }
            NextStep::Wait(delay) => {
                if !ctx.sleep(delay).await {
                    return Settled {
                        verdict: PollVerdict::Cancelled,
                        polls: state.polls(),
                        last,
                    };
                }
            }
        }
    }
}
