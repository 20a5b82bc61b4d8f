//! Processing monitor.
//!
//! Polls uploaded assets until the service reports a terminal status or the
//! wait budget runs out. The polling state machine in [`state`] is shared
//! with archive readiness polling.

mod config;
mod runner;
pub mod state;

pub use config::{MonitorConfig, PollSettings};
pub use runner::{AssetWatch, MonitorReport, ProcessingMonitor};
pub use state::{poll_until_settled, NextStep, PollState, PollVerdict, Readiness, Settled};
