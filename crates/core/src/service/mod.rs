//! Remote tiling service abstraction.
//!
//! This module provides a `TilingService` trait for the asset/archive REST
//! workflow, a Cesium ion backend, and a retry decorator that owns the
//! transient-error backoff policy.

mod ion;
mod retry;
mod types;

pub use ion::IonClient;
pub use retry::{RetryConfig, RetryPolicy, RetryingService, MAX_RETRY_AFTER};
pub use types::*;
