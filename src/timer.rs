//! Timer shim over the runtime.
//!
//! Every timed suspension in the crate funnels through these two functions,
//! keeping the runtime dependency in one place.

use std::time::Duration;

use tokio::time::Instant;

/// Suspend the current task for `duration`.
pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Suspend the current task until `deadline`.
pub(crate) async fn sleep_until(deadline: Instant) {
    tokio::time::sleep_until(deadline).await;
}
