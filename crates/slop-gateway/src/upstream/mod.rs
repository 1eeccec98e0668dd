//! Upstream lifecycle
//!
//! - `handle`: per-upstream runtime state (state machine, live connection)
//! - `manager`: connects, supervises and recovers upstreams, keeps the
//!   registry in step with their state

mod handle;
mod manager;

pub use handle::UpstreamHandle;
pub use manager::UpstreamManager;

use std::time::Duration;

/// Backoff before reconnect `attempt` (1-based): initial, doubling, capped
pub fn backoff_for_attempt(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let mut backoff = initial;
    for _ in 1..attempt {
        backoff = backoff.saturating_mul(2);
        if backoff >= max {
            return max;
        }
    }
    backoff.min(max)
}
