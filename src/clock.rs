//! Monotonic picosecond-resolution clock and sleep-until primitive.
//!
//! Mirrors the `pclk_t`/`pclk_now()` collaborator from the original tool:
//! a single process-wide monotonic origin, with all timestamps expressed
//! as picoseconds elapsed since that origin so that interval arithmetic
//! never has to reason about wall-clock jumps.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Picosecond-resolution timestamp, monotone from process start.
pub type Pclk = u128;

static ORIGIN: OnceLock<Instant> = OnceLock::new();

fn origin() -> Instant {
    *ORIGIN.get_or_init(Instant::now)
}

/// Returns the current monotonic time in picoseconds since the first call
/// to any clock function in this process.
pub fn pclk_now() -> Pclk {
    origin().elapsed().as_nanos() * 1_000
}

/// Converts a `Duration` to picoseconds.
pub fn duration_to_pclk(d: Duration) -> Pclk {
    d.as_nanos() * 1_000
}

/// Converts a picosecond interval to a `Duration`, saturating at zero for
/// negative-equivalent (already-elapsed) deadlines.
pub fn pclk_to_duration(p: Pclk) -> Duration {
    Duration::from_nanos((p / 1_000) as u64)
}

/// Sleeps until `pclk_now() >= deadline`, returning immediately if the
/// deadline has already passed. Cooperative: this is a plain OS sleep and
/// observes no cancellation signal itself (the pipeline driver checks
/// cancellation only at stage boundaries, per the concurrency model).
pub fn sleep_until(deadline: Pclk) {
    let now = pclk_now();
    if now >= deadline {
        return;
    }
    std::thread::sleep(pclk_to_duration(deadline - now));
}
