//! Pacing stage: delays an operation's issue according to either a fixed
//! per-operation delay or a precomputed IOPS/bandwidth schedule.
//!
//! Grounded on `xdd_throttle_before_io_operation` in the original source.
//! The original also emits a debug line to stderr on every throttled
//! operation (`XDD_DEBUG_THROTTLE`); that is dropped here in favor of a
//! `tracing::trace!` call, since stderr debug prints are an ambient
//! logging concern, not pacing behavior.

use tracing::trace;

use crate::clock::{pclk_now, sleep_until, Pclk};
use crate::worker::Worker;

#[derive(Debug, Clone)]
pub enum ThrottleMode {
    /// No pacing: issue operations back to back.
    None,
    /// Sleep a fixed duration before every operation.
    Delay(Pclk),
    /// Sleep until a precomputed absolute deadline, relative to the
    /// target's pass start time (IOPS or bandwidth throttling — both
    /// reduce to "hit this schedule of `time1` deadlines" once the seek
    /// table has been built).
    Schedule,
}

#[derive(Debug, Clone)]
pub struct Throttle {
    mode: ThrottleMode,
}

impl Throttle {
    pub fn none() -> Self {
        Self {
            mode: ThrottleMode::None,
        }
    }

    pub fn delay(interval: Pclk) -> Self {
        Self {
            mode: ThrottleMode::Delay(interval),
        }
    }

    pub fn schedule() -> Self {
        Self {
            mode: ThrottleMode::Schedule,
        }
    }

    /// Runs the throttle stage for `worker`'s next operation. `deadline`
    /// is the precomputed `pass_start + seek_table[op].time1` absolute
    /// time, used only in `Schedule` mode.
    pub fn before_io(&self, worker: &Worker, deadline: Pclk) {
        match self.mode {
            ThrottleMode::None => {}
            ThrottleMode::Delay(interval) => {
                trace!(target_id = worker.target_id, op = worker.current_op, interval, "throttle delay");
                sleep_until(pclk_now() + interval);
            }
            ThrottleMode::Schedule => {
                trace!(target_id = worker.target_id, op = worker.current_op, deadline, "throttle schedule");
                sleep_until(deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn none_mode_does_not_sleep() {
        let t = Throttle::none();
        let w = Worker::new(0, 0);
        let start = pclk_now();
        t.before_io(&w, 0);
        assert!(pclk_now() - start < crate::clock::duration_to_pclk(Duration::from_millis(20)));
    }

    #[test]
    fn schedule_mode_sleeps_until_deadline() {
        let t = Throttle::schedule();
        let w = Worker::new(0, 0);
        let deadline = pclk_now() + crate::clock::duration_to_pclk(Duration::from_millis(5));
        t.before_io(&w, deadline);
        assert!(pclk_now() >= deadline);
    }
}
