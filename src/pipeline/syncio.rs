//! Syncio stage: every `period`-th operation, all targets in the run
//! rendezvous on a shared barrier before any of them issues that
//! operation. Grounded on `xdd_syncio_before_io_operation`.
//!
//! Requires a period greater than zero and more than one target in the
//! plan; a single-target run or a zero period is a no-op, matching the
//! original's guard (`syncio > 0 && number_of_targets > 1`).

use crate::barrier::BarrierPair;
use crate::worker::Worker;

pub struct Syncio {
    pub period: u64,
    barrier: BarrierPair,
}

impl Syncio {
    /// `parties` is the number of targets participating in the run.
    pub fn new(period: u64, parties: usize) -> Option<Self> {
        if period == 0 || parties <= 1 {
            return None;
        }
        Some(Self {
            period,
            barrier: BarrierPair::new(parties),
        })
    }

    /// Rendezvous point reached before every operation; only actually
    /// blocks when `current_op % period == 0`.
    pub fn before_io(&self, worker: &mut Worker) {
        if worker.current_op % self.period != 0 {
            return;
        }
        let idx = worker.toggle_barrier_index();
        self.barrier.enter(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_period_disables_syncio() {
        assert!(Syncio::new(0, 4).is_none());
    }

    #[test]
    fn single_target_disables_syncio() {
        assert!(Syncio::new(10, 1).is_none());
    }

    #[test]
    fn all_targets_rendezvous_on_period_boundary() {
        let syncio = Arc::new(Syncio::new(2, 3).unwrap());
        let mut handles = Vec::new();
        for t in 0..3u32 {
            let s = Arc::clone(&syncio);
            handles.push(thread::spawn(move || {
                let mut worker = Worker::new(t, 0);
                worker.current_op = 2;
                s.before_io(&mut worker);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
