//! Lockstep coordinator: couples a master target to a slave target so the
//! slave only performs a bounded batch of operations ("tasks") each time
//! the master crosses an interval threshold.
//!
//! Grounded on `xdd_lockstep_before_io_operation` in the original source,
//! the most involved of the pre-issue stages. The original protects the
//! shared task counter and state flags with a mutex, then rendezvouses
//! master and slave on a barrier *after* releasing that mutex — holding
//! the mutex across the barrier wait would deadlock the pair on the first
//! round, since the barrier wait only returns once both sides have
//! arrived. That release-then-barrier ordering is preserved here.
//!
//! The barrier round index lives on this block, not on either side's
//! worker: `io_loop_before_io_operation.c:215,287,301,314` toggles
//! `Lock_Step_Barrier_Master_Index`/`..._Slave_Index` only immediately
//! after an actual barrier entry, so the two sides' views of "which round
//! is this" never drift apart. A worker-local index derived from that
//! worker's own op count would desync: the master and slave op counters
//! advance at different rates (scenario 3 runs the master through 1000
//! ops while the slave paces far behind), so `master_op % 2` and
//! `slave_op % 2` would disagree by the time either side actually reached
//! the barrier, and each would block on a different one of the pair's two
//! physical barriers forever.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::barrier::BarrierPair;
use crate::clock::pclk_now;
use crate::target::Target;

#[derive(Debug, Clone, Copy)]
pub enum LockstepInterval {
    Time(u128),
    Op(u64),
    /// Ping once the master crosses each successive `pct` bucket of its
    /// target operations. Intentionally a bucket counter, not a true
    /// percentage: see [`LockstepBlock::interval_elapsed`].
    Percent(u8),
    Bytes(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MasterState {
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlaveState {
    Idle,
    Waiting,
}

struct LockstepState {
    task_counter: u64,
    master: MasterState,
    slave: SlaveState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockstepOutcome {
    /// Proceed with this operation as normal.
    Continue,
    /// This worker's pass ends now: ring the pass-complete flag and stop
    /// issuing I/O, without treating it as an error.
    Terminate,
}

/// Shared between a master target and its slave. Both targets' `Target`
/// hold an `Arc` to the same block via indices resolved by the plan
/// builder; whichever side calls `before_io` identifies itself via
/// `is_master`.
pub struct LockstepBlock {
    pub master_id: u32,
    pub slave_id: u32,
    pub interval: LockstepInterval,
    /// Number of operations the slave performs per master ping.
    pub tasks_per_ping: u64,

    state: Mutex<LockstepState>,
    /// Retained so a slave blocked on a task-available wait (as opposed to
    /// the barrier itself) wakes promptly; the barrier is what actually
    /// pairs a release with the thread it releases.
    slave_ready: Condvar,
    barrier: BarrierPair,
    /// The single round index both sides read before entering the
    /// barrier. Written only by whichever side performs a release (the
    /// master on a ping, or either side via `master_finished`), and only
    /// immediately after that side's own `barrier.enter` call returns —
    /// never derived from a per-op counter.
    barrier_index: AtomicUsize,
    /// Bucket index for a `Percent` interval, starting at 1 and advancing
    /// by one every time the current bucket's threshold is crossed. Not
    /// used by the other `LockstepInterval` variants.
    percent_base: AtomicU64,
}

impl LockstepBlock {
    pub fn new(master_id: u32, slave_id: u32, interval: LockstepInterval, tasks_per_ping: u64) -> Self {
        Self {
            master_id,
            slave_id,
            interval,
            tasks_per_ping,
            state: Mutex::new(LockstepState {
                task_counter: 0,
                master: MasterState::Running,
                slave: SlaveState::Idle,
            }),
            slave_ready: Condvar::new(),
            barrier: BarrierPair::new(2),
            barrier_index: AtomicUsize::new(0),
            percent_base: AtomicU64::new(1),
        }
    }

    /// `Percent` is intentionally a bucket counter rather than a true,
    /// continuously-updating ratio: `base_value` starts at 1 and advances
    /// by one every time `ops_completed` crosses `pct/100 * base_value *
    /// target_ops`, so a ping can fire more than once as the master's run
    /// progresses through successive `pct`-sized buckets.
    fn interval_elapsed(&self, master: &Target) -> bool {
        match self.interval {
            LockstepInterval::Time(threshold) => {
                let start = master.pass_start_time();
                start != 0 && pclk_now().saturating_sub(start) >= threshold
            }
            LockstepInterval::Op(threshold) => master.ops_completed() % threshold.max(1) == 0 && master.ops_completed() > 0,
            LockstepInterval::Percent(pct) => {
                if master.target_ops == 0 {
                    false
                } else {
                    let base = self.percent_base.load(Ordering::Acquire);
                    let threshold = (pct as u64) * base * master.target_ops / 100;
                    if master.ops_completed() >= threshold {
                        self.percent_base.fetch_add(1, Ordering::AcqRel);
                        true
                    } else {
                        false
                    }
                }
            }
            LockstepInterval::Bytes(threshold) => master.bytes_completed() % threshold.max(1) == 0 && master.bytes_completed() > 0,
        }
    }

    /// Enters the barrier at the current shared round index, then
    /// advances that index by one. Only called by a side that has just
    /// confirmed, under the mutex, that its peer is genuinely blocked on
    /// the other side of this same round — never on a ping/notify that
    /// the peer hasn't actually parked on the barrier for.
    fn release_peer(&self) {
        let idx = self.barrier_index.load(Ordering::Acquire);
        self.barrier.enter(idx);
        self.barrier_index.fetch_xor(1, Ordering::AcqRel);
    }

    /// Master side: pings the slave with one more task batch once the
    /// configured interval has elapsed since the last ping. Only enters
    /// the barrier (section 4.4's "if the slave is marked SLAVE_WAITING")
    /// when the slave is actually blocked there waiting for this ping;
    /// otherwise the slave will observe the incremented counter on its
    /// own next check without any rendezvous.
    pub fn before_io_master(&self, master: &Target) -> LockstepOutcome {
        if !self.interval_elapsed(master) {
            return LockstepOutcome::Continue;
        }
        let slave_is_blocked = {
            let mut state = self.state.lock();
            state.task_counter += self.tasks_per_ping;
            if state.slave == SlaveState::Waiting {
                state.slave = SlaveState::Idle;
                true
            } else {
                self.slave_ready.notify_all();
                false
            }
        };
        if slave_is_blocked {
            self.release_peer();
        }
        LockstepOutcome::Continue
    }

    /// Slave side: consumes a task immediately if one is already
    /// available; otherwise marks itself waiting and blocks on the shared
    /// barrier until the master's next ping (or `master_finished`)
    /// releases it. Returns `Terminate` once the master has finished and
    /// no tasks remain.
    pub fn before_io_slave(&self) -> LockstepOutcome {
        loop {
            let mut state = self.state.lock();
            if state.task_counter > 0 {
                state.task_counter -= 1;
                return LockstepOutcome::Continue;
            }
            if state.master == MasterState::Finished {
                return LockstepOutcome::Terminate;
            }
            state.slave = SlaveState::Waiting;
            drop(state);
            self.release_peer();
            // Released: either the master pinged (task_counter > 0 now)
            // or master_finished ran (master == Finished now). Loop back
            // to re-check both under the lock.
        }
    }

    /// Called by the master once its own pass is complete, so any slave
    /// still waiting on a ping is released with `Terminate` rather than
    /// blocking forever on the barrier.
    pub fn master_finished(&self) {
        let slave_is_blocked = {
            let mut state = self.state.lock();
            state.master = MasterState::Finished;
            self.slave_ready.notify_all();
            if state.slave == SlaveState::Waiting {
                state.slave = SlaveState::Idle;
                true
            } else {
                false
            }
        };
        if slave_is_blocked {
            self.release_peer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{self, PipelineContext};
    use crate::worker::Worker;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    #[allow(clippy::too_many_arguments)]
    fn target_with_lockstep(id: u32, ops: u64, lockstep: Arc<LockstepBlock>) -> Target {
        Target::new(
            id,
            PathBuf::from(format!("/tmp/xddr-lockstep-{id}")),
            4096,
            1,
            ops,
            ops * 4096,
            1,
            0,
            1,
            crate::target::TargetOptions::empty(),
            (0..ops)
                .map(|i| crate::target::SeekEntry {
                    operation: crate::target::OpKind::Write,
                    block_location: i,
                    time1: 0,
                })
                .collect(),
            0,
            None,
            Some(lockstep),
            crate::pipeline::throttle::Throttle::none(),
        )
        .unwrap()
    }

    #[test]
    fn slave_consumes_a_task_already_available_without_blocking() {
        let block = Arc::new(LockstepBlock::new(0, 1, LockstepInterval::Op(1), 3));
        {
            let mut s = block.state.lock();
            s.task_counter = 1;
        }
        assert_eq!(block.before_io_slave(), LockstepOutcome::Continue);
        assert_eq!(block.state.lock().task_counter, 0);
    }

    #[test]
    fn slave_waits_then_is_released_by_a_master_ping() {
        let block = Arc::new(LockstepBlock::new(0, 1, LockstepInterval::Op(1), 1));
        let b = Arc::clone(&block);
        let slave = thread::spawn(move || b.before_io_slave());

        // Give the slave time to mark itself waiting and park on the
        // barrier before pinging it exactly as before_io_master would.
        thread::sleep(Duration::from_millis(20));
        let slave_is_blocked = {
            let mut state = block.state.lock();
            state.task_counter += 1;
            if state.slave == SlaveState::Waiting {
                state.slave = SlaveState::Idle;
                true
            } else {
                false
            }
        };
        assert!(slave_is_blocked);
        block.release_peer();

        assert_eq!(slave.join().unwrap(), LockstepOutcome::Continue);
        assert_eq!(block.state.lock().task_counter, 0);
    }

    #[test]
    fn percent_interval_pings_once_per_bucket_crossed() {
        let block = LockstepBlock::new(0, 1, LockstepInterval::Percent(25), 1);
        let master = crate::target::Target::new(
            0,
            std::path::PathBuf::from("/tmp/x"),
            4096,
            1,
            10,
            40960,
            1,
            0,
            1,
            crate::target::TargetOptions::empty(),
            (0..10)
                .map(|i| crate::target::SeekEntry {
                    operation: crate::target::OpKind::Write,
                    block_location: i,
                    time1: 0,
                })
                .collect(),
            0,
            None,
            None::<Arc<LockstepBlock>>,
            crate::pipeline::throttle::Throttle::none(),
        )
        .unwrap();

        assert!(!block.interval_elapsed(&master));

        for _ in 0..2 {
            master.record_completion(4096);
        }
        assert!(block.interval_elapsed(&master));
        assert!(!block.interval_elapsed(&master));

        for _ in 0..3 {
            master.record_completion(4096);
        }
        assert!(block.interval_elapsed(&master));
    }

    #[test]
    fn master_finished_releases_blocked_slave() {
        let block = Arc::new(LockstepBlock::new(0, 1, LockstepInterval::Op(1), 1));
        let b = Arc::clone(&block);
        let slave = thread::spawn(move || b.before_io_slave());
        thread::sleep(Duration::from_millis(20));
        block.master_finished();
        assert_eq!(slave.join().unwrap(), LockstepOutcome::Terminate);
    }

    /// Scenario 3 (master/slave pacing) driven through the real pipeline
    /// driver — `pipeline::run_before_io` — on two threads sharing one
    /// `LockstepBlock`, rather than hand-rolling matched barrier indices
    /// on each side. The master pings once per op it completes
    /// (`Op(1)`, one task per ping) and runs at full speed; the slave
    /// must consume exactly as many tasks as the master issued pings,
    /// without either side deadlocking on a barrier-index mismatch.
    #[test]
    fn pipeline_driver_lockstep_master_and_slave_never_deadlock() {
        const OPS: u64 = 25;

        let block = Arc::new(LockstepBlock::new(0, 1, LockstepInterval::Op(1), 1));
        let master_target = Arc::new(target_with_lockstep(0, OPS, Arc::clone(&block)));
        let slave_target = Arc::new(target_with_lockstep(1, OPS, Arc::clone(&block)));

        let master_handle = {
            let master_target = Arc::clone(&master_target);
            let block = Arc::clone(&block);
            thread::spawn(move || {
                let mut worker = Worker::new(0, 0);
                let ctx = PipelineContext {
                    syncio: None,
                    triggeree: None,
                    is_lockstep_master: true,
                    raw_mode: None,
                    e2e_source: None,
                    timestamp: None,
                    opener: None,
                };
                for op in 0..OPS {
                    worker.current_op = op;
                    let outcome = pipeline::run_before_io(&mut worker, &master_target, &ctx).unwrap();
                    assert_eq!(outcome, pipeline::PipelineOutcome::Proceed);
                    master_target.record_completion(4096);
                }
                block.master_finished();
            })
        };

        let slave_handle = {
            let slave_target = Arc::clone(&slave_target);
            thread::spawn(move || {
                let mut worker = Worker::new(1, 0);
                let ctx = PipelineContext {
                    syncio: None,
                    triggeree: None,
                    is_lockstep_master: false,
                    raw_mode: None,
                    e2e_source: None,
                    timestamp: None,
                    opener: None,
                };
                let mut consumed = 0u64;
                loop {
                    let outcome = pipeline::run_before_io(&mut worker, &slave_target, &ctx).unwrap();
                    match outcome {
                        pipeline::PipelineOutcome::Proceed => {
                            consumed += 1;
                            worker.current_op += 1;
                        }
                        pipeline::PipelineOutcome::EndPass => break,
                        pipeline::PipelineOutcome::Restart => continue,
                    }
                }
                consumed
            })
        };

        master_handle.join().unwrap();
        let consumed = slave_handle.join().unwrap();
        assert_eq!(consumed, OPS);
    }
}
