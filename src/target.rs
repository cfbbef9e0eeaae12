//! Target descriptor: static configuration plus the mutable per-pass
//! counters shared across a target's workers and read by other targets'
//! trigger/lockstep logic.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::Pclk;
use crate::error::{Result, XddError};
use crate::pipeline::lockstep::LockstepBlock;
use crate::pipeline::trigger::TriggerBlock;
use crate::pipeline::throttle::Throttle;

bitflags::bitflags! {
    /// Per-target option flags (`TO_*` in the original tool).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TargetOptions: u32 {
        const DIO              = 0b0000_0001;
        const SGIO              = 0b0000_0010;
        const RAW_READER        = 0b0000_0100;
        const RAW_WRITER        = 0b0000_1000;
        const E2E_SOURCE        = 0b0001_0000;
        const E2E_DESTINATION   = 0b0010_0000;
        const WAIT_FOR_START    = 0b0100_0000;
        const NO_SEEK           = 0b1000_0000;
    }
}

/// `run_status` as described in section 3 of the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunStatus {
    NotStarted = 0,
    Running = 1,
    Finished = 2,
}

impl From<u8> for RunStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => RunStatus::NotStarted,
            1 => RunStatus::Running,
            _ => RunStatus::Finished,
        }
    }
}

/// One entry of a target's seek table: the block to visit for a given op
/// and the kind of operation (read or write) recorded there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
pub struct SeekEntry {
    pub operation: OpKind,
    pub block_location: u64,
    /// Scheduled relative-to-pass-start issue time, used by the throttle
    /// stage's IOPS/bandwidth mode (`seeks[op].time1` in the original).
    pub time1: Pclk,
}

/// Static configuration plus mutable per-pass counters for one target.
pub struct Target {
    pub id: u32,
    pub path: PathBuf,
    pub block_size: u64,
    pub request_size: u64,
    pub target_ops: u64,
    pub bytes_to_xfer_per_pass: u64,
    pub queue_depth: usize,
    pub start_offset: u64,
    pub passes: u32,
    pub seek_table: Vec<SeekEntry>,
    pub last_iosize: u64,

    options: RwLock<TargetOptions>,
    run_status: AtomicU8,
    pass_start_time: RwLock<Pclk>,
    pass_number: AtomicU8,
    abort: AtomicBool,

    pub syncio_barrier_index: AtomicU8,

    /// Operations completed so far this pass, visible to other targets'
    /// trigger and lockstep logic.
    ops_completed: AtomicU64,
    /// Bytes transferred so far this pass, same visibility rationale.
    bytes_completed: AtomicU64,

    pub trigger: Option<TriggerBlock>,
    /// Shared with this target's lockstep partner: both sides must observe
    /// the same task counter, state flags, and barrier pair (section 3's
    /// Lockstep Block invariants), so the plan builder hands out the same
    /// `Arc` to both the master's and slave's `Target`.
    pub lockstep: Option<Arc<LockstepBlock>>,
    pub throttle: Throttle,
}

impl Target {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        path: PathBuf,
        block_size: u64,
        request_size: u64,
        target_ops: u64,
        bytes_to_xfer_per_pass: u64,
        queue_depth: usize,
        start_offset: u64,
        passes: u32,
        options: TargetOptions,
        seek_table: Vec<SeekEntry>,
        last_iosize: u64,
        trigger: Option<TriggerBlock>,
        lockstep: Option<Arc<LockstepBlock>>,
        throttle: Throttle,
    ) -> Result<Self> {
        let io_size = request_size * block_size;
        if io_size == 0 {
            return Err(XddError::Config(format!(
                "target {id}: io_size must be > 0 (request_size={request_size}, block_size={block_size})"
            )));
        }
        if target_ops * io_size < bytes_to_xfer_per_pass {
            return Err(XddError::Config(format!(
                "target {id}: target_ops * io_size ({}) < bytes_to_xfer_per_pass ({})",
                target_ops * io_size,
                bytes_to_xfer_per_pass
            )));
        }
        if seek_table.len() as u64 != target_ops {
            return Err(XddError::Config(format!(
                "target {id}: seek table length {} does not match target_ops {}",
                seek_table.len(),
                target_ops
            )));
        }

        Ok(Self {
            id,
            path,
            block_size,
            request_size,
            target_ops,
            bytes_to_xfer_per_pass,
            queue_depth,
            start_offset,
            passes,
            seek_table,
            last_iosize,
            options: RwLock::new(options),
            run_status: AtomicU8::new(RunStatus::NotStarted as u8),
            pass_start_time: RwLock::new(0),
            pass_number: AtomicU8::new(0),
            abort: AtomicBool::new(false),
            syncio_barrier_index: AtomicU8::new(0),
            ops_completed: AtomicU64::new(0),
            bytes_completed: AtomicU64::new(0),
            trigger,
            lockstep,
            throttle,
        })
    }

    pub fn io_size(&self) -> u64 {
        self.request_size * self.block_size
    }

    pub fn options(&self) -> TargetOptions {
        *self.options.read()
    }

    pub fn clear_option(&self, flag: TargetOptions) {
        self.options.write().remove(flag);
    }

    pub fn set_option(&self, flag: TargetOptions) {
        self.options.write().insert(flag);
    }

    pub fn run_status(&self) -> RunStatus {
        RunStatus::from(self.run_status.load(Ordering::Acquire))
    }

    pub fn set_run_status(&self, status: RunStatus) {
        self.run_status.store(status as u8, Ordering::Release);
    }

    pub fn pass_start_time(&self) -> Pclk {
        *self.pass_start_time.read()
    }

    pub fn set_pass_start_time(&self, t: Pclk) {
        *self.pass_start_time.write() = t;
    }

    pub fn pass_number(&self) -> u8 {
        self.pass_number.load(Ordering::Acquire)
    }

    pub fn set_pass_number(&self, n: u8) {
        self.pass_number.store(n, Ordering::Release);
    }

    pub fn abort(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn set_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn ops_completed(&self) -> u64 {
        self.ops_completed.load(Ordering::Acquire)
    }

    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Acquire)
    }

    /// Records completion of one operation of `iosize` bytes. Called by
    /// the pipeline driver after an I/O completes successfully.
    pub fn record_completion(&self, iosize: u64) {
        self.ops_completed.fetch_add(1, Ordering::AcqRel);
        self.bytes_completed.fetch_add(iosize, Ordering::AcqRel);
    }

    /// Computes `current_byte_location` for `op`, honouring the no-seek
    /// policy (section 4.1 stage 4 / section 3 invariants).
    pub fn byte_location_for_op(&self, op: u64) -> u64 {
        let opts = self.options();
        let seek_op = if opts.contains(TargetOptions::NO_SEEK) {
            0
        } else {
            op
        };
        let block = self.seek_table[seek_op as usize].block_location;
        (self.id as u64 * self.start_offset + block) * self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::throttle::Throttle;

    fn seek_table(n: u64) -> Vec<SeekEntry> {
        (0..n)
            .map(|i| SeekEntry {
                operation: OpKind::Write,
                block_location: i,
                time1: 0,
            })
            .collect()
    }

    fn make_target(id: u32, ops: u64, no_seek: bool) -> Target {
        let opts = if no_seek {
            TargetOptions::NO_SEEK
        } else {
            TargetOptions::empty()
        };
        Target::new(
            id,
            PathBuf::from("/tmp/x"),
            4096,
            1,
            ops,
            ops * 4096,
            1,
            10,
            1,
            opts,
            seek_table(ops),
            0,
            None,
            None,
            Throttle::none(),
        )
        .unwrap()
    }

    #[test]
    fn io_size_must_be_positive() {
        let err = Target::new(
            0,
            PathBuf::from("/tmp/x"),
            0,
            1,
            10,
            0,
            1,
            0,
            1,
            TargetOptions::empty(),
            seek_table(10),
            0,
            None,
            None,
            Throttle::none(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn byte_location_matches_invariant() {
        let t = make_target(2, 5, false);
        for op in 0..5 {
            let expected = (2u64 * 10 + op) * 4096;
            assert_eq!(t.byte_location_for_op(op), expected);
        }
    }

    #[test]
    fn no_seek_policy_pins_to_first_block() {
        let t = make_target(1, 5, true);
        for op in 0..5 {
            assert_eq!(t.byte_location_for_op(op), t.byte_location_for_op(0));
        }
    }
}
