//! Pre-issue pipeline: the nine ordered stages every operation passes
//! through before a worker is allowed to actually read or write.
//!
//! Grounded on `xdd_io_loop_before_io_operation`, which calls each stage
//! in the same fixed order implemented by [`run_before_io`]: syncio,
//! start trigger, lockstep, seek resolution, DIO, RAW, E2E, timestamp,
//! throttle.

pub mod dio;
pub mod e2e;
pub mod lockstep;
pub mod raw;
pub mod syncio;
pub mod throttle;
pub mod timestamp;
pub mod trigger;

use crate::error::Result;
use crate::io_target::TargetOpener;
use crate::target::Target;
use crate::worker::Worker;

use e2e::{E2eOutcome, E2eSource};
use lockstep::LockstepOutcome;
use raw::RawMode;
use timestamp::TimestampRecorder;
use trigger::TriggerOutcome;

/// What the driver should do after running the pipeline for one op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Issue the operation now.
    Proceed,
    /// The start trigger or lockstep slave isn't ready yet; re-run the
    /// pipeline for this same operation without advancing.
    Restart,
    /// End this worker's pass now, cleanly (lockstep stop or E2E
    /// end-of-transmission), without issuing the pending operation.
    EndPass,
}

/// The optional, per-target collaborators the pipeline stages need. Every
/// field is `None` unless the target's options enable the corresponding
/// stage, so a minimally configured target pays for none of this.
pub struct PipelineContext<'a> {
    pub syncio: Option<&'a syncio::Syncio>,
    pub triggeree: Option<&'a Target>,
    pub is_lockstep_master: bool,
    pub raw_mode: Option<&'a RawMode>,
    pub e2e_source: Option<&'a dyn E2eSource>,
    pub timestamp: Option<&'a TimestampRecorder>,
    pub opener: Option<&'a dyn TargetOpener>,
}

/// Runs all nine pre-issue stages for `worker`'s pending operation
/// against `target`, in the fixed order the original tool uses.
pub fn run_before_io(worker: &mut Worker, target: &Target, ctx: &PipelineContext<'_>) -> Result<PipelineOutcome> {
    if let Some(s) = ctx.syncio {
        s.before_io(worker);
    }

    match trigger::before_io(target, ctx.triggeree) {
        TriggerOutcome::Wait => return Ok(PipelineOutcome::Restart),
        TriggerOutcome::Continue => {}
    }

    if let Some(block) = &target.lockstep {
        let outcome = if ctx.is_lockstep_master {
            block.before_io_master(target)
        } else {
            block.before_io_slave()
        };
        if outcome == LockstepOutcome::Terminate {
            worker.pass_ring = true;
            return Ok(PipelineOutcome::EndPass);
        }
    }

    worker.current_byte_location = target.byte_location_for_op(worker.current_op);
    worker.current_iosize = target.io_size();

    if let Some(opener) = ctx.opener {
        dio::before_io(worker, target, opener)?;
    }

    if let Some(mode) = ctx.raw_mode {
        raw::before_io(worker, mode)?;
    }

    if let Some(source) = ctx.e2e_source {
        let is_last_op = worker.current_op + 1 == target.target_ops;
        if e2e::before_io(worker, source, is_last_op)? == E2eOutcome::EndOfTransmission {
            worker.pass_ring = true;
            return Ok(PipelineOutcome::EndPass);
        }
    }

    if let Some(rec) = ctx.timestamp {
        let seek_entry = &target.seek_table[worker.current_op as usize];
        rec.before_io(
            seek_entry.operation,
            target.pass_number(),
            worker.current_byte_location,
            worker.current_op,
            target.pass_start_time(),
        );
    }

    let schedule_deadline = target
        .pass_start_time()
        .saturating_add(target.seek_table[worker.current_op as usize].time1);
    target.throttle.before_io(worker, schedule_deadline);

    Ok(PipelineOutcome::Proceed)
}
