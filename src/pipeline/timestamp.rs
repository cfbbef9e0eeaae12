//! Timestamp recorder: an optional bounded ring buffer of per-operation
//! timing samples, armed by one of a few trigger conditions so that only
//! the interesting window of a pass is recorded instead of its entirety.
//!
//! Grounded on `xdd_ts_before_io_operation`.

use parking_lot::Mutex;

use crate::clock::{pclk_now, Pclk};
use crate::target::OpKind;

/// When timestamp collection turns on for a target.
#[derive(Debug, Clone, Copy)]
pub enum ArmCondition {
    /// Record from the first operation of the pass onward.
    All,
    /// Record once the pass has been running for at least this long.
    TrigTime(Pclk),
    /// Record starting at this operation number.
    TrigOp(u64),
}

/// One recorded operation: the seek entry's kind, the pass it belongs to,
/// the byte location it targets, its op number within the pass, and the
/// timestamp it was issued at (section 3's Timestamp Ring data model).
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub op_kind: OpKind,
    pub pass_number: u8,
    pub byte_location: u64,
    pub op: u64,
    pub issued_at: Pclk,
}

struct RingState {
    armed: bool,
    samples: Vec<Sample>,
}

pub struct TimestampRecorder {
    condition: ArmCondition,
    capacity: usize,
    state: Mutex<RingState>,
}

impl TimestampRecorder {
    pub fn new(condition: ArmCondition, capacity: usize) -> Self {
        Self {
            condition,
            capacity,
            state: Mutex::new(RingState {
                armed: matches!(condition, ArmCondition::All),
                samples: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Checks whether `op` should start recording, and if armed (now or
    /// already), appends a sample for it. Arming is sticky: once set, it
    /// never turns back off for the rest of the pass.
    #[allow(clippy::too_many_arguments)]
    pub fn before_io(&self, op_kind: OpKind, pass_number: u8, byte_location: u64, op: u64, pass_start: Pclk) {
        let mut state = self.state.lock();
        if !state.armed {
            state.armed = match self.condition {
                ArmCondition::All => true,
                ArmCondition::TrigTime(threshold) => pass_start != 0 && pclk_now().saturating_sub(pass_start) >= threshold,
                ArmCondition::TrigOp(threshold) => op >= threshold,
            };
        }
        if !state.armed {
            return;
        }
        if state.samples.len() >= self.capacity {
            return;
        }
        state.samples.push(Sample {
            op_kind,
            pass_number,
            byte_location,
            op,
            issued_at: pclk_now(),
        });
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.state.lock().samples.clone()
    }

    pub fn reset_for_new_pass(&self) {
        let mut state = self.state.lock();
        state.armed = matches!(self.condition, ArmCondition::All);
        state.samples.clear();
    }
}
