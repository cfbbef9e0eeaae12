//! E2E (end-to-end) stage: the destination side of a socket-streamed
//! target receives a frame header before each operation, validates its
//! sequence number, shrinks the operation's size to match a short final
//! frame, and recognizes the `MAGIQ` end-of-transmission sentinel.
//!
//! Grounded on `xdd_e2e_before_io_operation`.

use tracing::trace;

use crate::error::{Result, XddError};
use crate::wire::FrameHeader;
use crate::worker::Worker;

pub trait E2eSource: Send + Sync {
    fn recv(&self) -> std::io::Result<FrameHeader>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum E2eOutcome {
    Continue,
    EndOfTransmission,
}

/// Runs the E2E stage for a destination `worker`. A frame whose sequence
/// doesn't match the expected next operation is a hard protocol error —
/// unlike RAW's stale-message tolerance, E2E frames are expected to
/// arrive in order because they ride the same ordered stream as the
/// payload they precede.
///
/// `is_last_op` must be true only when this is the pass's final
/// operation (`current_op == target_ops - 1`): a short frame shrinks
/// `current_iosize` only there (section 4.7 step 9). A short frame
/// received mid-stream is left alone; only the last frame of a pass is
/// expected to be a short tail.
pub fn before_io(worker: &mut Worker, source: &dyn E2eSource, is_last_op: bool) -> Result<E2eOutcome> {
    let header = source.recv()?;

    if header.is_end_of_transmission() {
        trace!(target_id = worker.target_id, "E2E end-of-transmission received");
        return Ok(E2eOutcome::EndOfTransmission);
    }

    if header.sequence != worker.current_op {
        return Err(XddError::Protocol(format!(
            "E2E sequence mismatch on target {}: expected {}, got {}",
            worker.target_id, worker.current_op, header.sequence
        )));
    }

    worker.current_byte_location = header.location;
    if is_last_op && header.length < worker.current_iosize {
        trace!(
            target_id = worker.target_id,
            requested = worker.current_iosize,
            actual = header.length,
            "shrinking short E2E tail operation"
        );
        worker.current_iosize = header.length;
    }

    Ok(E2eOutcome::Continue)
}
