//! RAW (read-after-write) stage: a reader target either polls the
//! backing file's size via `fstat` until the writer has caught up
//! (FILE-STAT-POLL mode) or waits for an explicit notification message
//! carrying the writer's progress (MESSAGE-PASSING mode).
//!
//! Grounded on `xdd_raw_before_io_operation`.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::Result;
use crate::wire::FrameHeader;
use crate::worker::Worker;

/// Per-reader RAW bookkeeping: expected message sequence, the previous
/// accepted frame's location/length, and the cumulative `data_ready`
/// byte credit. Grounded on the RAW Block data model (spec section 3).
#[derive(Debug, Clone, Copy)]
pub struct RawReaderState {
    expected_sequence: u64,
    prev_loc: u64,
    prev_len: u64,
    data_ready: u64,
}

impl RawReaderState {
    pub fn new() -> Self {
        Self {
            expected_sequence: 0,
            prev_loc: 0,
            prev_len: 0,
            data_ready: 0,
        }
    }
}

impl Default for RawReaderState {
    fn default() -> Self {
        Self::new()
    }
}

/// How a RAW reader learns the writer's progress.
pub enum RawMode {
    /// Poll the file's size with `fstat` until it covers this op's range.
    FileStatPoll,
    /// Receive framed notifications over a channel/socket.
    MessagePassing(Box<dyn RawMessageSource>),
}

/// Abstracts the notification transport for MESSAGE-PASSING mode so
/// tests can drive it without a real socket.
pub trait RawMessageSource: Send + Sync {
    fn recv(&self) -> std::io::Result<FrameHeader>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[cfg(unix)]
fn file_size(file: &File) -> std::io::Result<u64> {
    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid, open file descriptor for the duration of
    // this call.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstat(fd, &mut st) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(st.st_size as u64)
}

#[cfg(not(unix))]
fn file_size(file: &File) -> std::io::Result<u64> {
    Ok(file.metadata()?.len())
}

/// Blocks `worker` until the writer has produced enough data for its
/// next read, per `mode`. In MESSAGE-PASSING mode this drains notification
/// frames into `worker.raw_state`'s cumulative `data_ready` credit,
/// discarding any frame whose location doesn't advance past the previous
/// one as stale (section 4.6).
pub fn before_io(worker: &mut Worker, mode: &RawMode) -> Result<()> {
    let needed = worker.current_iosize;
    match mode {
        RawMode::FileStatPoll => {
            let target_end = worker.current_byte_location + worker.current_iosize;
            let Some(file) = &worker.file else {
                return Ok(());
            };
            loop {
                let size = file_size(file)?;
                if size >= target_end {
                    return Ok(());
                }
                trace!(target_id = worker.target_id, size, needed = target_end, "RAW poll waiting for writer");
                thread::sleep(POLL_INTERVAL);
            }
        }
        RawMode::MessagePassing(source) => loop {
            let header = source.recv()?;
            if header.length != needed {
                warn!(
                    target_id = worker.target_id,
                    expected = needed,
                    got = header.length,
                    "RAW notification length mismatch"
                );
            }

            let state = &mut worker.raw_state;
            if state.expected_sequence > 0 && header.location <= state.prev_loc {
                trace!(
                    target_id = worker.target_id,
                    location = header.location,
                    prev_loc = state.prev_loc,
                    "dropping stale RAW notification"
                );
                continue;
            }
            if header.sequence != state.expected_sequence {
                warn!(
                    target_id = worker.target_id,
                    expected = state.expected_sequence,
                    got = header.sequence,
                    "out-of-order RAW notification"
                );
                continue;
            }

            if state.expected_sequence == 0 {
                // Prime the baseline on the first frame instead of
                // crediting from location 0: with a nonzero start_offset
                // the first frame's location isn't 0, and crediting the
                // full (location + length) would permanently over-credit
                // data_ready by location bytes.
                state.prev_loc = header.location;
                state.prev_len = 0;
            }
            let data_length = (header.location + header.length).saturating_sub(state.prev_loc + state.prev_len);
            state.data_ready += data_length;
            state.prev_loc = header.location;
            state.prev_len = header.length;
            state.expected_sequence += 1;

            if state.data_ready >= needed {
                state.data_ready -= needed;
                return Ok(());
            }
        },
    }
}
