//! Blocking TCP transport for the RAW message-passing and E2E channels.
//!
//! Grounded on `harborgrid-justin-rusty-db/src/networking/transport/tcp.rs`'s
//! `configure_socket` (TCP_NODELAY, explicit send/recv buffer sizes via
//! `socket2::SockRef`) — reworked from that file's async `tokio::net::TcpStream`
//! onto a blocking `std::net::TcpStream`, since section 5 of the spec rules
//! out an event loop in favor of one OS thread per worker.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::SockRef;

use crate::error::{Result, XddError};
use crate::pipeline::e2e::E2eSource;
use crate::pipeline::raw::RawMessageSource;
use crate::wire::{FrameHeader, HEADER_LEN};

/// Matches the teacher's `TcpConfig` defaults for buffer sizing; xdd-class
/// transfers are bulk, not latency-sensitive request/response, so the
/// buffers are sized up from the teacher's 256 KiB.
const SEND_BUFFER_BYTES: usize = 1 << 20;
const RECV_BUFFER_BYTES: usize = 1 << 20;

fn configure_socket(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    sock.set_send_buffer_size(SEND_BUFFER_BYTES)?;
    sock.set_recv_buffer_size(RECV_BUFFER_BYTES)?;
    Ok(())
}

/// One end of a framed TCP channel carrying [`FrameHeader`]s (and, for the
/// E2E source side, the payload that follows each header). One instance is
/// created per worker so each queue slot owns its socket exclusively, per
/// section 5's "file descriptors and sockets are owned exclusively by their
/// worker thread".
pub struct TcpFrameChannel {
    stream: TcpStream,
}

impl TcpFrameChannel {
    /// Connects out to `addr` (the E2E-source or RAW-writer role dials the
    /// listening destination/reader).
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        configure_socket(&stream)?;
        Ok(Self { stream })
    }

    /// Binds `addr` and accepts exactly one connection per call, so a
    /// destination/reader with `queue_depth` workers calls this
    /// `queue_depth` times against fresh ephemeral ports, or repeatedly
    /// against one well-known port if the source connects sequentially.
    pub fn accept_one<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let (stream, _peer) = listener.accept()?;
        configure_socket(&stream)?;
        Ok(Self { stream })
    }

    /// Binds once and accepts `count` connections, for a destination target
    /// whose `queue_depth` workers each need their own socket.
    pub fn accept_many<A: ToSocketAddrs>(addr: A, count: usize) -> Result<Vec<Self>> {
        let listener = TcpListener::bind(addr)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let (stream, _peer) = listener.accept()?;
            configure_socket(&stream)?;
            out.push(Self { stream });
        }
        Ok(out)
    }

    /// Connects `count` times to `addr`, for a source target whose
    /// `queue_depth` workers each dial the destination independently.
    pub fn connect_many<A: ToSocketAddrs + Copy>(addr: A, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::connect(addr)).collect()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Sends a frame header followed by `payload` (empty for RAW
    /// notifications, which carry no payload per section 6).
    pub fn send_frame(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        self.stream.write_all(&header.encode())?;
        if !payload.is_empty() {
            self.stream.write_all(payload)?;
        }
        Ok(())
    }

    /// Reads one frame header off the wire. Does not read the payload:
    /// the caller issues the actual storage read/write of `header.length`
    /// bytes itself, per the "core exposes read/write, not their buffer
    /// management" scope boundary (section 1).
    pub fn recv_frame(&mut self) -> Result<FrameHeader> {
        let mut buf = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                XddError::Protocol("peer closed the frame channel".to_string())
            } else {
                XddError::Io(e)
            }
        })?;
        FrameHeader::decode(&buf)
    }

    /// Reads `len` bytes of payload following a header already consumed by
    /// [`E2eSource::recv`]. E2E is the only channel whose frames carry a
    /// payload; RAW notifications are header-only (section 6).
    pub fn recv_payload(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl RawMessageSource for TcpFrameChannel {
    fn recv(&self) -> std::io::Result<FrameHeader> {
        // `recv_frame` only needs `&mut self` for buffering state internal
        // to the read syscalls; the socket itself tolerates concurrent
        // reads from one caller at a time, which is all RAW's single
        // reader thread ever does. A `Mutex`-free `Cell`-style interior
        // mutability would work too, but `TcpStream::read_exact` on `&self`
        // is not available, so callers go through `recv_frame_locked`.
        self.recv_frame_locked()
    }
}

impl E2eSource for TcpFrameChannel {
    fn recv(&self) -> std::io::Result<FrameHeader> {
        self.recv_frame_locked()
    }
}

impl TcpFrameChannel {
    /// `&self`-taking wrapper so this type can satisfy the pipeline's
    /// `RawMessageSource`/`E2eSource` traits (both receive-only, called
    /// from exactly one worker thread, so the `UnsafeCell`-free clone of
    /// the underlying fd is the simplest correct option).
    fn recv_frame_locked(&self) -> std::io::Result<FrameHeader> {
        let mut stream = self.stream.try_clone()?;
        let mut buf = [0u8; HEADER_LEN];
        stream.read_exact(&mut buf)?;
        FrameHeader::decode(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}
