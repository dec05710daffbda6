//! Client connection seam for the stream registry
//!
//! The registry only needs non-blocking writes and a stable identity per
//! connection; everything TCP-specific stays behind [`ClientConn`].

use std::io;
use std::os::fd::AsRawFd;

use tokio::net::TcpStream;

/// A streaming client's transport
///
/// `try_write` must never block: it returns how many bytes the transport
/// accepted, or `WouldBlock` when the socket buffer is full. Closing
/// happens on drop.
pub trait ClientConn: Send {
    /// Stable identity for duplicate detection, unique among live
    /// connections
    fn id(&self) -> u64;

    /// Non-blocking write; `Ok(n)` bytes accepted, `WouldBlock` when the
    /// peer is not draining
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// TCP transport for a streaming client
///
/// Owns the raw stream after the HTTP request head has been consumed; the
/// registry writes the multipart response directly.
pub struct TcpConn {
    stream: TcpStream,
}

impl TcpConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl ClientConn for TcpConn {
    fn id(&self) -> u64 {
        self.stream.as_raw_fd() as u64
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }
}
