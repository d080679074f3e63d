use crate::registry::ConnId;

/// Outcome of a non-blocking read from the input byte stream (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// `n` bytes were read into the caller's buffer.
    Ready(usize),
    /// No bytes are available right now; try again on the next input-ready event.
    WouldBlock,
    /// The input stream has ended; no more bytes will ever arrive.
    Eof,
}

/// The host-supplied, non-blocking I/O surface the core drives a connection
/// through (§6). There is exactly one adapter per process in the intended
/// deployment, so the core is generic over `A: Adapter` instead of boxing a
/// trait object.
///
/// This crate does not implement `Adapter` for production use — only the
/// demo [`crate::demo::UdpAdapter`], which is explicitly out of the core's
/// test surface.
pub trait Adapter {
    /// Compile-time maximum payload size this adapter's datagrams can
    /// carry. The core assumes this is stable for the lifetime of every
    /// connection (§6).
    const MAX_SEG_DATA_SIZE: usize;

    /// Sends `buf` as a single datagram to the peer of `conn`. May
    /// partial-write; the core loops until every byte is accepted.
    fn send_datagram(&mut self, conn: ConnId, buf: &[u8]) -> usize;

    /// Non-blocking read from the local input stream.
    fn conn_input(&mut self, conn: ConnId, buf: &mut [u8]) -> InputEvent;

    /// Non-blocking, possibly partial write to the local output stream.
    fn conn_output(&mut self, conn: ConnId, buf: &[u8]) -> usize;

    /// Bytes the output stream will currently accept without blocking.
    fn conn_bufspace(&mut self, conn: ConnId) -> usize;

    /// Notifies the host that `conn` has been destroyed.
    fn conn_remove(&mut self, conn: ConnId);

    /// Notifies the host that the last known connection has ended.
    fn end_client(&mut self);
}
