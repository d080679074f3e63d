use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use crate::{Adapter, ConnId, InputEvent};

/// Bytes of buffered, not-yet-written output the demo is willing to hold
/// before reporting zero `conn_bufspace`. Purely a demo knob, not a protocol
/// parameter.
const STDOUT_CAP: usize = 64 * 1024;

/// A single-peer, non-blocking `UdpSocket` adapter standing in for a real
/// deployment's datagram service, plus a pair of byte queues standing in for
/// stdin/stdout. Built to let `bin/sender.rs`/`bin/receiver.rs` run end to
/// end; not exercised by the core's own test suite.
pub struct UdpAdapter {
    socket: UdpSocket,
    peer: SocketAddr,
    stdin_buf: VecDeque<u8>,
    stdin_eof: bool,
    stdout_buf: Vec<u8>,
}

impl UdpAdapter {
    pub const MAX_SEG_DATA_SIZE: usize = 512;

    pub fn bind(local: SocketAddr, peer: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            peer,
            stdin_buf: VecDeque::new(),
            stdin_eof: false,
            stdout_buf: Vec::new(),
        })
    }

    /// Feeds bytes the host has already read from its real stdin into the
    /// queue the adapter drains from `conn_input`.
    pub fn feed_stdin(&mut self, bytes: &[u8]) {
        self.stdin_buf.extend(bytes.iter().copied());
    }

    pub fn mark_stdin_eof(&mut self) {
        self.stdin_eof = true;
    }

    /// Takes everything written to "stdout" so far, for the host to forward
    /// to the real stdout.
    pub fn take_stdout(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stdout_buf)
    }

    /// Non-blocking poll for an inbound datagram. Returns `None` on
    /// would-block; the host's main loop calls this and hands any `Some`
    /// payload to `Registry::on_datagram`.
    pub fn recv_datagram(&mut self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; UdpAdapter::MAX_SEG_DATA_SIZE + crate::HEADER_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if from != self.peer {
                    log::trace!("udp_adapter: dropping datagram from unexpected peer {from}");
                    return None;
                }
                buf.truncate(n);
                Some(buf)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                log::warn!("udp_adapter: recv_from failed: {e}");
                None
            }
        }
    }
}

impl Adapter for UdpAdapter {
    const MAX_SEG_DATA_SIZE: usize = UdpAdapter::MAX_SEG_DATA_SIZE;

    fn send_datagram(&mut self, _conn: ConnId, buf: &[u8]) -> usize {
        match self.socket.send_to(buf, self.peer) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) => {
                log::warn!("udp_adapter: send_to failed: {e}");
                0
            }
        }
    }

    fn conn_input(&mut self, _conn: ConnId, buf: &mut [u8]) -> InputEvent {
        if self.stdin_buf.is_empty() {
            return if self.stdin_eof {
                InputEvent::Eof
            } else {
                InputEvent::WouldBlock
            };
        }

        let mut n = 0;
        while n < buf.len() {
            let Some(b) = self.stdin_buf.pop_front() else {
                break;
            };
            buf[n] = b;
            n += 1;
        }
        InputEvent::Ready(n)
    }

    fn conn_output(&mut self, _conn: ConnId, buf: &[u8]) -> usize {
        let space = STDOUT_CAP.saturating_sub(self.stdout_buf.len());
        let n = buf.len().min(space);
        self.stdout_buf.extend_from_slice(&buf[..n]);
        n
    }

    fn conn_bufspace(&mut self, _conn: ConnId) -> usize {
        STDOUT_CAP.saturating_sub(self.stdout_buf.len())
    }

    fn conn_remove(&mut self, conn: ConnId) {
        log::info!("udp_adapter: {conn} removed");
    }

    fn end_client(&mut self) {
        log::info!("udp_adapter: last connection ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_datagram_over_loopback() {
        let mut a = UdpAdapter::bind("127.0.0.1:0".parse().unwrap(), "127.0.0.1:1".parse().unwrap()).unwrap();
        let a_addr = a.socket.local_addr().unwrap();
        let mut b = UdpAdapter::bind("127.0.0.1:0".parse().unwrap(), a_addr).unwrap();
        let b_addr = b.socket.local_addr().unwrap();
        a.peer = b_addr;

        let id = ConnId::from_raw(0);
        Adapter::send_datagram(&mut a, id, b"hello");

        let mut received = None;
        for _ in 0..100 {
            if let Some(buf) = b.recv_datagram() {
                received = Some(buf);
                break;
            }
            std::thread::yield_now();
        }
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn conn_input_reports_would_block_then_ready_then_eof() {
        let mut a = UdpAdapter::bind("127.0.0.1:0".parse().unwrap(), "127.0.0.1:1".parse().unwrap()).unwrap();
        let id = ConnId::from_raw(0);
        let mut buf = [0u8; 8];
        assert_eq!(Adapter::conn_input(&mut a, id, &mut buf), InputEvent::WouldBlock);

        a.feed_stdin(b"hi");
        assert_eq!(Adapter::conn_input(&mut a, id, &mut buf), InputEvent::Ready(2));

        a.mark_stdin_eof();
        assert_eq!(Adapter::conn_input(&mut a, id, &mut buf), InputEvent::Eof);
    }
}
