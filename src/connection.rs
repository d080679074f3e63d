use crate::adapter::{Adapter, InputEvent};
use crate::config::Config;
use crate::recv::RecvBuffer;
use crate::registry::ConnId;
use crate::send::SendBuffer;
use crate::teardown::TeardownState;
use crate::timer::{RetransmitTimer, TickOutcome};
use crate::wire::{self, Flags, Segment};

/// Test-harness convention (§4.2): a chunk beginning with this sentinel
/// signals a truncated read and ends the input pass without being enqueued.
const TRUNCATE_SENTINEL: &[u8] = b"###truncate###";

/// The per-connection protocol engine: everything in §3's "Connection
/// state" plus the logic that binds it to the four external triggers.
/// `send_window_used`/`rcv_window_used` are not stored fields — they are
/// derived from `tx`/`rx` so invariants 1 and 2 hold by construction rather
/// than by careful bookkeeping at every call site.
#[derive(Debug)]
pub(crate) struct Connection {
    id: ConnId,
    seqno: u32,
    next_seqno: u32,
    ackno: u32,
    last_ackno: u32,
    send_window: u16,
    rcv_window: u16,
    tx: SendBuffer,
    rx: RecvBuffer,
    timer: RetransmitTimer,
    teardown: TeardownState,
    /// Seqno consumed by our own outstanding FIN, if one has been sent and
    /// not yet acknowledged. FINs carry an empty payload so they are never
    /// represented as a `tx` entry.
    sent_fin_seqno: Option<u32>,
}

impl Connection {
    pub(crate) fn new(id: ConnId, config: Config) -> Self {
        Self {
            id,
            seqno: 1,
            next_seqno: 1,
            ackno: 1,
            last_ackno: 0,
            send_window: config.send_window,
            rcv_window: config.recv_window,
            tx: SendBuffer::new(),
            rx: RecvBuffer::new(),
            timer: RetransmitTimer::new(config.ticks_per_rto()),
            teardown: TeardownState::Idle,
            sent_fin_seqno: None,
        }
    }

    // `ackno` starts at 1, mirroring `seqno`'s starting point, so the first
    // in-order check (`seg.seqno == self.ackno`) passes for a peer's very
    // first byte. `last_ackno` stays at 0, a value no real segment can carry.

    #[cfg(test)]
    pub(crate) fn seqno(&self) -> u32 {
        self.seqno
    }

    #[cfg(test)]
    pub(crate) fn next_seqno(&self) -> u32 {
        self.next_seqno
    }

    #[cfg(test)]
    pub(crate) fn ackno(&self) -> u32 {
        self.ackno
    }

    #[cfg(test)]
    pub(crate) fn is_idle_teardown(&self) -> bool {
        self.teardown.is_idle()
    }

    #[cfg(test)]
    pub(crate) fn tx_is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn timer_enabled(&self) -> bool {
        self.timer.is_enabled()
    }

    fn rcv_window_used(&self) -> u16 {
        self.rx.used_bytes() as u16
    }

    fn send_window_used(&self) -> u16 {
        self.tx.total_len() as u16
    }

    /// Checks invariants 1 and 2 from §3; used only by tests, since they
    /// hold by construction in the non-test build.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert!(self.seqno <= self.next_seqno || self.next_seqno.wrapping_sub(self.seqno) < (1 << 31));
        assert_eq!(
            self.next_seqno.wrapping_sub(self.seqno),
            self.send_window_used() as u32
        );
    }

    fn advertised_window<A: Adapter>(&self) -> u16 {
        let seg = A::MAX_SEG_DATA_SIZE as u16;
        if seg == 0 {
            return 0;
        }
        let available = self.rcv_window.saturating_sub(self.rcv_window_used());
        (available / seg) * seg
    }

    fn send_all<A: Adapter>(io: &mut A, conn: ConnId, buf: &[u8]) {
        let mut remaining = buf;
        while !remaining.is_empty() {
            let n = io.send_datagram(conn, remaining);
            if n == 0 {
                log::trace!("connection {conn:?}: send_datagram accepted 0 bytes, dropping rest of frame");
                break;
            }
            remaining = &remaining[n..];
        }
    }

    fn send_ack_value<A: Adapter>(&mut self, io: &mut A, ackno: u32) {
        let window = self.advertised_window::<A>();
        let seg = Segment {
            seqno: self.next_seqno,
            ackno,
            flags: Flags::ACK,
            window,
            data: Vec::new(),
        };
        Self::send_all(io, self.id, &seg.encode());
    }

    fn send_ack<A: Adapter>(&mut self, io: &mut A) {
        let ackno = self.ackno;
        self.send_ack_value(io, ackno);
    }

    fn send_fin<A: Adapter>(&mut self, io: &mut A) {
        let fin_seqno = self.next_seqno;
        let window = self.advertised_window::<A>();
        let seg = Segment {
            seqno: fin_seqno,
            ackno: self.ackno,
            flags: Flags::FIN | Flags::ACK,
            window,
            data: Vec::new(),
        };
        Self::send_all(io, self.id, &seg.encode());
        self.sent_fin_seqno = Some(fin_seqno);
        self.next_seqno = fin_seqno.wrapping_add(1);
        self.timer.arm();
    }

    fn resend_fin<A: Adapter>(&mut self, io: &mut A) {
        let Some(fin_seqno) = self.sent_fin_seqno else {
            return;
        };
        let window = self.advertised_window::<A>();
        let seg = Segment {
            seqno: fin_seqno,
            ackno: self.last_ackno,
            flags: Flags::FIN | Flags::ACK,
            window,
            data: Vec::new(),
        };
        Self::send_all(io, self.id, &seg.encode());
    }

    /// §4.2's transmit pass: Go-Back-N replay anchor plus window-bounded send.
    fn send_possible<A: Adapter>(&mut self, io: &mut A) {
        self.next_seqno = self.seqno;

        let window = self.advertised_window::<A>();
        let ackno = self.ackno;
        let conn = self.id;
        let send_window = self.send_window as u32;

        let mut next_seqno = self.next_seqno;
        let mut used = 0u32;
        let mut any_sent = false;

        for entry in self.tx.iter_mut() {
            let len = entry.payload.len() as u32;
            if used + len > send_window {
                break;
            }

            let seqno = next_seqno;
            let segment_end = seqno.wrapping_add(len);
            entry.segment_end_seqno = Some(segment_end);

            let seg = Segment {
                seqno,
                ackno,
                flags: Flags::ACK,
                window,
                data: entry.payload.clone(),
            };
            Self::send_all(io, conn, &seg.encode());

            next_seqno = segment_end;
            used += len;
            any_sent = true;
        }

        self.next_seqno = next_seqno;

        if any_sent {
            self.timer.arm();
        }
    }

    /// §4.5's output drain.
    fn drain<A: Adapter>(&mut self, io: &mut A) {
        loop {
            let Some(front) = self.rx.front() else {
                break;
            };
            let remaining = front.bytes_remaining();
            let space = io.conn_bufspace(self.id);
            if space == 0 || space < remaining {
                break;
            }

            let entry = self.rx.pop_front().unwrap();
            if entry.end_of_stream {
                io.conn_output(self.id, &[]);
            } else {
                let mut written = 0usize;
                while written < entry.payload.len() {
                    let n = io.conn_output(self.id, &entry.payload[written..]);
                    if n == 0 {
                        log::trace!("connection {:?}: conn_output stalled mid-entry", self.id);
                        break;
                    }
                    written += n;
                }
            }

            self.send_ack(io);
        }
    }

    fn begin_active_close<A: Adapter>(&mut self, io: &mut A) {
        self.teardown = TeardownState::ActiveClose;
        self.send_fin(io);
    }

    pub(crate) fn on_input_ready<A: Adapter>(&mut self, io: &mut A) {
        if !self.teardown.is_idle() {
            return;
        }

        let mut eof = false;
        loop {
            let mut buf = vec![0u8; A::MAX_SEG_DATA_SIZE];
            match io.conn_input(self.id, &mut buf) {
                InputEvent::Ready(0) => break,
                InputEvent::Ready(n) => {
                    let chunk = &buf[..n];
                    if chunk.starts_with(TRUNCATE_SENTINEL) {
                        log::trace!(
                            "connection {:?}: truncated-read sentinel observed",
                            self.id
                        );
                        break;
                    }
                    self.tx.push(chunk.to_vec());
                }
                InputEvent::WouldBlock => break,
                InputEvent::Eof => {
                    eof = true;
                    break;
                }
            }
        }

        // Flush whatever was just enqueued before the FIN claims a seqno, so
        // the FIN's seqno always lands after every byte read this pass
        // (assumes the backlog fits in one window's worth of sends, as does
        // the rest of this static-window design).
        self.send_possible(io);
        if eof {
            self.begin_active_close(io);
        }
    }

    pub(crate) fn on_output_space<A: Adapter>(&mut self, io: &mut A) {
        self.drain(io);
    }

    /// Returns `true` if the connection should be destroyed and swept from
    /// the registry.
    pub(crate) fn on_datagram<A: Adapter>(&mut self, io: &mut A, buf: &[u8]) -> bool {
        let Some(seg) = Segment::decode(buf) else {
            return false;
        };

        let is_pure_ack = seg.data.is_empty() && !seg.flags.contains(Flags::FIN);
        if seg.seqno == self.last_ackno && !is_pure_ack {
            log::trace!(
                "connection {:?}: duplicate segment seq={}, re-acking last_ackno",
                self.id,
                seg.seqno
            );
            self.send_ack_value(io, self.last_ackno);
            return false;
        }

        let has_fin = seg.flags.contains(Flags::FIN);
        let has_data = !seg.data.is_empty();

        if has_fin {
            return self.handle_fin(io, seg);
        }
        if has_data {
            self.handle_data(io, seg);
            return false;
        }
        if seg.flags.contains(Flags::ACK) {
            return self.handle_ack(io, seg.ackno);
        }

        false
    }

    fn handle_data<A: Adapter>(&mut self, io: &mut A, seg: Segment) {
        if seg.seqno != self.ackno {
            log::trace!(
                "connection {:?}: dropping out-of-order segment seq={} expected={}",
                self.id,
                seg.seqno,
                self.ackno
            );
            return;
        }

        let payload_len = seg.data.len() as u32;
        if self.rcv_window_used() as u32 + payload_len > self.rcv_window as u32 {
            log::trace!("connection {:?}: dropping window-exceeding segment", self.id);
            return;
        }

        self.last_ackno = self.ackno;
        self.ackno = self.ackno.wrapping_add(payload_len);
        self.rx.push(seg.data);

        // drain() acks on every entry it pops, including this one if the
        // output has room; if it doesn't, no ack goes out until the next
        // on_output_space call frees some and drains again.
        self.drain(io);
    }

    fn handle_ack<A: Adapter>(&mut self, io: &mut A, a: u32) -> bool {
        let (_freed, new_seqno) = self.tx.ack_through(a, wire::wrapping_ge);
        if let Some(seqno) = new_seqno {
            self.seqno = seqno;
        }

        let mut fin_just_acked = false;
        if let Some(fin_seqno) = self.sent_fin_seqno {
            let fin_end = fin_seqno.wrapping_add(1);
            if wire::wrapping_ge(a, fin_end) {
                self.seqno = fin_end;
                self.sent_fin_seqno = None;
                fin_just_acked = true;
            }
        }

        if a == self.next_seqno {
            self.timer.disarm();
        }
        self.timer.reset_retry_state();

        if fin_just_acked && self.teardown.is_passive_close() {
            log::debug!("connection {:?}: passive close complete", self.id);
            io.conn_remove(self.id);
            return true;
        }

        false
    }

    fn handle_fin<A: Adapter>(&mut self, io: &mut A, seg: Segment) -> bool {
        match self.teardown {
            TeardownState::Idle => {
                if seg.seqno != self.ackno {
                    log::trace!(
                        "connection {:?}: dropping out-of-order fin seq={} expected={}",
                        self.id,
                        seg.seqno,
                        self.ackno
                    );
                    return false;
                }
                if seg.flags.contains(Flags::ACK) {
                    self.handle_ack(io, seg.ackno);
                }

                self.last_ackno = self.ackno;
                self.ackno = seg.seqno.wrapping_add(1);

                // drain() acks the end-of-stream entry once it pops it, same
                // as a data segment; no separate explicit ack here.
                self.rx.push_end_of_stream();
                self.drain(io);

                self.teardown = TeardownState::PassiveClose;
                self.send_fin(io);
                false
            }
            TeardownState::ActiveClose => {
                if seg.flags.contains(Flags::ACK) {
                    self.handle_ack(io, seg.ackno);
                }
                self.last_ackno = self.ackno;
                self.ackno = seg.seqno.wrapping_add(1);
                self.send_ack(io);

                log::debug!("connection {:?}: active close complete", self.id);
                io.conn_remove(self.id);
                true
            }
            TeardownState::PassiveClose => {
                // Peer retransmitted its FIN because our ACK was lost; the
                // generic duplicate shortcut above normally intercepts this
                // (seg.seqno == last_ackno), this arm is a defensive fallback.
                self.send_ack(io);
                false
            }
        }
    }

    fn retransmit<A: Adapter>(&mut self, io: &mut A) {
        if self.teardown.is_idle() {
            self.send_possible(io);
        } else {
            self.resend_fin(io);
        }
    }

    fn on_retry_budget_exhausted<A: Adapter>(&mut self, io: &mut A) -> bool {
        if self.teardown.is_active_close() {
            log::warn!(
                "connection {:?}: retry budget exhausted again while closing, giving up",
                self.id
            );
            io.conn_remove(self.id);
            return true;
        }

        log::warn!(
            "connection {:?}: retry budget exhausted, forcing FIN",
            self.id
        );
        self.teardown = TeardownState::ActiveClose;
        self.send_fin(io);
        self.timer.reset_retry_state();
        false
    }

    /// Returns `true` if the connection should be destroyed.
    pub(crate) fn on_tick<A: Adapter>(&mut self, io: &mut A) -> bool {
        if !self.timer.is_enabled() {
            self.send_possible(io);
            self.drain(io);
            return false;
        }

        match self.timer.tick() {
            TickOutcome::Waiting => false,
            TickOutcome::Expired => {
                log::debug!(
                    "connection {:?}: RTO expired, retry {}",
                    self.id,
                    self.timer.retry_count()
                );
                self.retransmit(io);
                false
            }
            TickOutcome::RetryBudgetExhausted => self.on_retry_budget_exhausted(io),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, InputEvent};
    use std::collections::VecDeque;

    struct FakeAdapter {
        input: VecDeque<u8>,
        input_eof: bool,
        sent: Vec<Vec<u8>>,
        output: Vec<u8>,
        bufspace: usize,
        removed: Vec<ConnId>,
    }

    impl FakeAdapter {
        fn new() -> Self {
            Self {
                input: VecDeque::new(),
                input_eof: false,
                sent: Vec::new(),
                output: Vec::new(),
                bufspace: usize::MAX,
                removed: Vec::new(),
            }
        }
    }

    impl Adapter for FakeAdapter {
        const MAX_SEG_DATA_SIZE: usize = 4;

        fn send_datagram(&mut self, _conn: ConnId, buf: &[u8]) -> usize {
            self.sent.push(buf.to_vec());
            buf.len()
        }

        fn conn_input(&mut self, _conn: ConnId, buf: &mut [u8]) -> InputEvent {
            if self.input.is_empty() {
                return if self.input_eof {
                    InputEvent::Eof
                } else {
                    InputEvent::WouldBlock
                };
            }
            let mut n = 0;
            while n < buf.len() {
                let Some(b) = self.input.pop_front() else {
                    break;
                };
                buf[n] = b;
                n += 1;
            }
            InputEvent::Ready(n)
        }

        fn conn_output(&mut self, _conn: ConnId, buf: &[u8]) -> usize {
            self.output.extend_from_slice(buf);
            buf.len()
        }

        fn conn_bufspace(&mut self, _conn: ConnId) -> usize {
            self.bufspace
        }

        fn conn_remove(&mut self, conn: ConnId) {
            self.removed.push(conn);
        }

        fn end_client(&mut self) {}
    }

    fn config() -> Config {
        Config {
            send_window: 64,
            recv_window: 64,
            rt_timeout_ms: 100,
            tick_period_ms: 10,
        }
    }

    fn id() -> ConnId {
        ConnId::from_raw(0)
    }

    #[test]
    fn single_segment_exchange_advances_seqno_and_disarms_timer() {
        let mut conn = Connection::new(id(), config());
        let mut io = FakeAdapter::new();
        conn.tx.push(b"hello".to_vec());

        conn.send_possible(&mut io);
        assert_eq!(io.sent.len(), 1);
        let seg = Segment::decode(&io.sent[0]).unwrap();
        assert_eq!(seg.seqno, 1);
        assert_eq!(seg.data, b"hello");
        assert!(conn.timer_enabled());

        let ack = Segment {
            seqno: 1,
            ackno: 6,
            flags: Flags::ACK,
            window: 64,
            data: Vec::new(),
        };
        let destroy = conn.on_datagram(&mut io, &ack.encode());
        assert!(!destroy);
        assert_eq!(conn.seqno(), 6);
        assert!(conn.tx_is_empty());
        assert!(!conn.timer_enabled());
        conn.check_invariants();
    }

    #[test]
    fn duplicate_ack_is_a_no_op() {
        let mut conn = Connection::new(id(), config());
        let mut io = FakeAdapter::new();
        conn.tx.push(b"x".to_vec());
        conn.send_possible(&mut io);

        let ack = Segment {
            seqno: 1,
            ackno: 2,
            flags: Flags::ACK,
            window: 64,
            data: Vec::new(),
        };
        assert!(!conn.on_datagram(&mut io, &ack.encode()));
        assert_eq!(conn.seqno(), 2);
        assert!(!conn.on_datagram(&mut io, &ack.encode()));
        assert_eq!(conn.seqno(), 2);
        assert!(!conn.timer_enabled());
    }

    #[test]
    fn out_of_order_data_is_dropped() {
        let mut conn = Connection::new(id(), config());
        let mut io = FakeAdapter::new();

        let seg = Segment {
            seqno: 4,
            ackno: 0,
            flags: Flags::ACK,
            window: 64,
            data: b"def".to_vec(),
        };
        assert!(!conn.on_datagram(&mut io, &seg.encode()));
        assert_eq!(conn.ackno(), 1);
        assert!(io.sent.is_empty());
    }

    #[test]
    fn duplicate_in_order_segment_triggers_single_reack() {
        let mut conn = Connection::new(id(), config());
        let mut io = FakeAdapter::new();

        let first = Segment {
            seqno: 1,
            ackno: 0,
            flags: Flags::ACK,
            window: 64,
            data: b"ab".to_vec(),
        };
        assert!(!conn.on_datagram(&mut io, &first.encode()));
        assert_eq!(conn.ackno(), 3);
        io.sent.clear();

        // Peer retransmits the same segment because our ack was lost.
        assert!(!conn.on_datagram(&mut io, &first.encode()));
        assert_eq!(io.sent.len(), 1);
        let reack = Segment::decode(&io.sent[0]).unwrap();
        assert_eq!(reack.ackno, 1); // last_ackno, per the spec's literal wording
    }

    #[test]
    fn data_exactly_filling_window_is_accepted_one_more_byte_is_dropped() {
        let mut cfg = config();
        cfg.recv_window = 4;
        let mut conn = Connection::new(id(), cfg);
        let mut io = FakeAdapter::new();

        let fits = Segment {
            seqno: 1,
            ackno: 0,
            flags: Flags::ACK,
            window: 64,
            data: vec![0; 4],
        };
        conn.on_datagram(&mut io, &fits.encode());
        assert_eq!(conn.ackno(), 5);
    }

    #[test]
    fn sixth_retry_forces_fin_regardless_of_teardown_state() {
        let mut cfg = config();
        cfg.tick_period_ms = 100;
        cfg.rt_timeout_ms = 100;
        let mut conn = Connection::new(id(), cfg);
        let mut io = FakeAdapter::new();
        conn.tx.push(b"q".to_vec());
        conn.send_possible(&mut io);

        let mut destroyed = false;
        for _ in 0..6 {
            destroyed = conn.on_tick(&mut io);
        }
        assert!(conn.teardown.is_active_close());
        assert!(!destroyed);

        // A second exhaustion while already closing gives up for good.
        for _ in 0..6 {
            destroyed = conn.on_tick(&mut io);
        }
        assert!(destroyed);
        assert_eq!(io.removed.len(), 1);
    }

    #[test]
    fn active_close_end_to_end() {
        let mut cfg = config();
        let mut a = Connection::new(ConnId::from_raw(0), cfg);
        let mut b = Connection::new(ConnId::from_raw(1), {
            cfg.send_window = 64;
            cfg
        });
        let mut io = FakeAdapter::new();

        // A reads EOF immediately.
        io.input_eof = true;
        a.on_input_ready(&mut io);
        assert!(a.teardown.is_active_close());
        assert_eq!(io.sent.len(), 1);

        let fin = Segment::decode(&io.sent.remove(0)).unwrap();
        assert!(fin.flags.contains(Flags::FIN));

        let destroy_b = b.on_datagram(&mut io, &fin.encode());
        assert!(!destroy_b);
        assert!(b.teardown.is_passive_close());
        // B acks the fin (via the rx flush) and sends its own fin.
        let decoded: Vec<Segment> = io
            .sent
            .iter()
            .map(|bytes| Segment::decode(bytes).unwrap())
            .collect();
        assert!(decoded.iter().filter(|s| !s.flags.contains(Flags::FIN)).count() >= 1);
        let b_fin = decoded
            .iter()
            .find(|s| s.flags.contains(Flags::FIN))
            .cloned()
            .unwrap();
        io.sent.clear();

        let destroy_a = a.on_datagram(&mut io, &b_fin.encode());
        assert!(destroy_a);
        assert_eq!(io.sent.len(), 1); // A's final ack
        let final_ack = Segment::decode(&io.sent.remove(0)).unwrap();

        let destroy_b = b.on_datagram(&mut io, &final_ack.encode());
        assert!(destroy_b);
    }
}
