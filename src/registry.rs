use slab::Slab;

use crate::adapter::Adapter;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;

/// Opaque handle to a live connection, returned by [`Registry::init`]. Wraps
/// a [`slab::Slab`] index rather than an intrusive pointer, so the registry
/// owns every `Connection` outright and nothing self-references (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(usize);

impl ConnId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: usize) -> Self {
        ConnId(raw)
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Owns every live connection and dispatches the four serialized entry
/// points plus the tick source into the right `Connection` (§4.7, §5). There
/// is one `Registry` per adapter; nothing here takes a lock, since the host
/// is expected to call these methods from a single thread.
pub struct Registry<A: Adapter> {
    connections: Slab<Connection>,
    max_seg_data_size: std::marker::PhantomData<A>,
}

impl<A: Adapter> Default for Registry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Adapter> Registry<A> {
    pub fn new() -> Self {
        Self {
            connections: Slab::new(),
            max_seg_data_size: std::marker::PhantomData,
        }
    }

    pub fn init(&mut self, config: Config) -> Result<ConnId, Error> {
        config.validate(A::MAX_SEG_DATA_SIZE)?;
        let entry = self.connections.vacant_entry();
        let id = ConnId(entry.key());
        entry.insert(Connection::new(id, config));
        Ok(id)
    }

    /// Removes a connection immediately, without running the teardown
    /// handshake. Used by the host for a hard abort; the protocol's own
    /// graceful paths call this internally once the four-way exchange (or
    /// the retry budget) concludes.
    pub fn destroy(&mut self, id: ConnId, io: &mut A) -> Result<(), Error> {
        if !self.connections.contains(id.0) {
            return Err(Error::UnknownConnection);
        }
        self.connections.remove(id.0);
        io.conn_remove(id);
        self.notify_if_empty(io);
        Ok(())
    }

    pub fn on_input_ready(&mut self, id: ConnId, io: &mut A) -> Result<(), Error> {
        self.connections
            .get_mut(id.0)
            .ok_or(Error::UnknownConnection)?
            .on_input_ready(io);
        Ok(())
    }

    pub fn on_output_space(&mut self, id: ConnId, io: &mut A) -> Result<(), Error> {
        self.connections
            .get_mut(id.0)
            .ok_or(Error::UnknownConnection)?
            .on_output_space(io);
        Ok(())
    }

    pub fn on_datagram(&mut self, id: ConnId, io: &mut A, buf: &[u8]) -> Result<(), Error> {
        let conn = self.connections.get_mut(id.0).ok_or(Error::UnknownConnection)?;
        if conn.on_datagram(io, buf) {
            self.connections.remove(id.0);
            self.notify_if_empty(io);
        }
        Ok(())
    }

    /// Drives every live connection's timer by one tick (§4.6). Connections
    /// that conclude teardown during this pass are swept afterwards so the
    /// iteration itself never mutates the slab it's walking.
    pub fn on_tick(&mut self, io: &mut A) {
        let mut finished = Vec::new();

        for (key, conn) in self.connections.iter_mut() {
            if conn.on_tick(io) {
                finished.push(key);
            }
        }

        for key in finished {
            self.connections.remove(key);
        }

        self.notify_if_empty(io);
    }

    fn notify_if_empty(&mut self, io: &mut A) {
        if self.connections.is_empty() {
            io.end_client();
        }
    }
}
