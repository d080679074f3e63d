/// The four-way FIN teardown state machine (§4.4). The state itself only
/// tracks *which side* initiated teardown; the actual FIN/ACK segments and
/// queue flushing are driven by [`crate::connection::Connection`], which is
/// the only place with access to the adapter and the send/receive queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownState {
    /// No teardown in progress.
    Idle,
    /// This side read EOF (or exhausted its retry budget) and sent the
    /// first FIN; waiting for the peer's FIN+ACK or FIN.
    ActiveClose,
    /// This side received a FIN from a connection that was still `Idle`
    /// and answered with EOF delivery, ACK, and its own FIN; waiting for
    /// the peer's final ACK.
    PassiveClose,
}

impl TeardownState {
    pub(crate) fn is_idle(&self) -> bool {
        matches!(self, TeardownState::Idle)
    }

    pub(crate) fn is_active_close(&self) -> bool {
        matches!(self, TeardownState::ActiveClose)
    }

    pub(crate) fn is_passive_close(&self) -> bool {
        matches!(self, TeardownState::PassiveClose)
    }
}
