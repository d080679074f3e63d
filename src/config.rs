use crate::Error;

/// Per-connection configuration, supplied by the host at [`crate::Registry::init`].
///
/// Loading these values from a file, environment, or CLI flags is the host's
/// job; this crate only validates and consumes the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum unacknowledged bytes this side may have outstanding.
    pub send_window: u16,
    /// Maximum bytes this side will buffer from the peer before acking.
    pub recv_window: u16,
    /// Retransmission timeout, in milliseconds.
    pub rt_timeout_ms: u32,
    /// Tick period, in milliseconds.
    pub tick_period_ms: u32,
}

impl Config {
    /// Number of ticks that must elapse before an armed timer fires an RTO,
    /// i.e. `ceil(rt_timeout_ms / tick_period_ms)`.
    pub(crate) fn ticks_per_rto(&self) -> u32 {
        (self.rt_timeout_ms + self.tick_period_ms - 1) / self.tick_period_ms
    }

    pub(crate) fn validate(&self, max_seg_data_size: usize) -> Result<(), Error> {
        if self.send_window == 0 {
            return Err(Error::InvalidConfig("send_window must be non-zero"));
        }
        if (self.recv_window as usize) < max_seg_data_size {
            return Err(Error::InvalidConfig(
                "recv_window must hold at least one full segment",
            ));
        }
        if self.rt_timeout_ms == 0 {
            return Err(Error::InvalidConfig("rt_timeout_ms must be non-zero"));
        }
        if self.tick_period_ms == 0 {
            return Err(Error::InvalidConfig("tick_period_ms must be non-zero"));
        }
        if self.ticks_per_rto() == 0 {
            return Err(Error::InvalidConfig("ticks_per_rto computed to zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config {
            send_window: 4096,
            recv_window: 4096,
            rt_timeout_ms: 1000,
            tick_period_ms: 100,
        }
    }

    #[test]
    fn ticks_per_rto_rounds_up() {
        let mut c = cfg();
        c.rt_timeout_ms = 950;
        c.tick_period_ms = 100;
        assert_eq!(c.ticks_per_rto(), 10);
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert!(cfg().validate(1024).is_ok());
    }

    #[test]
    fn validate_rejects_zero_send_window() {
        let mut c = cfg();
        c.send_window = 0;
        assert!(c.validate(1024).is_err());
    }

    #[test]
    fn validate_rejects_recv_window_smaller_than_one_segment() {
        let mut c = cfg();
        c.recv_window = 512;
        assert!(c.validate(1024).is_err());
    }

    #[test]
    fn validate_rejects_zero_tick_period() {
        let mut c = cfg();
        c.tick_period_ms = 0;
        assert!(c.validate(1024).is_err());
    }
}
