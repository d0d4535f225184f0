use std::time::Duration;

use crate::common::MAX_BITS;
use crate::{Error, Result};

/// Default port of a Chord node.
pub const DEFAULT_PORT: u16 = 8001;
/// Default ring width, the full SHA-1 digest.
pub const DEFAULT_BITS: u32 = MAX_BITS;
/// Default timeout of a single outbound RPC, connecting included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);
pub const DEFAULT_STABILIZE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FIX_FINGERS_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FIX_FINGER_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_CHECK_PREDECESSOR_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
/// Chord node configurations
pub struct Config {
    /// Ip address other nodes reach this node on.
    ///
    /// Defaults to `127.0.0.1`
    pub ip: String,
    /// Port other nodes reach this node on. It must be the port of the
    /// transport handed to the node, since the node Id is derived from it.
    ///
    /// Defaults to [DEFAULT_PORT]
    pub port: u16,
    /// Ring width `m`, Ids live in `[0, 2^m)` and the finger table has `m` entries.
    ///
    /// Defaults to [DEFAULT_BITS]
    pub bits: u32,
    /// Timeout of every outbound request.
    ///
    /// A peer that doesn't answer within this duration is considered unreachable
    /// for that call; nothing is retried until the next maintenance tick.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Defaults to [DEFAULT_STABILIZE_INTERVAL]
    pub stabilize_interval: Duration,
    /// Pause between two full sweeps of the finger table.
    ///
    /// Defaults to [DEFAULT_FIX_FINGERS_INTERVAL]
    pub fix_fingers_interval: Duration,
    /// Pause between two finger entries within a sweep.
    ///
    /// Defaults to [DEFAULT_FIX_FINGER_DELAY]
    pub fix_finger_delay: Duration,
    /// Defaults to [DEFAULT_CHECK_PREDECESSOR_INTERVAL]
    pub check_predecessor_interval: Duration,
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.bits == 0 || self.bits > MAX_BITS {
            return Err(Error::InvalidBits(self.bits));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            bits: DEFAULT_BITS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stabilize_interval: DEFAULT_STABILIZE_INTERVAL,
            fix_fingers_interval: DEFAULT_FIX_FINGERS_INTERVAL,
            fix_finger_delay: DEFAULT_FIX_FINGER_DELAY,
            check_predecessor_interval: DEFAULT_CHECK_PREDECESSOR_INTERVAL,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bits_range() {
        assert!(Config::default().validate().is_ok());

        for bits in [0, 161] {
            let config = Config {
                bits,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::InvalidBits(b)) if b == bits));
        }
    }
}
