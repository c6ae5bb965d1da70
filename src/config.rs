//! Tunables for the TCP engine.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::protocol::headers::{Ipv4Header, TcpHeader};
use crate::{ConfigError, Result};

/// Default Maximum Segment Size (MSS) in bytes.
pub const DEFAULT_MSS: usize = 1460;

/// Default capacity of each connection's receive ring, in bytes.
pub const DEFAULT_RECV_BUFFER_CAPACITY: usize = 64 * 1024;

/// Engine configuration.
///
/// All durations are measured on the host's virtual clock.
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest payload carried by a single segment.
    pub mss: usize,
    /// Capacity of the receive ring allocated for every established
    /// connection.
    pub recv_buffer_capacity: usize,
    /// Delay between re-invocations of a blocked `accept`, `read` or
    /// `connect`.
    pub poll_interval: Duration,
    /// RTT assumed before the first sample. The deviation starts at half of
    /// this value.
    pub initial_rtt: Duration,
    /// Gain applied to new samples by the smoothed RTT estimate.
    pub rtt_alpha: f64,
    /// Gain applied to new samples by the RTT deviation estimate.
    pub rtt_beta: f64,
    /// Lower clamp for the retransmission timeout.
    pub min_rto: Duration,
    /// Upper clamp for the retransmission timeout.
    pub max_rto: Duration,
    /// Number of times a `SYN` or `SYN_ACK` is resent before the handshake is
    /// abandoned.
    pub max_syn_retries: u32,
    /// Ports handed out by an implicit bind on `connect`.
    pub ephemeral_ports: RangeInclusive<u16>,
    /// Time to live stamped on every outgoing datagram.
    pub ttl: u8,
    /// Interface names are formed by appending the route index to this
    /// prefix.
    pub interface_prefix: String,
    /// Pins the initial send sequence number instead of deriving it from the
    /// clock.
    pub initial_sequence: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            recv_buffer_capacity: DEFAULT_RECV_BUFFER_CAPACITY,
            poll_interval: Duration::from_millis(100),
            initial_rtt: Duration::from_millis(100),
            rtt_alpha: 0.125,
            rtt_beta: 0.25,
            min_rto: Duration::from_millis(20),
            max_rto: Duration::from_secs(60),
            max_syn_retries: 6,
            ephemeral_ports: 49152..=65535,
            ttl: 64,
            interface_prefix: "eth".to_string(),
            initial_sequence: None,
        }
    }
}

impl Config {
    /// Largest MSS that still fits the IPv4 total length field.
    pub const MAX_MSS: usize =
        (u16::MAX - Ipv4Header::MIN_HEADER_LEN - TcpHeader::MIN_HEADER_LEN) as usize;

    /// Checks that every field holds a usable value.
    ///
    /// # Errors
    ///
    /// Returns the first [ConfigError] encountered.
    pub fn validate(&self) -> Result<()> {
        if self.mss == 0 || self.mss > Self::MAX_MSS {
            return Err(ConfigError::InvalidMss {
                provided: self.mss,
                max: Self::MAX_MSS,
            }
            .into());
        }

        if self.recv_buffer_capacity == 0 {
            return Err(ConfigError::ZeroBufferCapacity.into());
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval.into());
        }

        for (name, value) in [("rtt_alpha", self.rtt_alpha), ("rtt_beta", self.rtt_beta)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidSmoothing { name, value }.into());
            }
        }

        if self.min_rto > self.max_rto {
            return Err(ConfigError::InvalidRtoBounds.into());
        }

        Ok(())
    }

    /// Returns the name of the interface with the given route index.
    pub fn interface_name(&self, index: usize) -> String {
        format!("{}{index}", self.interface_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mss, 1460);
        assert_eq!(config.interface_name(1), "eth1");
    }

    #[test]
    fn oversized_mss_invalid() {
        let config = Config {
            mss: Config::MAX_MSS + 1,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidMss { .. }))
        ));
    }

    #[test]
    fn smoothing_out_of_range_invalid() {
        let config = Config {
            rtt_beta: 1.5,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidSmoothing { name: "rtt_beta", .. }))
        ));
    }

    #[test]
    fn inverted_rto_bounds_invalid() {
        let config = Config {
            min_rto: Duration::from_secs(2),
            max_rto: Duration::from_secs(1),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }
}
