//! Round-trip time estimation and bookkeeping for unacknowledged segments.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::seq;
use crate::config::Config;
use crate::net::TimerId;

/// Smoothed round-trip time estimator (RFC 6298, Jacobson/Karels).
///
/// ```text
///     RTTVAR <- (1 - beta) * RTTVAR + beta * |SRTT - R'|
///     SRTT   <- (1 - alpha) * SRTT + alpha * R'
///     RTO    <- SRTT + 4 * RTTVAR
/// ```
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// SRTT, the smoothed round-trip time.
    estimate: Duration,
    /// RTTVAR, the round-trip time variation.
    deviation: Duration,
    /// Whether a real measurement has replaced the configured guess.
    seeded: bool,
    alpha: f64,
    beta: f64,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    /// Creates an estimator primed with the configured initial RTT.
    pub fn new(config: &Config) -> Self {
        Self {
            estimate: config.initial_rtt,
            deviation: config.initial_rtt / 2,
            seeded: false,
            alpha: config.rtt_alpha,
            beta: config.rtt_beta,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
        }
    }

    /// Returns the smoothed round-trip time.
    pub fn estimate(&self) -> Duration {
        self.estimate
    }

    /// Returns the round-trip time variation.
    pub fn deviation(&self) -> Duration {
        self.deviation
    }

    /// Returns `true` once at least one sample has been taken.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Folds a new round-trip measurement into the estimate.
    pub fn sample(&mut self, rtt: Duration) {
        if !self.seeded {
            self.estimate = rtt;
            self.deviation = rtt / 2;
            self.seeded = true;
            return;
        }

        let error = rtt.abs_diff(self.estimate);

        self.deviation = self.deviation.mul_f64(1.0 - self.beta) + error.mul_f64(self.beta);
        self.estimate = self.estimate.mul_f64(1.0 - self.alpha) + rtt.mul_f64(self.alpha);
    }

    /// Returns the retransmission timeout, `estimate + 4 * deviation`
    /// clamped to the configured bounds.
    pub fn rto(&self) -> Duration {
        (self.estimate + self.deviation * 4).clamp(self.min_rto, self.max_rto)
    }
}

/// An unacknowledged segment awaiting its cumulative ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outstanding {
    /// Sequence number just past the segment's last octet.
    pub end_seq: u32,
    /// Retransmission timer armed when the segment was sent.
    pub timer: TimerId,
}

/// FIFO of outstanding segments ordered by `end_seq`, plus departure times
/// used for RTT sampling.
#[derive(Debug, Default)]
pub struct SendWindow {
    outstanding: VecDeque<Outstanding>,
    departures: HashMap<u32, Duration>,
}

impl SendWindow {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of outstanding segments.
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// Returns `true` if every sent segment has been acknowledged.
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Iterates over outstanding segments, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Outstanding> {
        self.outstanding.iter()
    }

    /// Records a segment that was just sent. `departed` is `None` for
    /// retransmissions, which never yield RTT samples.
    pub fn push(&mut self, end_seq: u32, timer: TimerId, departed: Option<Duration>) {
        self.outstanding.push_back(Outstanding { end_seq, timer });

        if let Some(at) = departed {
            self.departures.insert(end_seq, at);
        }
    }

    /// Removes and returns the departure time recorded for exactly `ack`.
    pub fn take_departure(&mut self, ack: u32) -> Option<Duration> {
        self.departures.remove(&ack)
    }

    /// Retires every segment with `end_seq <= ack`, returning their timers in
    /// send order.
    pub fn retire(&mut self, ack: u32) -> Vec<TimerId> {
        let mut timers = Vec::new();

        while let Some(front) = self.outstanding.front() {
            if !seq::wrapping_le(front.end_seq, ack) {
                break;
            }

            self.departures.remove(&front.end_seq);
            timers.push(front.timer);
            self.outstanding.pop_front();
        }

        timers
    }

    /// Forgets every outstanding segment and departure, returning all armed
    /// timers.
    pub fn clear(&mut self) -> Vec<TimerId> {
        self.departures.clear();
        self.outstanding.drain(..).map(|o| o.timer).collect()
    }
}
