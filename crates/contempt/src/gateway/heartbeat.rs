//! Heartbeat scheduling and ACK tracking.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Configuration for heartbeat behavior.
///
/// The interval itself comes from the server's HELLO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// An ACK arriving later than this marks the connection unviable.
    pub ack_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a due heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    /// Send a heartbeat now.
    Send,
    /// The previous heartbeat was never acknowledged.
    Zombie,
}

/// Heartbeat state for one socket.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    interval: Duration,
    ack_timeout: Duration,
    next_due: Instant,
    awaiting_ack: bool,
    last_sent: Option<Instant>,
}

impl Heartbeat {
    /// Start with a random first delay in `[0, interval)` so clients that
    /// connected together do not beat together.
    pub(crate) fn start(interval: Duration, config: &HeartbeatConfig, now: Instant) -> Self {
        let interval_ms = interval.as_millis() as u64;
        let first = if interval_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..interval_ms))
        };
        Self::with_first_delay(interval, config, now, first)
    }

    pub(crate) fn with_first_delay(
        interval: Duration,
        config: &HeartbeatConfig,
        now: Instant,
        first: Duration,
    ) -> Self {
        Self {
            interval,
            ack_timeout: config.ack_timeout,
            next_due: now + first,
            awaiting_ack: false,
            last_sent: None,
        }
    }

    pub(crate) const fn next_due(&self) -> Instant {
        self.next_due
    }

    /// The heartbeat timer fired.
    pub(crate) fn on_due(&mut self, now: Instant) -> Beat {
        if self.awaiting_ack {
            return Beat::Zombie;
        }
        self.awaiting_ack = true;
        self.last_sent = Some(now);
        self.next_due = now + self.interval;
        Beat::Send
    }

    /// An ACK arrived. Returns the round trip of the outstanding heartbeat.
    pub(crate) fn on_ack(&mut self, now: Instant) -> Option<Duration> {
        let was_awaiting = std::mem::replace(&mut self.awaiting_ack, false);
        self.last_sent
            .filter(|_| was_awaiting)
            .map(|sent| now.saturating_duration_since(sent))
    }

    /// When an outstanding ACK becomes late, if one is outstanding.
    pub(crate) fn ack_deadline(&self) -> Option<Instant> {
        if self.awaiting_ack {
            self.last_sent.map(|sent| sent + self.ack_timeout)
        } else {
            None
        }
    }
}
