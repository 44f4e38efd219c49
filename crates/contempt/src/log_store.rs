//! In-memory record of gateway traffic and REST requests.
//!
//! A [`LogStore`] is created once by the application and handed to the
//! client; it keeps the most recent entries and streams new ones to
//! subscribers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use contempt_proto::GatewayPacket;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

const STREAM_BUFFER_SIZE: usize = 1024;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to server.
    Sent,
    /// Server to client.
    Received,
}

/// What was logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogVariant {
    /// A gateway packet.
    Gateway(GatewayPacket),
    /// A REST request and, once known, its response status.
    Http {
        /// Request method.
        method: String,
        /// Request URL.
        url: String,
        /// Response status, `None` if no response arrived.
        status: Option<u16>,
    },
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogMessage {
    /// Position in the store, increasing from 1.
    pub id: u64,
    /// Direction.
    pub direction: Direction,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub variant: LogVariant,
}

/// Bounded, thread-safe log of traffic.
pub struct LogStore {
    capacity: usize,
    entries: RwLock<VecDeque<LogMessage>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<LogMessage>,
}

impl LogStore {
    /// Store keeping at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(STREAM_BUFFER_SIZE);
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            broadcast,
        }
    }

    /// Record a gateway packet.
    pub fn record_gateway(&self, direction: Direction, packet: &GatewayPacket) -> u64 {
        self.append(direction, LogVariant::Gateway(packet.clone()))
    }

    /// Record a REST request.
    pub fn record_http(&self, method: &str, url: &str, status: Option<u16>) -> u64 {
        self.append(
            Direction::Sent,
            LogVariant::Http {
                method: method.to_string(),
                url: url.to_string(),
                status,
            },
        )
    }

    fn append(&self, direction: Direction, variant: LogVariant) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = LogMessage {
            id,
            direction,
            timestamp: Utc::now(),
            variant,
        };

        {
            let mut entries = self.entries.write();
            entries.push_back(message.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }

        // No subscribers is fine.
        let _ = self.broadcast.send(message);
        id
    }

    /// Retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogMessage> {
        self.entries.read().iter().cloned().collect()
    }

    /// Remove and return every retained entry.
    pub fn drain(&self) -> Vec<LogMessage> {
        self.entries.write().drain(..).collect()
    }

    /// Drop every retained entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entries recorded from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.broadcast.subscribe()
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
