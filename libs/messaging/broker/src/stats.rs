//! Broker traffic counters
//!
//! [`TrafficCounters`] is installed as the broker's [`TrafficObserver`] and
//! periodically logged as a [`TrafficSnapshot`].

use network::{Connection, TrafficObserver};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use types::{MessageType, MultiplexerMessage};

#[derive(Debug)]
pub struct TrafficCounters {
    started: Instant,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    by_type: Mutex<BTreeMap<MessageType, u64>>,
}

impl Default for TrafficCounters {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            by_type: Mutex::new(BTreeMap::new()),
        }
    }
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        let opened = self.opened.load(Ordering::Relaxed);
        let closed = self.closed.load(Ordering::Relaxed);
        TrafficSnapshot {
            uptime: self.started.elapsed(),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            connections_opened: opened,
            active_connections: opened.saturating_sub(closed),
            received_by_type: self.by_type.lock().clone(),
        }
    }
}

impl TrafficObserver for TrafficCounters {
    fn on_received(&self, _connection: &Connection, message: &MultiplexerMessage, wire_bytes: usize) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(wire_bytes as u64, Ordering::Relaxed);
        *self.by_type.lock().entry(message.message_type).or_insert(0) += 1;
    }

    fn on_sent(&self, _connection: &Connection, _message: &MultiplexerMessage, wire_bytes: usize) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(wire_bytes as u64, Ordering::Relaxed);
    }

    fn on_opened(&self, _connection: &Connection) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    fn on_closed(&self, _connection: &Connection) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`TrafficCounters`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub uptime: Duration,
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub connections_opened: u64,
    pub active_connections: u64,
    pub received_by_type: BTreeMap<MessageType, u64>,
}

impl TrafficSnapshot {
    /// Inbound frames per second since start
    pub fn receive_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.frames_in as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for TrafficSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrafficSnapshot {{ frames: {}/{} in/out, bytes: {}/{}, connections: {} active of {}, rate: {:.1}/s, uptime: {}s }}",
            self.frames_in,
            self.frames_out,
            self.bytes_in,
            self.bytes_out,
            self.active_connections,
            self.connections_opened,
            self.receive_rate(),
            self.uptime.as_secs()
        )
    }
}
