//! Observability and Metrics
//!
//! Process-wide counters for the framing engine, shared by every connection.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for framing operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections started
    pub connections_total: AtomicU64,
    /// Currently running connections
    pub connections_active: AtomicU64,
    /// Packets decoded from the wire
    pub packets_decoded: AtomicU64,
    /// Packets encoded onto the wire
    pub packets_encoded: AtomicU64,
    /// Frame bytes received (length prefix excluded)
    pub bytes_received: AtomicU64,
    /// Frame bytes sent (length prefix excluded)
    pub bytes_sent: AtomicU64,
    /// Frames that arrived compressed
    pub compressed_received: AtomicU64,
    /// Frames that were sent compressed
    pub compressed_sent: AtomicU64,
    /// Fatal decode errors
    pub decode_errors: AtomicU64,
    /// Fatal encode errors
    pub encode_errors: AtomicU64,
    /// Buffer acquisitions refused by the pool
    pub pool_exhaustions: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_decoded: AtomicU64::new(0),
            packets_encoded: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            compressed_received: AtomicU64::new(0),
            compressed_sent: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            pool_exhaustions: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a decoded packet
    pub fn packet_decoded(&self, frame_len: u64, compressed: bool) {
        self.packets_decoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(frame_len, Ordering::Relaxed);
        if compressed {
            self.compressed_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an encoded packet
    pub fn packet_encoded(&self, frame_len: u64, compressed: bool) {
        self.packets_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(frame_len, Ordering::Relaxed);
        if compressed {
            self.compressed_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a fatal decode error
    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fatal encode error
    pub fn encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused buffer acquisition
    pub fn pool_exhausted(&self) {
        self.pool_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            packets_decoded: self.packets_decoded.load(Ordering::Relaxed),
            packets_encoded: self.packets_encoded.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            compressed_received: self.compressed_received.load(Ordering::Relaxed),
            compressed_sent: self.compressed_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            pool_exhaustions: self.pool_exhaustions.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            packets_decoded = snapshot.packets_decoded,
            packets_encoded = snapshot.packets_encoded,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            compressed_received = snapshot.compressed_received,
            compressed_sent = snapshot.compressed_sent,
            decode_errors = snapshot.decode_errors,
            encode_errors = snapshot.encode_errors,
            pool_exhaustions = snapshot.pool_exhaustions,
            uptime_seconds = snapshot.uptime_seconds,
            "Framing metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub packets_decoded: u64,
    pub packets_encoded: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub compressed_received: u64,
    pub compressed_sent: u64,
    pub decode_errors: u64,
    pub encode_errors: u64,
    pub pool_exhaustions: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    // Force initialization
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
