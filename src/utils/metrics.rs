//! Process-wide counters for codec, connection and capture activity.
//!
//! Every counter is a relaxed atomic, so components record without
//! coordinating; a [`MetricsSnapshot`] is a best-effort view, not a
//! consistent cut across counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info};

/// Monotonic event counter (or gauge, via [`Counter::decrement`]).
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Decrease by one, stopping at zero.
    pub fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct LinkCounters {
    /// Connections built around a socket
    pub opened: Counter,
    /// Connections still holding their socket
    pub open: Counter,
    pub failures: Counter,
    pub frames_out: Counter,
    pub frames_in: Counter,
    pub bytes_out: Counter,
    pub bytes_in: Counter,
    /// Frames wrapped in the session envelope
    pub sealed: Counter,
    pub opened_envelopes: Counter,
}

#[derive(Debug, Default)]
pub struct KeyExchangeCounters {
    pub attempts: Counter,
    pub established: Counter,
    pub rejected: Counter,
}

#[derive(Debug, Default)]
pub struct CodecCounters {
    pub decode_failures: Counter,
    pub encode_failures: Counter,
}

#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub records_read: Counter,
    pub records_written: Counter,
}

/// All counters of the process.
#[derive(Debug)]
pub struct Metrics {
    pub link: LinkCounters,
    pub key_exchange: KeyExchangeCounters,
    pub codec: CodecCounters,
    pub capture: CaptureCounters,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            link: LinkCounters::default(),
            key_exchange: KeyExchangeCounters::default(),
            codec: CodecCounters::default(),
            capture: CaptureCounters::default(),
            started: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.link.opened.incr();
        self.link.open.incr();
    }

    pub fn connection_closed(&self) {
        self.link.open.decrement();
    }

    pub fn connection_error(&self) {
        self.link.failures.incr();
    }

    pub fn handshake_attempt(&self) {
        self.key_exchange.attempts.incr();
    }

    pub fn handshake_success(&self) {
        self.key_exchange.established.incr();
    }

    pub fn handshake_failed(&self) {
        self.key_exchange.rejected.incr();
    }

    /// A frame was queued on a connection.
    pub fn frame_sent(&self) {
        self.link.frames_out.incr();
    }

    /// A frame was decoded off a connection.
    pub fn frame_received(&self) {
        self.link.frames_in.incr();
    }

    pub fn bytes_written(&self, count: u64) {
        self.link.bytes_out.add(count);
    }

    pub fn bytes_read(&self, count: u64) {
        self.link.bytes_in.add(count);
    }

    pub fn frame_encrypted(&self) {
        self.link.sealed.incr();
    }

    pub fn frame_decrypted(&self) {
        self.link.opened_envelopes.incr();
    }

    pub fn record_decode_error(&self) {
        self.codec.decode_failures.incr();
    }

    pub fn record_encode_error(&self) {
        self.codec.encode_failures.incr();
    }

    pub fn capture_record_read(&self) {
        self.capture.records_read.incr();
    }

    pub fn capture_record_written(&self) {
        self.capture.records_written.incr();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.link.opened.get(),
            connections_open: self.link.open.get(),
            connection_failures: self.link.failures.get(),
            frames_out: self.link.frames_out.get(),
            frames_in: self.link.frames_in.get(),
            bytes_out: self.link.bytes_out.get(),
            bytes_in: self.link.bytes_in.get(),
            frames_sealed: self.link.sealed.get(),
            frames_opened: self.link.opened_envelopes.get(),
            key_exchanges: self.key_exchange.attempts.get(),
            key_exchanges_established: self.key_exchange.established.get(),
            key_exchanges_rejected: self.key_exchange.rejected.get(),
            decode_errors: self.codec.decode_failures.get(),
            encode_errors: self.codec.encode_failures.get(),
            capture_records_read: self.capture.records_read.get(),
            capture_records_written: self.capture.records_written.get(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Emit the current snapshot as one structured `info` event.
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_opened = s.connections_opened,
            connections_open = s.connections_open,
            connection_failures = s.connection_failures,
            frames_out = s.frames_out,
            frames_in = s.frames_in,
            bytes_out = s.bytes_out,
            bytes_in = s.bytes_in,
            frames_sealed = s.frames_sealed,
            frames_opened = s.frames_opened,
            key_exchanges = s.key_exchanges,
            key_exchanges_established = s.key_exchanges_established,
            key_exchanges_rejected = s.key_exchanges_rejected,
            decode_errors = s.decode_errors,
            encode_errors = s.encode_errors,
            capture_records_read = s.capture_records_read,
            capture_records_written = s.capture_records_written,
            uptime_secs = s.uptime_secs,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_open: u64,
    pub connection_failures: u64,
    pub frames_out: u64,
    pub frames_in: u64,
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub frames_sealed: u64,
    pub frames_opened: u64,
    pub key_exchanges: u64,
    pub key_exchanges_established: u64,
    pub key_exchanges_rejected: u64,
    pub decode_errors: u64,
    pub encode_errors: u64,
    pub capture_records_read: u64,
    pub capture_records_written: u64,
    pub uptime_secs: u64,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn global_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Start the uptime clock now instead of at first use.
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Logs how long a scope took when dropped.
pub struct Timer {
    started: Instant,
    label: &'static str,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        Self {
            started: Instant::now(),
            label,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.label,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.bytes_written(17);
        metrics.bytes_written(3);
        metrics.connection_closed();
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_opened, 1);
        assert_eq!(snap.connections_open, 0);
        assert_eq!(snap.bytes_out, 20);
    }

    #[test]
    fn key_exchange_outcomes() {
        let metrics = Metrics::new();
        metrics.handshake_attempt();
        metrics.handshake_attempt();
        metrics.handshake_success();
        metrics.handshake_failed();
        assert_eq!(metrics.key_exchange.attempts.get(), 2);
        assert_eq!(metrics.key_exchange.established.get(), 1);
        assert_eq!(metrics.key_exchange.rejected.get(), 1);
    }
}
