use std::time::{Duration, Instant};

/// Counters reported by the health heartbeat. Owned by the supervisor loop,
/// so plain integers suffice.
#[derive(Debug)]
pub struct Metrics {
    bytes_read: u64,
    bytes_written: u64,
    flushes: u64,
    bytes_sent: u64,
    failed_sends: u64,
    timeouts: u64,
    read_errors: u64,
    short_writes: u64,
    link_opens: u64,
    rotations: u64,
    last_data: Option<Instant>,
    last_heartbeat: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            bytes_read: 0,
            bytes_written: 0,
            flushes: 0,
            bytes_sent: 0,
            failed_sends: 0,
            timeouts: 0,
            read_errors: 0,
            short_writes: 0,
            link_opens: 0,
            rotations: 0,
            last_data: None,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn record_read(&mut self, bytes: usize) {
        self.bytes_read += bytes as u64;
        self.last_data = Some(Instant::now());
    }

    pub fn record_file_write(&mut self, requested: usize, written: usize) {
        self.bytes_written += written as u64;
        if written < requested {
            self.short_writes += 1;
        }
    }

    pub fn record_flush(&mut self, bytes: usize, destinations: usize, delivered: usize) {
        self.flushes += 1;
        self.bytes_sent += (bytes * delivered) as u64;
        self.failed_sends += destinations.saturating_sub(delivered) as u64;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_read_error(&mut self) {
        self.read_errors += 1;
    }

    pub fn record_link_open(&mut self) {
        self.link_opens += 1;
    }

    pub fn record_rotation(&mut self) {
        self.rotations += 1;
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            flushes: self.flushes,
            bytes_sent: self.bytes_sent,
            failed_sends: self.failed_sends,
            timeouts: self.timeouts,
            read_errors: self.read_errors,
            short_writes: self.short_writes,
            link_opens: self.link_opens,
            rotations: self.rotations,
            last_data_age: self.last_data.map(|at| at.elapsed()),
        }
    }

    /// Logs a heartbeat once `interval` has passed since the last one.
    pub fn maybe_heartbeat(&mut self, service: &str, interval: Duration) {
        if interval.is_zero() || self.last_heartbeat.elapsed() < interval {
            return;
        }
        self.last_heartbeat = Instant::now();
        let snapshot = self.snapshot();
        tracing::info!(
            service = %service,
            bytes_read = snapshot.bytes_read,
            bytes_written = snapshot.bytes_written,
            flushes = snapshot.flushes,
            bytes_sent = snapshot.bytes_sent,
            failed_sends = snapshot.failed_sends,
            timeouts = snapshot.timeouts,
            read_errors = snapshot.read_errors,
            short_writes = snapshot.short_writes,
            link_opens = snapshot.link_opens,
            rotations = snapshot.rotations,
            "health heartbeat"
        );
        if let Some(age) = snapshot.last_data_age {
            if age > interval {
                tracing::warn!(
                    service = %service,
                    idle_seconds = ?age.as_secs_f64(),
                    "no instrument data in the last {} seconds",
                    interval.as_secs()
                );
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub flushes: u64,
    pub bytes_sent: u64,
    pub failed_sends: u64,
    pub timeouts: u64,
    pub read_errors: u64,
    pub short_writes: u64,
    pub link_opens: u64,
    pub rotations: u64,
    pub last_data_age: Option<Duration>,
}
