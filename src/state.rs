use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::RotationReference;

/// Sizes that govern how serial bytes are batched into datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    pub frame_size: usize,
    /// Size-triggered flush threshold.
    pub min_udp_payload: usize,
    pub capacity: usize,
    /// Upper bound on a single serial read.
    pub max_read: usize,
}

impl BufferSizing {
    const MIN_FRAMES: usize = 2;
    const MAX_FRAMES: usize = 40;
    const READ_FRAMES: usize = 5;

    /// Clamps the requested threshold into `[2, 40]` frames; the buffer holds
    /// twice the clamped threshold.
    pub fn new(frame_size: usize, requested_min_payload: usize) -> Self {
        let lower = Self::MIN_FRAMES * frame_size;
        let upper = Self::MAX_FRAMES * frame_size;
        let min_udp_payload = requested_min_payload.clamp(lower, upper);
        if min_udp_payload != requested_min_payload {
            tracing::warn!(
                requested = requested_min_payload,
                clamped = min_udp_payload,
                frame_size,
                "minimum UDP payload outside supported range"
            );
        }
        Self {
            frame_size,
            min_udp_payload,
            capacity: 2 * min_udp_payload,
            max_read: Self::READ_FRAMES * frame_size,
        }
    }
}

/// Fixed-capacity ring of the two most recent file-open instants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampRing {
    slots: [Option<DateTime<Utc>>; 2],
    newest: usize,
}

impl TimestampRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        if self.slots[self.newest].is_some() {
            self.newest = 1 - self.newest;
        }
        self.slots[self.newest] = Some(at);
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.slots[self.newest]
    }

    /// The open before the newest one, or the newest while only one exists.
    pub fn previous(&self) -> Option<DateTime<Utc>> {
        self.slots[1 - self.newest].or_else(|| self.newest())
    }

    pub fn rotation_due(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
        reference: RotationReference,
    ) -> bool {
        let since = match reference {
            RotationReference::PreviousOpen => self.previous(),
            RotationReference::CurrentOpen => self.newest(),
        };
        let Some(since) = since else {
            return false;
        };
        let elapsed = now.signed_duration_since(since);
        // A clock stepping backwards yields a negative age: never due.
        match elapsed.to_std() {
            Ok(elapsed) => elapsed >= interval,
            Err(_) => false,
        }
    }
}

/// Bytes read from the link but not yet sent to the network.
#[derive(Debug)]
pub struct PendingBuffer {
    bytes: Box<[u8]>,
    len: usize,
}

impl PendingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn free(&self) -> usize {
        self.bytes.len() - self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Free space to read into, at most `max` bytes long.
    pub fn spare_mut(&mut self, max: usize) -> &mut [u8] {
        let end = self.len + max.min(self.free());
        &mut self.bytes[self.len..end]
    }

    /// Marks `n` bytes of the spare space as filled; returns the bytes just
    /// committed.
    pub fn commit(&mut self, n: usize) -> &[u8] {
        let start = self.len;
        self.len += n.min(self.free());
        &self.bytes[start..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Everything that changes while the relay runs.
#[derive(Debug)]
pub struct RunState {
    /// Run number of the next file to open.
    pub run_number: u32,
    pub consecutive_timeouts: u32,
    pub file_opens: TimestampRing,
    pub pending: PendingBuffer,
}

impl RunState {
    pub fn new(run_number: u32, sizing: &BufferSizing) -> Self {
        Self {
            run_number,
            consecutive_timeouts: 0,
            file_opens: TimestampRing::new(),
            pending: PendingBuffer::with_capacity(sizing.capacity),
        }
    }

    pub fn reset_link_counters(&mut self) {
        self.consecutive_timeouts = 0;
    }
}
