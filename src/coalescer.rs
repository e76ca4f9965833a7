use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::RotationReference;
use crate::fanout::SocketFanOut;
use crate::metrics::Metrics;
use crate::persistence::OutputFile;
use crate::serial::{FrameLink, ReadOutcome};
use crate::state::{BufferSizing, RunState};

/// Why the coalescer asked for the link to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SustainedTimeout,
    EndOfStream,
}

/// What the supervisor should do after one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Continue,
    RotateFile,
    CloseLink(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Size,
    Overflow,
    Close,
}

#[derive(Debug, Clone)]
pub struct CoalescerSettings {
    pub sizing: BufferSizing,
    pub timeout_threshold: u32,
    pub pacing_per_byte: Duration,
    pub rotation_interval: Duration,
    pub rotation_reference: RotationReference,
}

/// Moves bytes from the link into the pending buffer, the output file and
/// the fan-out set, one bounded read per cycle.
pub struct Coalescer {
    settings: CoalescerSettings,
}

impl Coalescer {
    pub fn new(settings: CoalescerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CoalescerSettings {
        &self.settings
    }

    pub async fn cycle<L: FrameLink + ?Sized>(
        &self,
        link: &mut L,
        file: &mut OutputFile,
        fanout: &SocketFanOut,
        state: &mut RunState,
        metrics: &mut Metrics,
        now: impl FnOnce() -> DateTime<Utc>,
    ) -> Cycle {
        if state.pending.is_full() {
            tracing::warn!(bytes = state.pending.len(), "pending buffer full, forcing flush");
            self.flush(fanout, state, metrics, FlushTrigger::Overflow).await;
        } else {
            let max_read = self.settings.sizing.max_read;
            let outcome = link.read(state.pending.spare_mut(max_read)).await;
            match outcome {
                ReadOutcome::Data(n) => {
                    state.reset_link_counters();
                    metrics.record_read(n);
                    let fresh = state.pending.commit(n);
                    tracing::trace!(bytes = n, data = ?fresh, "read from link");
                    let written = file.write(fresh).await;
                    metrics.record_file_write(n, written);
                    if state.pending.len() >= self.settings.sizing.min_udp_payload {
                        self.flush(fanout, state, metrics, FlushTrigger::Size).await;
                    }
                }
                ReadOutcome::Timeout => {
                    state.consecutive_timeouts += 1;
                    metrics.record_timeout();
                    tracing::debug!(consecutive = state.consecutive_timeouts, "read timed out");
                    if state.consecutive_timeouts >= self.settings.timeout_threshold {
                        tracing::warn!(
                            timeouts = state.consecutive_timeouts,
                            "link idle beyond threshold, closing"
                        );
                        state.consecutive_timeouts = 0;
                        return Cycle::CloseLink(CloseReason::SustainedTimeout);
                    }
                }
                ReadOutcome::Failed(err) => {
                    metrics.record_read_error();
                    tracing::error!(error = %err, "read from link failed");
                }
                ReadOutcome::EndOfStream => {
                    tracing::warn!("link reported end of stream");
                    return Cycle::CloseLink(CloseReason::EndOfStream);
                }
            }
        }

        if state.file_opens.rotation_due(
            now(),
            self.settings.rotation_interval,
            self.settings.rotation_reference,
        ) {
            return Cycle::RotateFile;
        }
        Cycle::Continue
    }

    /// Sends whatever is pending before a file or link closes.
    pub async fn drain(&self, fanout: &SocketFanOut, state: &mut RunState, metrics: &mut Metrics) {
        if !state.pending.is_empty() {
            self.flush(fanout, state, metrics, FlushTrigger::Close).await;
        }
    }

    async fn flush(
        &self,
        fanout: &SocketFanOut,
        state: &mut RunState,
        metrics: &mut Metrics,
        trigger: FlushTrigger,
    ) {
        let payload = state.pending.as_slice();
        let bytes = payload.len();
        let delivered = fanout.send_all(payload).await;
        metrics.record_flush(bytes, fanout.len(), delivered);
        tracing::trace!(bytes, delivered, ?trigger, "pending buffer flushed");
        state.pending.clear();

        if trigger == FlushTrigger::Size && !self.settings.pacing_per_byte.is_zero() {
            let pause = self.settings.pacing_per_byte.saturating_mul(bytes as u32);
            tokio::time::sleep(pause).await;
        }
    }
}
