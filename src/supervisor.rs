use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, time::sleep};

use crate::clock::Clock;
use crate::coalescer::{CloseReason, Coalescer, Cycle};
use crate::fanout::SocketFanOut;
use crate::metrics::Metrics;
use crate::persistence::{OutputFile, OutputFiles};
use crate::serial::{FrameLink, LinkOpener};
use crate::state::RunState;

/// How one link lifetime ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The device could not be opened.
    OpenFailed,
    /// The coalescer closed the link.
    LinkClosed(CloseReason),
    /// A stop was requested.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub service_name: String,
    pub reopen_backoff: Duration,
    pub heartbeat_interval: Duration,
    /// Return from [`Supervisor::run`] when the link reports end of stream
    /// instead of reopening it. Used for capture replay.
    pub stop_at_end_of_stream: bool,
}

/// Owns the link and the output file and keeps both open for as long as
/// the process runs.
pub struct Supervisor<O: LinkOpener> {
    opener: O,
    files: OutputFiles,
    fanout: SocketFanOut,
    coalescer: Coalescer,
    state: RunState,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    settings: SupervisorSettings,
    shutdown: watch::Receiver<bool>,
}

impl<O: LinkOpener> Supervisor<O> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opener: O,
        files: OutputFiles,
        fanout: SocketFanOut,
        coalescer: Coalescer,
        state: RunState,
        clock: Arc<dyn Clock>,
        settings: SupervisorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            opener,
            files,
            fanout,
            coalescer,
            state,
            metrics: Metrics::new(),
            clock,
            settings,
            shutdown,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Runs link sessions until a stop is requested (or, in replay mode,
    /// the capture ends).
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            service = %self.settings.service_name,
            device = %self.opener.describe(),
            destinations = self.fanout.len(),
            run_number = self.state.run_number,
            "acquisition starting"
        );
        loop {
            match self.run_session().await? {
                SessionEnd::Shutdown => break,
                SessionEnd::LinkClosed(CloseReason::EndOfStream)
                    if self.settings.stop_at_end_of_stream =>
                {
                    tracing::info!(service = %self.settings.service_name, "end of stream, stopping");
                    break;
                }
                SessionEnd::OpenFailed => {
                    self.backoff().await;
                }
                SessionEnd::LinkClosed(reason) => {
                    tracing::info!(?reason, "reopening link");
                }
            }
        }
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            service = %self.settings.service_name,
            bytes_read = snapshot.bytes_read,
            flushes = snapshot.flushes,
            rotations = snapshot.rotations,
            "acquisition stopped"
        );
        Ok(())
    }

    /// One link lifetime: open the link, then keep a file open and run
    /// coalescer cycles until the link has to close.
    pub async fn run_session(&mut self) -> Result<SessionEnd> {
        if self.stop_requested() {
            return Ok(SessionEnd::Shutdown);
        }
        let mut link = match self.opener.open().await {
            Ok(link) => link,
            Err(err) => {
                tracing::warn!(
                    device = %self.opener.describe(),
                    error = %format!("{err:#}"),
                    "device unavailable"
                );
                return Ok(SessionEnd::OpenFailed);
            }
        };
        self.state.reset_link_counters();
        self.metrics.record_link_open();

        let end = loop {
            let Some(mut file) = self.open_file().await else {
                break SessionEnd::Shutdown;
            };
            match self.pump(&mut link, &mut file).await {
                Cycle::RotateFile => {
                    self.close_file(file).await;
                    self.metrics.record_rotation();
                    tracing::info!(run_number = self.state.run_number, "rotating output file");
                }
                Cycle::CloseLink(reason) => {
                    self.close_file(file).await;
                    break SessionEnd::LinkClosed(reason);
                }
                Cycle::Continue => {
                    self.close_file(file).await;
                    break SessionEnd::Shutdown;
                }
            }
        };
        link.close().await;
        Ok(end)
    }

    /// Runs cycles until one asks for rotation or link closure. `Continue`
    /// is returned only when a stop was requested.
    async fn pump(&mut self, link: &mut O::Link, file: &mut OutputFile) -> Cycle {
        loop {
            if self.stop_requested() {
                return Cycle::Continue;
            }
            let clock = &self.clock;
            let cycle = self
                .coalescer
                .cycle(
                    link,
                    file,
                    &self.fanout,
                    &mut self.state,
                    &mut self.metrics,
                    || clock.now(),
                )
                .await;
            self.metrics
                .maybe_heartbeat(&self.settings.service_name, self.settings.heartbeat_interval);
            if cycle != Cycle::Continue {
                return cycle;
            }
        }
    }

    /// Opens the next output file, retrying after the backoff on failure.
    /// `None` means a stop was requested first.
    async fn open_file(&mut self) -> Option<OutputFile> {
        loop {
            if self.stop_requested() {
                return None;
            }
            match self.files.open_next(&mut self.state, self.clock.now()).await {
                Ok(file) => return Some(file),
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "cannot open output file");
                    self.backoff().await;
                }
            }
        }
    }

    /// Sends pending bytes, closes the file and moves to the next run number.
    async fn close_file(&mut self, file: OutputFile) {
        self.coalescer
            .drain(&self.fanout, &mut self.state, &mut self.metrics)
            .await;
        if let Err(err) = file.close().await {
            tracing::error!(error = %format!("{err:#}"), "failed to close output file");
        }
        self.state.run_number = self.state.run_number.saturating_add(1);
    }

    async fn backoff(&mut self) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = sleep(self.settings.reopen_backoff) => {}
            Ok(()) = shutdown.changed() => {}
        }
    }
}
