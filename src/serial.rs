use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::{timeout_at, Instant};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;

/// Result of one bounded read from the instrument.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n > 0` bytes were placed at the start of the buffer.
    Data(usize),
    /// Nothing arrived before the read timeout. The instrument is idle.
    Timeout,
    /// The source reported end of file: replay exhausted or device gone.
    EndOfStream,
    Failed(io::Error),
}

/// An open byte source delivering instrument frames.
#[async_trait]
pub trait FrameLink: Send {
    async fn read(&mut self, buf: &mut [u8]) -> ReadOutcome;

    /// Releases the underlying handle. Safe to call more than once.
    async fn close(&mut self);
}

/// Knows how to (re)open a [`FrameLink`].
#[async_trait]
pub trait LinkOpener: Send {
    type Link: FrameLink;

    async fn open(&mut self) -> Result<Self::Link>;

    fn describe(&self) -> String;
}

/// Line discipline applied to the serial port.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Read granularity: a read waits for at least this many bytes.
    pub frame_size: usize,
    pub read_timeout: Duration,
}

enum LinkSource {
    Serial(SerialStream),
    File(File),
}

impl LinkSource {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            LinkSource::Serial(stream) => stream.read(buf).await,
            LinkSource::File(file) => file.read(buf).await,
        }
    }
}

/// Opens the instrument at `path`. Character devices are configured as a
/// raw 8-N-1 serial port; regular files and FIFOs are read as-is, which
/// lets a capture be replayed through the same pipeline.
pub struct SerialLinkOpener {
    path: String,
    settings: LinkSettings,
}

impl SerialLinkOpener {
    pub fn new(path: impl Into<String>, settings: LinkSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }
}

#[async_trait]
impl LinkOpener for SerialLinkOpener {
    type Link = SerialLink;

    async fn open(&mut self) -> Result<SerialLink> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("device {} unavailable", self.path))?;

        let is_fifo_or_file = {
            #[cfg(unix)]
            {
                metadata.file_type().is_fifo() || metadata.is_file()
            }
            #[cfg(not(unix))]
            {
                metadata.is_file()
            }
        };

        let source = if is_fifo_or_file {
            let file = File::open(&self.path)
                .await
                .with_context(|| format!("failed to open FIFO/file {}", self.path))?;
            LinkSource::File(file)
        } else {
            let stream = tokio_serial::new(self.path.as_str(), self.settings.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .open_native_async()
                .with_context(|| format!("failed to open serial port {}", self.path))?;
            LinkSource::Serial(stream)
        };
        tracing::info!(
            device = %self.path,
            baud_rate = self.settings.baud_rate,
            replay = is_fifo_or_file,
            "link opened"
        );
        Ok(SerialLink {
            source: Some(source),
            settings: self.settings.clone(),
        })
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

pub struct SerialLink {
    source: Option<LinkSource>,
    settings: LinkSettings,
}

#[async_trait]
impl FrameLink for SerialLink {
    /// Waits until at least one frame worth of bytes (or `buf.len()` if
    /// smaller) arrived, or the read timeout elapsed. Partial data at the
    /// deadline is returned as data.
    async fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let Some(source) = self.source.as_mut() else {
            return ReadOutcome::Failed(io::Error::new(
                io::ErrorKind::NotConnected,
                "link is closed",
            ));
        };
        if buf.is_empty() {
            return ReadOutcome::Data(0);
        }
        let want = self.settings.frame_size.min(buf.len());
        let deadline = Instant::now() + self.settings.read_timeout;
        let mut filled = 0;
        while filled < want {
            match timeout_at(deadline, source.read_some(&mut buf[filled..])).await {
                Err(_elapsed) => break,
                Ok(Ok(0)) if filled == 0 => return ReadOutcome::EndOfStream,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(err)) if err.kind() == io::ErrorKind::TimedOut => break,
                Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(err)) if filled == 0 => return ReadOutcome::Failed(err),
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, bytes = filled, "read failed after partial frame");
                    break;
                }
            }
        }
        if filled == 0 {
            ReadOutcome::Timeout
        } else {
            ReadOutcome::Data(filled)
        }
    }

    async fn close(&mut self) {
        if self.source.take().is_some() {
            tracing::info!("link closed");
        }
    }
}
