use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::AsyncWriteExt,
};

use crate::params::{AcquisitionParams, ParameterStore};
use crate::state::RunState;
use crate::template::{format_timestamp, FilenameTemplate};

/// Opens run-numbered, timestamped output files and records each open.
pub struct OutputFiles {
    directory: String,
    template: FilenameTemplate,
    timestamp_format: String,
    store: ParameterStore,
}

impl OutputFiles {
    pub fn new(params: &AcquisitionParams, store: ParameterStore) -> Self {
        Self {
            directory: params.data_directory.clone(),
            template: params.filename_template.clone(),
            timestamp_format: params.timestamp_format.clone(),
            store,
        }
    }

    pub fn path_for(&self, run_number: u32, now: DateTime<Utc>) -> PathBuf {
        let timestamp = format_timestamp(now, &self.timestamp_format);
        self.template.render(&self.directory, run_number, &timestamp)
    }

    /// Creates (or truncates) the file for `state.run_number`, then persists
    /// the next run number and records `now` as the latest open.
    pub async fn open_next(&self, state: &mut RunState, now: DateTime<Utc>) -> Result<OutputFile> {
        let path = self.path_for(state.run_number, now);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create data directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        let next = state.run_number.saturating_add(1);
        if let Err(err) = self.store.store_run_number(next) {
            tracing::error!(error = %err, run_number = next, "failed to persist run number");
        }
        state.file_opens.record(now);
        tracing::info!(path = %path.display(), run_number = state.run_number, "output file opened");

        Ok(OutputFile {
            file,
            path,
            bytes_written: 0,
        })
    }
}

/// The currently open output file.
pub struct OutputFile {
    file: File,
    path: PathBuf,
    bytes_written: u64,
}

impl OutputFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Issues a single write, waits for it to reach the OS and returns the
    /// byte count accepted. Short writes and failures are reported, not
    /// retried.
    pub async fn write(&mut self, bytes: &[u8]) -> usize {
        let outcome = match self.file.write(bytes).await {
            Ok(written) => self.file.flush().await.map(|()| written),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(written) => {
                if written < bytes.len() {
                    tracing::warn!(
                        path = %self.path.display(),
                        written,
                        expected = bytes.len(),
                        "short write to output file"
                    );
                }
                self.bytes_written += written as u64;
                written
            }
            Err(err) => {
                tracing::error!(path = %self.path.display(), error = %err, "output file write failed");
                0
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        tracing::info!(
            path = %self.path.display(),
            bytes = self.bytes_written,
            "output file closed"
        );
        Ok(())
    }
}
