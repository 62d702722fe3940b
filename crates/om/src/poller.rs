//! Installation poller.
//!
//! Apply changes, delete installation and import installation all start an
//! asynchronous job on the appliance and then wait for it here. The
//! appliance always returns the cumulative log, so [`LogWriter`] keeps the
//! offset of what was already emitted and only writes the new suffix.

use std::io::Write;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::api::{Api, ApiError, Installation, InstallationStatus};
use crate::error::{Classify, ErrorKind};
use crate::ui::Console;

/// Default pause between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which job is being waited on; only changes the failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ApplyChanges,
    DeleteInstallation,
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("installation failed to get status: {0}")]
    Status(#[source] ApiError),

    #[error("installation failed to get logs: {0}")]
    Logs(#[source] ApiError),

    #[error("installation failed to flush logs: {0}")]
    Flush(#[from] std::io::Error),

    #[error("{}", match .0 {
        Operation::ApplyChanges => "installation was unsuccessful",
        Operation::DeleteInstallation => "deleting the installation was unsuccessful",
    })]
    Failed(Operation),
}

impl Classify for PollError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Status(e) | Self::Logs(e) => e.kind(),
            Self::Flush(_) => ErrorKind::Other,
            Self::Failed(_) => ErrorKind::InstallFailed,
        }
    }
}

/// Writes the unseen suffix of a cumulative log.
pub struct LogWriter<W> {
    sink: W,
    emitted: usize,
}

impl<W: Write> LogWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, emitted: 0 }
    }

    /// Emit whatever `logs` holds beyond the last emission. A log shorter
    /// than what was already written emits nothing.
    pub fn flush(&mut self, logs: &str) -> std::io::Result<()> {
        let bytes = logs.as_bytes();
        if bytes.len() <= self.emitted {
            return Ok(());
        }
        self.sink.write_all(&bytes[self.emitted..])?;
        self.sink.flush()?;
        self.emitted = bytes.len();
        Ok(())
    }

    /// Bytes emitted so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.emitted
    }
}

/// `Started:` timestamp the way the re-attach messages print it.
#[must_use]
pub fn started_at(installation: &Installation) -> String {
    installation
        .started_at
        .map(|t| t.format("%a %b %e %H:%M:%S UTC %Y").to_string())
        .unwrap_or_default()
}

/// Polls one installation until it reaches a terminal status.
pub struct Poller<'a> {
    api: &'a Api,
    console: &'a Console,
    interval: Duration,
}

impl<'a> Poller<'a> {
    #[must_use]
    pub fn new(api: &'a Api, console: &'a Console, interval: Duration) -> Self {
        Self {
            api,
            console,
            interval,
        }
    }

    /// Stream logs of installation `id` to the output sink until it finishes.
    ///
    /// Dropping the returned future stops polling; the remote job keeps running.
    pub async fn wait(&self, id: u64, operation: Operation) -> Result<(), PollError> {
        let mut writer = LogWriter::new(self.console.output());
        loop {
            let status = self
                .api
                .installation_status(id)
                .await
                .map_err(PollError::Status)?;
            let logs = self
                .api
                .installation_logs(id)
                .await
                .map_err(PollError::Logs)?;
            writer.flush(&logs)?;
            debug!(id, ?status, offset = writer.offset(), "polled installation");

            match status {
                InstallationStatus::Succeeded => return Ok(()),
                InstallationStatus::Failed => return Err(PollError::Failed(operation)),
                InstallationStatus::Running | InstallationStatus::Unknown => {}
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
