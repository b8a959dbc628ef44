// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::cleaner::{clean_csv_file, load_recipients};
use crate::config::ConfigStore;
use crate::dispatcher::Dispatch;
use crate::error::CampaignError;

/// File name of the cleaned recipient list inside the uploads directory
pub const CLEANED_CSV_FILE: &str = "cleaned_emails.csv";

/// Pause between two consecutive sends
pub const SEND_DELAY: Duration = Duration::from_secs(2);

const PANIC_REASON: &str = "Campaign thread panicked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    #[default]
    NotStarted,
    Running,
    Error,
    Completed,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Progress::NotStarted => "Not started",
            Progress::Running => "Running",
            Progress::Error => "Error",
            Progress::Completed => "Completed",
        };
        f.write_str(label)
    }
}

/// Progress of the current (or last) campaign run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignStatus {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub progress: Progress,
    /// Why the run stopped, set together with [`Progress::Error`]
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Shared view of a runner's [`CampaignStatus`].
///
/// The campaign thread is the only writer; readers get cloned snapshots.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<CampaignStatus>>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> CampaignStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut CampaignStatus)) {
        let mut status = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    /// Moves to Running with fresh counters, unless a run is already in flight
    fn begin(&self) -> Result<(), CampaignError> {
        let mut status = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if status.progress == Progress::Running {
            return Err(CampaignError::AlreadyRunning);
        }
        *status = CampaignStatus {
            progress: Progress::Running,
            start_time: Some(Utc::now()),
            ..CampaignStatus::default()
        };
        Ok(())
    }

    fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(|status| {
            status.progress = Progress::Error;
            status.error = Some(reason);
            status.end_time = Some(Utc::now());
        });
    }
}

/// Marks the run failed if it unwinds before reaching Completed or Error
struct RunGuard<'a> {
    status: &'a StatusHandle,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.status.snapshot().progress == Progress::Running {
            error!("Campaign thread panicked");
            self.status.fail(PANIC_REASON);
        }
    }
}

/// Handle to a campaign running on its own thread
pub struct CampaignHandle {
    thread: JoinHandle<()>,
    status: StatusHandle,
}

impl CampaignHandle {
    pub fn status(&self) -> CampaignStatus {
        self.status.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the run ends and returns its final status
    pub fn join(self) -> CampaignStatus {
        if self.thread.join().is_err() && self.status.snapshot().progress == Progress::Running {
            self.status.fail(PANIC_REASON);
        }
        self.status.snapshot()
    }
}

/// Cleans the configured recipient list and sends one email per row, in order.
///
/// Only one run can be in flight per runner; [`CampaignRunner::start`] and
/// [`CampaignRunner::run`] both reject a second one with
/// [`CampaignError::AlreadyRunning`].
pub struct CampaignRunner {
    store: ConfigStore,
    cleaned_path: PathBuf,
    dispatcher: Arc<dyn Dispatch>,
    status: StatusHandle,
    send_delay: Duration,
}

impl CampaignRunner {
    pub fn new(store: ConfigStore, upload_dir: &Path, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            store,
            cleaned_path: upload_dir.join(CLEANED_CSV_FILE),
            dispatcher,
            status: StatusHandle::default(),
            send_delay: SEND_DELAY,
        }
    }

    pub fn with_send_delay(mut self, send_delay: Duration) -> Self {
        self.send_delay = send_delay;
        self
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn cleaned_path(&self) -> &Path {
        &self.cleaned_path
    }

    /// Launches a run on a background thread
    pub fn start(self: &Arc<Self>) -> Result<CampaignHandle, CampaignError> {
        self.status.begin()?;

        let runner = Arc::clone(self);
        let thread = thread::Builder::new()
            .name("campaign".into())
            .spawn(move || runner.execute())
            .map_err(|e| {
                error!(error = %e, "Failed to spawn campaign thread");
                self.status.fail(format!("Failed to start campaign: {}", e));
                CampaignError::Spawn(e)
            })?;

        Ok(CampaignHandle {
            thread,
            status: self.status.clone(),
        })
    }

    /// Runs a campaign to completion on the calling thread
    pub fn run(&self) -> Result<(), CampaignError> {
        self.status.begin()?;
        self.execute();
        Ok(())
    }

    #[instrument(name = "campaign", skip(self), fields(cleaned = %self.cleaned_path.display()))]
    fn execute(&self) {
        let _guard = RunGuard {
            status: &self.status,
        };

        let config = match self.store.load() {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to load configuration");
                self.status.fail(format!("Error loading config: {}", e));
                return;
            }
        };
        info!(input = %config.csv_file_path, "Campaign started");

        let cleaned = clean_csv_file(
            Path::new(&config.csv_file_path),
            &self.cleaned_path,
            &config.email_column_name,
            &config.first_name_column_name,
        );
        if cleaned.is_err() {
            self.status.fail("Error cleaning CSV");
            return;
        }

        let recipients = match load_recipients(
            &self.cleaned_path,
            &config.email_column_name,
            &config.first_name_column_name,
        ) {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(error = %e, "Failed to read cleaned CSV");
                self.status.fail("Error reading CSV");
                return;
            }
        };

        self.status.update(|status| status.total = recipients.len());

        for (index, recipient) in recipients.iter().enumerate() {
            if index > 0 && !self.send_delay.is_zero() {
                thread::sleep(self.send_delay);
            }

            match self.dispatcher.dispatch(recipient, &config) {
                Ok(()) => self.status.update(|status| status.sent += 1),
                Err(e) => {
                    warn!(recipient = %recipient.email, error = %e, "Send failed, continuing");
                    self.status.update(|status| status.failed += 1);
                }
            }
        }

        self.status.update(|status| {
            status.end_time = Some(Utc::now());
            status.progress = Progress::Completed;
        });

        let status = self.status.snapshot();
        info!(
            total = status.total,
            sent = status.sent,
            failed = status.failed,
            "Campaign completed"
        );
    }
}
