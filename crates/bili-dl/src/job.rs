//! Download job lifecycle and per-part reports.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use bili_client::NegotiatedPair;

use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Shared mutable progress of one job. Written only by the downloader;
/// terminal states are final.
#[derive(Debug)]
pub(crate) struct JobProgress {
    status: Mutex<JobStatus>,
    attempts: AtomicU32,
}

impl JobProgress {
    pub(crate) fn new() -> Self {
        Self {
            status: Mutex::new(JobStatus::Pending),
            attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn status(&self) -> JobStatus {
        *self.status.lock()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn set(&self, next: JobStatus) {
        let mut status = self.status.lock();
        if status.is_terminal() {
            debug!(from = ?*status, to = ?next, "ignoring transition out of a terminal job state");
            return;
        }
        *status = next;
    }

    pub(crate) fn begin(&self) {
        self.set(JobStatus::InProgress);
    }

    /// Record that attempt `attempt` (0-indexed) of either stream started.
    pub(crate) fn record_attempt(&self, attempt: u32) {
        self.attempts.fetch_max(attempt + 1, Ordering::Relaxed);
        if attempt > 0 {
            self.set(JobStatus::Retrying);
        }
    }

    pub(crate) fn complete(&self) {
        self.set(JobStatus::Completed);
    }

    pub(crate) fn fail(&self) {
        self.set(JobStatus::Failed);
    }
}

/// One part's download: the negotiated pair plus the local paths it targets.
#[derive(Debug)]
pub struct DownloadJob {
    pub part_index: u32,
    pub part_title: String,
    pub pair: NegotiatedPair,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    progress: JobProgress,
}

impl DownloadJob {
    pub fn new(
        part_index: u32,
        part_title: String,
        pair: NegotiatedPair,
        video_path: PathBuf,
        audio_path: PathBuf,
        output_path: PathBuf,
    ) -> Self {
        Self {
            part_index,
            part_title,
            pair,
            video_path,
            audio_path,
            output_path,
            progress: JobProgress::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.progress.status()
    }

    /// Highest attempt count either stream needed.
    pub fn attempts(&self) -> u32 {
        self.progress.attempts()
    }

    pub(crate) fn progress(&self) -> &JobProgress {
        &self.progress
    }
}

/// Which parts of a multi-part video to download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PartSelection {
    #[default]
    All,
    Single(u32),
    Set(Vec<u32>),
}

impl PartSelection {
    pub fn includes(&self, index: u32) -> bool {
        match self {
            Self::All => true,
            Self::Single(wanted) => *wanted == index,
            Self::Set(wanted) => wanted.contains(&index),
        }
    }

    /// Explicitly requested indices absent from `available`.
    pub fn missing_from(&self, available: &[u32]) -> Vec<u32> {
        match self {
            Self::All => Vec::new(),
            Self::Single(wanted) => {
                if available.contains(wanted) {
                    Vec::new()
                } else {
                    vec![*wanted]
                }
            }
            Self::Set(wanted) => wanted
                .iter()
                .filter(|w| !available.contains(w))
                .copied()
                .collect(),
        }
    }
}

/// Structured per-part result handed back to the presentation layer.
#[derive(Debug)]
pub struct PartReport {
    pub part_index: u32,
    pub part_title: String,
    pub status: JobStatus,
    pub attempts: u32,
    /// The muxed file, present on full success.
    pub output: Option<PathBuf>,
    /// Downloaded sources, preserved when only the mux step failed.
    pub media_paths: Option<(PathBuf, PathBuf)>,
    pub error: Option<TransferError>,
}

impl PartReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.output.is_some()
    }
}
