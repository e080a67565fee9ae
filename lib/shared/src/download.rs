use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::track::TrackRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Succeeded | DownloadStatus::Failed)
    }
}

/// Bookkeeping for one requested track during a download operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub track_uri: String,
    pub status: DownloadStatus,
    /// Present iff the job failed.
    pub error_message: Option<String>,
    pub mapping_created: bool,
    /// Answered from the session's record of finished downloads.
    #[serde(default)]
    pub already_downloaded: bool,
}

impl DownloadJob {
    pub fn pending(uri: &str) -> Self {
        Self {
            track_uri: uri.to_string(),
            status: DownloadStatus::Pending,
            error_message: None,
            mapping_created: false,
            already_downloaded: false,
        }
    }

    pub fn start(&mut self) {
        if self.status == DownloadStatus::Pending {
            self.status = DownloadStatus::InFlight;
        }
    }

    pub fn succeed(&mut self, mapping_created: bool) {
        self.status = DownloadStatus::Succeeded;
        self.error_message = None;
        self.mapping_created = mapping_created;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = DownloadStatus::Failed;
        self.error_message = Some(message.into());
        self.mapping_created = false;
    }

    pub fn already_downloaded(uri: &str) -> Self {
        Self {
            track_uri: uri.to_string(),
            status: DownloadStatus::Succeeded,
            error_message: None,
            mapping_created: false,
            already_downloaded: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed_count: usize,
    pub total_count: usize,
    pub current_track_uri: Option<String>,
}

/// Aggregated outcome of a batch. Partial success is a normal result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    /// One terminal job per dispatched uri, in request order.
    pub jobs: Vec<DownloadJob>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Tracks dropped before dispatch because they had no uri.
    pub skipped_invalid: usize,
    pub errors: BTreeMap<String, String>,
}

impl BatchResult {
    pub fn empty(skipped_invalid: usize) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            jobs: Vec::new(),
            success_count: 0,
            failure_count: 0,
            skipped_invalid,
            errors: BTreeMap::new(),
        }
    }

    pub fn from_jobs(batch_id: Uuid, jobs: Vec<DownloadJob>, skipped_invalid: usize) -> Self {
        let success_count = jobs
            .iter()
            .filter(|j| j.status == DownloadStatus::Succeeded)
            .count();
        let errors: BTreeMap<String, String> = jobs
            .iter()
            .filter_map(|j| {
                j.error_message
                    .as_ref()
                    .map(|e| (j.track_uri.clone(), e.clone()))
            })
            .collect();
        let failure_count = jobs
            .iter()
            .filter(|j| j.status == DownloadStatus::Failed)
            .count();
        Self {
            batch_id,
            jobs,
            success_count,
            failure_count,
            skipped_invalid,
            errors,
        }
    }

    pub fn job(&self, uri: &str) -> Option<&DownloadJob> {
        self.jobs.iter().find(|j| j.track_uri == uri)
    }
}

/// Reply of the acquisition service for a single track.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AcquisitionOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub mapping_created: bool,
    #[serde(default)]
    pub track_info: Option<TrackRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AcquiredItem {
    pub uri: String,
    #[serde(default)]
    pub mapping_created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FailedItem {
    pub uri: String,
    pub error: String,
}

/// Reply of the acquisition service for several tracks at once.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchAcquisitionOutcome {
    pub success: bool,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub failure_count: usize,
    #[serde(default)]
    pub successful: Vec<AcquiredItem>,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
    #[serde(default)]
    pub message: Option<String>,
}
