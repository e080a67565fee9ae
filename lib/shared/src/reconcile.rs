use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::track::TrackRecord;

/// One complete comparison of the master collection against local files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSnapshot {
    pub master_tracks: Vec<TrackRecord>,
    pub missing_tracks: Vec<TrackRecord>,
    pub local_track_count: usize,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub master_tracks_dir: Option<String>,
}

/// Reply of the comparison source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComparisonResponse {
    pub success: bool,
    #[serde(default)]
    pub master_tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub missing_tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub local_track_count: usize,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub master_tracks_dir: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
