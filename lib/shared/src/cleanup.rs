use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A playlist/track mutation that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub playlist: String,
    pub uri: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub dry_run: bool,
    pub groups_processed: usize,
    /// Duplicate instances eliminated (or that would be, in a dry run).
    pub tracks_removed: usize,
    /// Successful remote mutation calls. Always zero in a dry run.
    pub spotify_operations: usize,
    pub planned_operations: usize,
    pub playlists_updated: BTreeSet<String>,
    pub errors: Vec<OperationError>,
}
