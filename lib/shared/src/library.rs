use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::track::{PlaylistRef, TrackRecord};

/// Raw candidate group as reported by the duplicate source.
///
/// `playlists_per_track[i]` lists the playlists containing `all_tracks[i]`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandidateGroup {
    pub all_tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub playlists_per_track: Vec<Vec<PlaylistRef>>,
}

/// Response of a duplicate detection run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DuplicateScan {
    pub success: bool,
    #[serde(default)]
    pub groups: Vec<CandidateGroup>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A classified group of tracks judged to be the same song
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub group_id: String,
    pub all_tracks: Vec<TrackRecord>,
    /// `None` while the group waits for a user selection.
    pub primary_track: Option<TrackRecord>,
    /// `all_tracks` minus the primary. Empty while no primary is known.
    pub duplicates: Vec<TrackRecord>,
    /// Playlists containing each member, keyed by uri.
    pub memberships: BTreeMap<String, Vec<PlaylistRef>>,
    /// Union of every member's playlists.
    pub playlists_affected: Vec<PlaylistRef>,
    pub requires_user_selection: bool,
}

impl DuplicateGroup {
    pub fn contains_uri(&self, uri: &str) -> bool {
        self.all_tracks.iter().any(|t| t.uri == uri)
    }

    pub fn track(&self, uri: &str) -> Option<&TrackRecord> {
        self.all_tracks.iter().find(|t| t.uri == uri)
    }

    pub fn playlists_of(&self, uri: &str) -> &[PlaylistRef] {
        self.memberships.get(uri).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every member except the one being kept.
    pub fn removal_candidates(&self, keep_uri: &str) -> Vec<&TrackRecord> {
        self.all_tracks
            .iter()
            .filter(|t| t.uri != keep_uri)
            .collect()
    }

    pub fn playlist_names(&self) -> Vec<&str> {
        self.playlists_affected
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Counts derived from a classified list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DuplicateSummary {
    pub total_groups: usize,
    pub groups_requiring_selection: usize,
    pub groups_auto_resolved: usize,
    pub duplicate_tracks: usize,
}
