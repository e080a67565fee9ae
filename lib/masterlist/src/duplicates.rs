//! Classification of duplicate candidates and the selection workflow that
//! gates cleanup.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::{
    cleanup::CleanupResult,
    library::{CandidateGroup, DuplicateGroup, DuplicateSummary},
    PlaylistRef, TrackRecord,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::DuplicateSource;

/// Stable id for a set of tracks: independent of member order.
pub fn group_id_for(tracks: &[TrackRecord]) -> String {
    let uris: Vec<&str> = tracks.iter().map(|t| t.uri.as_str()).sorted().collect();
    let digest = Sha256::digest(uris.join("\n").as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// The track kept for a group, and how it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Auto(TrackRecord),
    Manual(TrackRecord),
}

impl Resolution {
    pub fn keep(&self) -> &TrackRecord {
        match self {
            Resolution::Auto(t) | Resolution::Manual(t) => t,
        }
    }
}

/// User choices, keyed by group id. Session scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionMap(HashMap<String, String>);

impl SelectionMap {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, group_id: impl Into<String>, uri: impl Into<String>) {
        self.0.insert(group_id.into(), uri.into());
    }

    pub fn get(&self, group_id: &str) -> Option<&str> {
        self.0.get(group_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops entries that no longer point into a known group.
    pub fn retain_valid(&mut self, groups: &[DuplicateGroup]) {
        let by_id: HashMap<&str, &DuplicateGroup> =
            groups.iter().map(|g| (g.group_id.as_str(), g)).collect();
        self.0.retain(|group_id, uri| {
            by_id
                .get(group_id.as_str())
                .is_some_and(|g| g.contains_uri(uri))
        });
    }
}

impl FromIterator<(String, String)> for SelectionMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub struct DuplicateGroupResolver {
    source: Arc<dyn DuplicateSource>,
}

impl DuplicateGroupResolver {
    pub fn new(source: Arc<dyn DuplicateSource>) -> Self {
        Self { source }
    }

    /// Runs detection on the candidate source and classifies the result.
    pub async fn detect(&self) -> Result<Vec<DuplicateGroup>> {
        let scan = self.source.detect_duplicates().await?;
        if !scan.success {
            let message = scan
                .message
                .unwrap_or_else(|| "duplicate detection failed".to_string());
            return Err(SyncError::SourceRejected(message));
        }
        let groups = Self::classify(&scan.groups);
        let summary = Self::summarize(&groups);
        info!(
            "Detected {} duplicate groups ({} need a selection)",
            summary.total_groups, summary.groups_requiring_selection
        );
        Ok(groups)
    }

    /// Pure classification; input order is preserved.
    pub fn classify(candidates: &[CandidateGroup]) -> Vec<DuplicateGroup> {
        candidates.iter().filter_map(classify_group).collect()
    }

    pub fn summarize(groups: &[DuplicateGroup]) -> DuplicateSummary {
        let groups_requiring_selection = groups
            .iter()
            .filter(|g| g.requires_user_selection)
            .count();
        DuplicateSummary {
            total_groups: groups.len(),
            groups_requiring_selection,
            groups_auto_resolved: groups.len() - groups_requiring_selection,
            duplicate_tracks: groups.iter().map(|g| g.all_tracks.len() - 1).sum(),
        }
    }

    /// Ids of groups that still need a user choice.
    pub fn pending_selection(groups: &[DuplicateGroup], selections: &SelectionMap) -> Vec<String> {
        groups
            .iter()
            .filter(|g| g.requires_user_selection && selections.get(&g.group_id).is_none())
            .map(|g| g.group_id.clone())
            .collect()
    }

    pub fn resolve(group: &DuplicateGroup, selections: &SelectionMap) -> Result<Resolution> {
        if let Some(uri) = selections.get(&group.group_id) {
            return group
                .track(uri)
                .cloned()
                .map(Resolution::Manual)
                .ok_or_else(|| {
                    SyncError::Validation(format!(
                        "selection {uri} is not a member of group {}",
                        group.group_id
                    ))
                });
        }
        match &group.primary_track {
            Some(primary) => Ok(Resolution::Auto(primary.clone())),
            None => Err(SyncError::ManualSelectionRequired {
                group_ids: vec![group.group_id.clone()],
            }),
        }
    }

    /// Resolves every group, reporting all missing selections at once.
    pub fn resolve_all(
        groups: &[DuplicateGroup],
        selections: &SelectionMap,
    ) -> Result<Vec<Resolution>> {
        let pending = Self::pending_selection(groups, selections);
        if !pending.is_empty() {
            return Err(SyncError::ManualSelectionRequired { group_ids: pending });
        }
        groups
            .iter()
            .map(|g| Self::resolve(g, selections))
            .collect()
    }
}

fn classify_group(candidate: &CandidateGroup) -> Option<DuplicateGroup> {
    let mut all_tracks: Vec<TrackRecord> = Vec::new();
    let mut memberships: BTreeMap<String, Vec<PlaylistRef>> = BTreeMap::new();

    if candidate.playlists_per_track.len() != candidate.all_tracks.len() {
        warn!(
            "Candidate group lists playlists for {} of {} tracks; the rest count as in no playlist",
            candidate.playlists_per_track.len(),
            candidate.all_tracks.len()
        );
    }

    for (index, track) in candidate.all_tracks.iter().enumerate() {
        if !track.has_uri() {
            warn!("Ignoring duplicate candidate without uri: '{}'", track.title);
            continue;
        }
        let playlists = candidate
            .playlists_per_track
            .get(index)
            .cloned()
            .unwrap_or_default();
        let entry = memberships.entry(track.uri.clone()).or_default();
        for playlist in playlists {
            if !entry.iter().any(|p| p.id == playlist.id) {
                entry.push(playlist);
            }
        }
        if !all_tracks.contains(track) {
            all_tracks.push(track.clone());
        }
    }

    if all_tracks.len() < 2 {
        warn!(
            "Skipping candidate group with {} usable track(s)",
            all_tracks.len()
        );
        return None;
    }

    let playlists_affected: Vec<PlaylistRef> = all_tracks
        .iter()
        .flat_map(|t| memberships.get(&t.uri).into_iter().flatten())
        .unique_by(|p| p.id.clone())
        .cloned()
        .collect();

    // unknown durations never win
    let longest = all_tracks
        .iter()
        .filter(|t| t.known_duration().is_some())
        .max_set_by_key(|t| t.known_duration());
    let primary_track = match longest.as_slice() {
        [only] => Some((*only).clone()),
        _ => None,
    };

    let duplicates = match &primary_track {
        Some(primary) => all_tracks
            .iter()
            .filter(|t| *t != primary)
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    let group_id = group_id_for(&all_tracks);
    debug!(
        "Group {}: {} tracks, primary {:?}",
        group_id,
        all_tracks.len(),
        primary_track.as_ref().map(|t| &t.uri)
    );

    Some(DuplicateGroup {
        group_id,
        requires_user_selection: primary_track.is_none(),
        all_tracks,
        primary_track,
        duplicates,
        memberships,
        playlists_affected,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Detected,
    AwaitingSelection,
    ReadyForCleanup,
    Previewed,
    Applied,
}

/// Session state of one duplicate cleanup.
#[derive(Debug, Clone)]
pub struct DuplicateWorkflow {
    groups: Vec<DuplicateGroup>,
    selections: SelectionMap,
    state: WorkflowState,
    last_result: Option<CleanupResult>,
}

impl DuplicateWorkflow {
    pub fn new(groups: Vec<DuplicateGroup>) -> Self {
        let mut workflow = Self {
            groups,
            selections: SelectionMap::new(),
            state: WorkflowState::Detected,
            last_result: None,
        };
        workflow.settle();
        workflow
    }

    fn settle(&mut self) {
        self.state = if self.groups.is_empty() {
            WorkflowState::Detected
        } else if self.pending_selection().is_empty() {
            WorkflowState::ReadyForCleanup
        } else {
            WorkflowState::AwaitingSelection
        };
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    pub fn selections(&self) -> &SelectionMap {
        &self.selections
    }

    pub fn summary(&self) -> DuplicateSummary {
        DuplicateGroupResolver::summarize(&self.groups)
    }

    pub fn last_result(&self) -> Option<&CleanupResult> {
        self.last_result.as_ref()
    }

    pub fn pending_selection(&self) -> Vec<String> {
        DuplicateGroupResolver::pending_selection(&self.groups, &self.selections)
    }

    /// Records a user choice. The uri must belong to the group.
    pub fn select(&mut self, group_id: &str, uri: &str) -> Result<()> {
        if self.state == WorkflowState::Applied {
            return Err(SyncError::Validation(
                "cleanup already applied, run detection again".to_string(),
            ));
        }
        let group = self
            .groups
            .iter()
            .find(|g| g.group_id == group_id)
            .ok_or_else(|| SyncError::Validation(format!("unknown group {group_id}")))?;
        if !group.contains_uri(uri) {
            return Err(SyncError::Validation(format!(
                "selection {uri} is not a member of group {group_id}"
            )));
        }
        self.selections.insert(group_id, uri);
        // a new choice invalidates an earlier preview
        self.settle();
        Ok(())
    }

    pub fn resolutions(&self) -> Result<Vec<Resolution>> {
        DuplicateGroupResolver::resolve_all(&self.groups, &self.selections)
    }

    fn ensure_cleanup_allowed(&self) -> Result<()> {
        match self.state {
            WorkflowState::ReadyForCleanup | WorkflowState::Previewed => Ok(()),
            WorkflowState::AwaitingSelection => Err(SyncError::ManualSelectionRequired {
                group_ids: self.pending_selection(),
            }),
            other => Err(SyncError::Validation(format!(
                "cleanup not allowed in state {other:?}"
            ))),
        }
    }

    pub fn record_preview(&mut self, result: &CleanupResult) -> Result<()> {
        self.ensure_cleanup_allowed()?;
        if !result.dry_run {
            return Err(SyncError::Validation(
                "preview must come from a dry run".to_string(),
            ));
        }
        if result.groups_processed != self.groups.len() {
            return Err(SyncError::Validation(format!(
                "preview covered {} groups, expected {}",
                result.groups_processed,
                self.groups.len()
            )));
        }
        self.state = WorkflowState::Previewed;
        self.last_result = Some(result.clone());
        Ok(())
    }

    pub fn record_applied(&mut self, result: &CleanupResult) -> Result<()> {
        self.ensure_cleanup_allowed()?;
        if result.dry_run {
            return Err(SyncError::Validation(
                "a dry run does not apply a cleanup".to_string(),
            ));
        }
        self.state = WorkflowState::Applied;
        self.last_result = Some(result.clone());
        Ok(())
    }

    /// True after a live cleanup removed something: residual duplicates
    /// may exist through merged playlist memberships.
    pub fn needs_redetection(&self) -> bool {
        self.state == WorkflowState::Applied
            && self
                .last_result
                .as_ref()
                .is_some_and(|r| r.tracks_removed > 0)
    }

    /// Starts over with freshly detected groups, keeping still-valid choices.
    pub fn redetect(&mut self, groups: Vec<DuplicateGroup>) {
        self.groups = groups;
        self.selections.retain_valid(&self.groups);
        self.last_result = None;
        self.settle();
    }
}
