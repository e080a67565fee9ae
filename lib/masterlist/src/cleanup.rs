use futures::{stream, StreamExt};
use shared::{
    cleanup::{CleanupResult, OperationError},
    library::DuplicateGroup,
    PlaylistRef,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tracing::{info, warn};

use crate::duplicates::{DuplicateGroupResolver, Resolution, SelectionMap};
use crate::error::{Result, SyncError};
use crate::PlaylistService;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Playlist mutations allowed in flight at once.
    pub max_in_flight: usize,
    /// Upper bound on detect/cleanup rounds in [`CleanupExecutor::converge`].
    pub max_rounds: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            max_rounds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Add,
    Remove,
}

#[derive(Debug, Clone)]
struct PlannedOp {
    group: usize,
    kind: OpKind,
    playlist: PlaylistRef,
    uri: String,
}

#[derive(Debug, Default)]
struct Plan {
    adds: Vec<PlannedOp>,
    removes: Vec<PlannedOp>,
    /// (group, uri) of every member that goes away.
    removed_tracks: Vec<(usize, String)>,
}

impl Plan {
    /// `added` holds (playlist id, uri) pairs this executor already added.
    fn build(
        groups: &[DuplicateGroup],
        resolutions: &[Resolution],
        added: &HashSet<(String, String)>,
    ) -> Self {
        let mut plan = Plan::default();
        for (index, (group, resolution)) in groups.iter().zip(resolutions).enumerate() {
            let keep = resolution.keep();
            let already_in: HashSet<&str> = group
                .playlists_of(&keep.uri)
                .iter()
                .map(|p| p.id.as_str())
                .collect();

            for playlist in &group.playlists_affected {
                let pair = (playlist.id.clone(), keep.uri.clone());
                if !already_in.contains(playlist.id.as_str()) && !added.contains(&pair) {
                    plan.adds.push(PlannedOp {
                        group: index,
                        kind: OpKind::Add,
                        playlist: playlist.clone(),
                        uri: keep.uri.clone(),
                    });
                }
            }

            for track in group.removal_candidates(&keep.uri) {
                let playlists = group.playlists_of(&track.uri);
                if playlists.is_empty() {
                    // nothing to remove it from
                    continue;
                }
                for playlist in playlists {
                    plan.removes.push(PlannedOp {
                        group: index,
                        kind: OpKind::Remove,
                        playlist: playlist.clone(),
                        uri: track.uri.clone(),
                    });
                }
                plan.removed_tracks.push((index, track.uri.clone()));
            }
        }
        plan
    }

    fn operation_count(&self) -> usize {
        self.adds.len() + self.removes.len()
    }

    fn playlist_names(&self) -> impl Iterator<Item = &str> {
        self.adds
            .iter()
            .chain(&self.removes)
            .map(|op| op.playlist.name.as_str())
    }
}

/// How a [`CleanupExecutor::converge`] run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// Detection found no duplicates.
    Clean,
    /// Newly detected groups need a user choice.
    AwaitingSelection(Vec<String>),
    /// A live round removed nothing, repeating would not help.
    NoProgress,
    RoundLimitReached,
}

#[derive(Debug, Clone)]
pub struct ConvergeReport {
    pub rounds: Vec<CleanupResult>,
    pub outcome: ConvergeOutcome,
}

impl ConvergeReport {
    pub fn tracks_removed(&self) -> usize {
        self.rounds.iter().map(|r| r.tracks_removed).sum()
    }
}

pub struct CleanupExecutor {
    playlists: Arc<dyn PlaylistService>,
    config: ExecutorConfig,
    /// Memberships created by earlier runs, keyed (playlist id, uri).
    added: Mutex<HashSet<(String, String)>>,
}

impl CleanupExecutor {
    pub fn new(playlists: Arc<dyn PlaylistService>, config: ExecutorConfig) -> Self {
        Self {
            playlists,
            config,
            added: Mutex::new(HashSet::new()),
        }
    }

    fn added_pairs(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String)>> {
        self.added
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies (or previews) the resolution of `groups`.
    ///
    /// Selections are checked before anything is sent, in dry runs too.
    pub async fn execute(
        &self,
        groups: &[DuplicateGroup],
        selections: &SelectionMap,
        dry_run: bool,
    ) -> Result<CleanupResult> {
        for group in groups {
            for track in &group.all_tracks {
                track.validate_actionable().map_err(SyncError::Validation)?;
            }
        }
        let resolutions = DuplicateGroupResolver::resolve_all(groups, selections)?;
        let plan = Plan::build(groups, &resolutions, &self.added_pairs());

        let mut result = CleanupResult {
            dry_run,
            groups_processed: groups.len(),
            planned_operations: plan.operation_count(),
            ..Default::default()
        };

        if dry_run {
            result.tracks_removed = plan.removed_tracks.len();
            result.playlists_updated = plan.playlist_names().map(str::to_string).collect();
            info!(
                "Dry run: {} groups, {} tracks to remove, {} operations",
                result.groups_processed, result.tracks_removed, result.planned_operations
            );
            return Ok(result);
        }

        info!(
            "Cleaning {} groups with {} playlist operations",
            groups.len(),
            plan.operation_count()
        );

        // adds go first so a playlist never ends up without the song
        let add_outcomes = self.run_ops(plan.adds.clone()).await;
        let mut failed_adds: HashSet<(usize, String)> = HashSet::new();
        for (op, outcome) in add_outcomes {
            match outcome {
                Ok(()) => {
                    result.spotify_operations += 1;
                    result.playlists_updated.insert(op.playlist.name.clone());
                    self.added_pairs().insert((op.playlist.id.clone(), op.uri.clone()));
                }
                Err(e) => {
                    failed_adds.insert((op.group, op.playlist.id.clone()));
                    result.errors.push(operation_error(&op, e.to_string()));
                }
            }
        }

        let (runnable, blocked): (Vec<PlannedOp>, Vec<PlannedOp>) = plan
            .removes
            .iter()
            .cloned()
            .partition(|op| !failed_adds.contains(&(op.group, op.playlist.id.clone())));

        let mut failed_tracks: HashSet<(usize, String)> = HashSet::new();
        for op in blocked {
            failed_tracks.insert((op.group, op.uri.clone()));
            result.errors.push(operation_error(
                &op,
                "skipped: kept track could not be added to this playlist".to_string(),
            ));
        }

        for (op, outcome) in self.run_ops(runnable).await {
            match outcome {
                Ok(()) => {
                    result.spotify_operations += 1;
                    result.playlists_updated.insert(op.playlist.name.clone());
                    self.added_pairs()
                        .remove(&(op.playlist.id.clone(), op.uri.clone()));
                }
                Err(e) => {
                    failed_tracks.insert((op.group, op.uri.clone()));
                    result.errors.push(operation_error(&op, e.to_string()));
                }
            }
        }

        result.tracks_removed = plan
            .removed_tracks
            .iter()
            .filter(|key| !failed_tracks.contains(*key))
            .count();

        if result.errors.is_empty() {
            info!(
                "Cleanup removed {} tracks with {} operations",
                result.tracks_removed, result.spotify_operations
            );
        } else {
            warn!(
                "Cleanup removed {} tracks, {} operations failed",
                result.tracks_removed,
                result.errors.len()
            );
        }
        Ok(result)
    }

    async fn run_ops(&self, ops: Vec<PlannedOp>) -> Vec<(PlannedOp, Result<()>)> {
        stream::iter(ops)
            .map(|op| async move {
                let outcome = match op.kind {
                    OpKind::Add => {
                        self.playlists
                            .add_tracks(&op.playlist.id, std::slice::from_ref(&op.uri))
                            .await
                    }
                    OpKind::Remove => self.playlists.remove_track(&op.playlist.id, &op.uri).await,
                };
                (op, outcome)
            })
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await
    }

    /// Detects and cleans repeatedly until nothing is left to remove,
    /// bounded by `max_rounds`.
    pub async fn converge(
        &self,
        resolver: &DuplicateGroupResolver,
        selections: &SelectionMap,
    ) -> Result<ConvergeReport> {
        let mut rounds = Vec::new();
        for round in 1..=self.config.max_rounds {
            let groups = resolver.detect().await?;
            if groups.is_empty() {
                return Ok(ConvergeReport {
                    rounds,
                    outcome: ConvergeOutcome::Clean,
                });
            }

            let pending = DuplicateGroupResolver::pending_selection(&groups, selections);
            if !pending.is_empty() {
                info!(
                    "Round {}: {} groups need a selection",
                    round,
                    pending.len()
                );
                return Ok(ConvergeReport {
                    rounds,
                    outcome: ConvergeOutcome::AwaitingSelection(pending),
                });
            }

            let result = self.execute(&groups, selections, false).await?;
            let removed = result.tracks_removed;
            rounds.push(result);
            info!("Round {}: removed {} tracks", round, removed);
            if removed == 0 {
                return Ok(ConvergeReport {
                    rounds,
                    outcome: ConvergeOutcome::NoProgress,
                });
            }
        }

        warn!(
            "Duplicates remain after {} cleanup rounds",
            self.config.max_rounds
        );
        Ok(ConvergeReport {
            rounds,
            outcome: ConvergeOutcome::RoundLimitReached,
        })
    }
}

fn operation_error(op: &PlannedOp, message: String) -> OperationError {
    OperationError {
        playlist: op.playlist.name.clone(),
        uri: op.uri.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{playlist, track, MockDuplicates, MockPlaylists};
    use shared::library::CandidateGroup;
    use std::collections::BTreeSet;

    fn candidate(tracks: &[(&str, Option<u64>, &[&str])]) -> CandidateGroup {
        CandidateGroup {
            all_tracks: tracks.iter().map(|(u, d, _)| track(u, *d)).collect(),
            playlists_per_track: tracks
                .iter()
                .map(|(_, _, pls)| pls.iter().map(|p| playlist(p)).collect())
                .collect(),
        }
    }

    fn party_chill() -> Vec<DuplicateGroup> {
        DuplicateGroupResolver::classify(&[candidate(&[
            ("keep", Some(200_000), &["Party"]),
            ("dup", Some(150_000), &["Party", "Chill"]),
        ])])
    }

    fn executor(playlists: Arc<MockPlaylists>) -> CleanupExecutor {
        CleanupExecutor::new(playlists, ExecutorConfig::default())
    }

    #[tokio::test]
    async fn dry_run_matches_live_run_without_mutating() {
        let groups = party_chill();
        let playlists = Arc::new(MockPlaylists::default());
        let executor = executor(playlists.clone());

        let preview = executor
            .execute(&groups, &SelectionMap::new(), true)
            .await
            .unwrap();
        assert_eq!(preview.spotify_operations, 0);
        assert_eq!(playlists.mutation_count(), 0);

        let applied = executor
            .execute(&groups, &SelectionMap::new(), false)
            .await
            .unwrap();
        assert_eq!(preview.tracks_removed, applied.tracks_removed);
        assert_eq!(applied.tracks_removed, 1);
        assert_eq!(preview.planned_operations, applied.spotify_operations);
        assert_eq!(preview.playlists_updated, applied.playlists_updated);
    }

    #[tokio::test]
    async fn kept_track_joins_every_affected_playlist() {
        let playlists = Arc::new(MockPlaylists::default());
        let result = executor(playlists.clone())
            .execute(&party_chill(), &SelectionMap::new(), false)
            .await
            .unwrap();

        let added = playlists.added.lock().unwrap().clone();
        assert_eq!(added, vec![("pl-chill".to_string(), "keep".to_string())]);

        let removed: BTreeSet<_> = playlists.removed.lock().unwrap().iter().cloned().collect();
        let expected: BTreeSet<_> = [
            ("pl-party".to_string(), "dup".to_string()),
            ("pl-chill".to_string(), "dup".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(removed, expected);
        assert_eq!(result.spotify_operations, 3);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn missing_selection_blocks_even_dry_runs() {
        let groups = DuplicateGroupResolver::classify(&[candidate(&[
            ("a", Some(180_000), &["Party"]),
            ("b", Some(180_000), &["Chill"]),
        ])]);
        let playlists = Arc::new(MockPlaylists::default());
        let executor = executor(playlists.clone());

        for dry_run in [true, false] {
            let err = executor
                .execute(&groups, &SelectionMap::new(), dry_run)
                .await
                .unwrap_err();
            match err {
                SyncError::ManualSelectionRequired { group_ids } => {
                    assert_eq!(group_ids, vec![groups[0].group_id.clone()])
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(playlists.mutation_count(), 0);
    }

    #[tokio::test]
    async fn manual_selection_overrides_primary() {
        let groups = party_chill();
        let mut selections = SelectionMap::new();
        selections.insert(groups[0].group_id.clone(), "dup");
        let playlists = Arc::new(MockPlaylists::default());

        let result = executor(playlists.clone())
            .execute(&groups, &selections, false)
            .await
            .unwrap();
        assert_eq!(result.tracks_removed, 1);
        assert!(playlists.added.lock().unwrap().is_empty());
        assert_eq!(
            playlists.removed.lock().unwrap().clone(),
            vec![("pl-party".to_string(), "keep".to_string())]
        );
    }

    #[tokio::test]
    async fn foreign_selection_is_rejected_before_mutating() {
        let groups = party_chill();
        let mut selections = SelectionMap::new();
        selections.insert(groups[0].group_id.clone(), "spotify:track:other");
        let playlists = Arc::new(MockPlaylists::default());

        let err = executor(playlists.clone())
            .execute(&groups, &selections, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(playlists.mutation_count(), 0);
    }

    #[tokio::test]
    async fn failed_add_protects_the_playlist() {
        let groups = party_chill();
        let playlists = Arc::new(MockPlaylists {
            failing_playlists: ["pl-chill".to_string()].into_iter().collect(),
            ..Default::default()
        });

        let result = executor(playlists.clone())
            .execute(&groups, &SelectionMap::new(), false)
            .await
            .unwrap();

        assert_eq!(
            playlists.removed.lock().unwrap().clone(),
            vec![("pl-party".to_string(), "dup".to_string())]
        );
        assert_eq!(result.tracks_removed, 0);
        assert_eq!(result.spotify_operations, 1);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.playlist == "Chill"));
    }

    #[tokio::test]
    async fn retry_does_not_add_the_kept_track_twice() {
        let groups = party_chill();
        let playlists = Arc::new(MockPlaylists {
            failing_removals: true,
            ..Default::default()
        });
        let executor = executor(playlists.clone());

        let first = executor
            .execute(&groups, &SelectionMap::new(), false)
            .await
            .unwrap();
        assert_eq!(first.tracks_removed, 0);

        let retry = executor
            .execute(&groups, &SelectionMap::new(), false)
            .await
            .unwrap();
        assert_eq!(
            playlists.added.lock().unwrap().clone(),
            vec![("pl-chill".to_string(), "keep".to_string())]
        );
        assert_eq!(retry.planned_operations, 2);
        assert_eq!(retry.spotify_operations, 0);
        assert_eq!(retry.errors.len(), 2);
    }

    #[tokio::test]
    async fn members_without_playlists_are_not_counted_as_removed() {
        let bare = CandidateGroup {
            all_tracks: vec![track("a", Some(2)), track("b", Some(1))],
            playlists_per_track: vec![],
        };
        let groups = DuplicateGroupResolver::classify(&[bare.clone()]);
        let playlists = Arc::new(MockPlaylists::default());
        let executor = executor(playlists.clone());

        let preview = executor
            .execute(&groups, &SelectionMap::new(), true)
            .await
            .unwrap();
        let applied = executor
            .execute(&groups, &SelectionMap::new(), false)
            .await
            .unwrap();
        assert_eq!(preview.tracks_removed, 0);
        assert_eq!(applied.tracks_removed, 0);
        assert_eq!(applied.spotify_operations, 0);

        let resolver = DuplicateGroupResolver::new(Arc::new(MockDuplicates::new(vec![
            vec![bare];
            10
        ])));
        let report = executor
            .converge(&resolver, &SelectionMap::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, ConvergeOutcome::NoProgress);
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(playlists.mutation_count(), 0);
    }

    #[tokio::test]
    async fn converge_stops_when_clean() {
        let first = candidate(&[("a", Some(2), &["Party"]), ("b", Some(1), &["Party"])]);
        let second = candidate(&[("a", Some(2), &["Mix"]), ("c", Some(1), &["Mix"])]);
        let resolver =
            DuplicateGroupResolver::new(Arc::new(MockDuplicates::new(vec![vec![first], vec![second]])));
        let playlists = Arc::new(MockPlaylists::default());

        let report = executor(playlists)
            .converge(&resolver, &SelectionMap::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, ConvergeOutcome::Clean);
        assert_eq!(report.rounds.len(), 2);
        assert_eq!(report.tracks_removed(), 2);
    }

    #[tokio::test]
    async fn converge_is_bounded() {
        let scans = (0..10)
            .map(|i| {
                vec![candidate(&[
                    ("a", Some(2), &["Party"]),
                    (format!("dup{i}").as_str(), Some(1), &["Party"]),
                ])]
            })
            .collect();
        let resolver = DuplicateGroupResolver::new(Arc::new(MockDuplicates::new(scans)));
        let executor = CleanupExecutor::new(
            Arc::new(MockPlaylists::default()),
            ExecutorConfig {
                max_rounds: 3,
                ..Default::default()
            },
        );

        let report = executor
            .converge(&resolver, &SelectionMap::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, ConvergeOutcome::RoundLimitReached);
        assert_eq!(report.rounds.len(), 3);
    }

    #[tokio::test]
    async fn converge_hands_back_ambiguous_groups() {
        let tied = candidate(&[("a", Some(1), &[]), ("b", Some(1), &[])]);
        let resolver = DuplicateGroupResolver::new(Arc::new(MockDuplicates::new(vec![vec![tied]])));
        let report = executor(Arc::new(MockPlaylists::default()))
            .converge(&resolver, &SelectionMap::new())
            .await
            .unwrap();
        assert!(matches!(report.outcome, ConvergeOutcome::AwaitingSelection(ref ids) if ids.len() == 1));
        assert!(report.rounds.is_empty());
    }
}
