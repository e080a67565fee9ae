//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    download::{AcquiredItem, AcquisitionOutcome, BatchAcquisitionOutcome, FailedItem},
    library::{CandidateGroup, DuplicateScan},
    reconcile::ComparisonResponse,
    PlaylistRef, TrackRecord,
};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::error::{Result, SyncError};
use crate::{AcquisitionService, ComparisonSource, DuplicateSource, PlaylistService};

pub fn track(uri: &str, duration_ms: Option<u64>) -> TrackRecord {
    TrackRecord {
        id: uri.to_string(),
        uri: uri.to_string(),
        title: format!("Song {uri}"),
        artists: "Artist".to_string(),
        album: "Album".to_string(),
        duration_ms,
        ..Default::default()
    }
}

pub fn playlist(name: &str) -> PlaylistRef {
    PlaylistRef {
        id: format!("pl-{}", name.to_lowercase()),
        name: name.to_string(),
    }
}

pub fn comparison(master: &[&str], missing: &[&str]) -> ComparisonResponse {
    ComparisonResponse {
        success: true,
        master_tracks: master.iter().map(|u| track(u, Some(200_000))).collect(),
        missing_tracks: missing.iter().map(|u| track(u, Some(200_000))).collect(),
        local_track_count: master.len() - missing.len(),
        captured_at: Some(Utc::now()),
        master_tracks_dir: None,
        message: None,
    }
}

/// Replies from a queue; repeats the last reply once the queue is drained.
pub struct MockComparison {
    replies: Mutex<VecDeque<Result<ComparisonResponse>>>,
    last: Mutex<Option<ComparisonResponse>>,
    pub calls: AtomicUsize,
}

impl MockComparison {
    pub fn new(replies: Vec<Result<ComparisonResponse>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComparisonSource for MockComparison {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn compare(&self, _master_dir_hint: Option<&str>) -> Result<ComparisonResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(reply)) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                Ok(reply)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| SyncError::Transport("no reply scripted".to_string())),
        }
    }
}

/// Succeeds for every uri not listed in `failing`.
#[derive(Default)]
pub struct MockAcquisition {
    pub failing: HashSet<String>,
    pub unreachable: bool,
    pub silent: HashSet<String>,
    /// Holds every request this long before answering.
    pub delay: Option<std::time::Duration>,
    pub single_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub requested: Mutex<Vec<String>>,
}

impl MockAcquisition {
    pub fn failing(uris: &[&str]) -> Self {
        Self {
            failing: uris.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    pub fn remote_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst) + self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcquisitionService for MockAcquisition {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn download(&self, uri: &str, _destination: &Path) -> Result<AcquisitionOutcome> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable {
            return Err(SyncError::Transport("connection refused".to_string()));
        }
        self.requested.lock().unwrap().push(uri.to_string());
        if self.failing.contains(uri) {
            return Ok(AcquisitionOutcome {
                success: false,
                message: Some(format!("no source for {uri}")),
                ..Default::default()
            });
        }
        Ok(AcquisitionOutcome {
            success: true,
            message: Some("downloaded".to_string()),
            mapping_created: true,
            track_info: None,
        })
    }

    async fn download_batch(
        &self,
        uris: &[String],
        _destination: &Path,
    ) -> Result<BatchAcquisitionOutcome> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable {
            return Err(SyncError::Transport("connection refused".to_string()));
        }
        self.requested.lock().unwrap().extend(uris.iter().cloned());
        let mut outcome = BatchAcquisitionOutcome {
            success: true,
            ..Default::default()
        };
        for uri in uris.iter().filter(|u| !self.silent.contains(*u)) {
            if self.failing.contains(uri) {
                outcome.failed.push(FailedItem {
                    uri: uri.clone(),
                    error: format!("no source for {uri}"),
                });
            } else {
                outcome.successful.push(AcquiredItem {
                    uri: uri.clone(),
                    mapping_created: true,
                });
            }
        }
        outcome.success_count = outcome.successful.len();
        outcome.failure_count = outcome.failed.len();
        Ok(outcome)
    }

    async fn health_check(&self) -> bool {
        !self.unreachable
    }
}

/// Returns scripted scans in order, then empty scans.
pub struct MockDuplicates {
    scans: Mutex<VecDeque<DuplicateScan>>,
    pub calls: AtomicUsize,
}

impl MockDuplicates {
    pub fn new(groups_per_scan: Vec<Vec<CandidateGroup>>) -> Self {
        Self {
            scans: Mutex::new(
                groups_per_scan
                    .into_iter()
                    .map(|groups| DuplicateScan {
                        success: true,
                        groups,
                        message: None,
                    })
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DuplicateSource for MockDuplicates {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn detect_duplicates(&self) -> Result<DuplicateScan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scans.lock().unwrap().pop_front().unwrap_or(DuplicateScan {
            success: true,
            groups: vec![],
            message: None,
        }))
    }
}

/// Records every mutation. Mutations on playlists in `failing_playlists`
/// fail, as does every removal when `failing_removals` is set.
#[derive(Default)]
pub struct MockPlaylists {
    pub failing_playlists: HashSet<String>,
    pub failing_removals: bool,
    pub added: Mutex<Vec<(String, String)>>,
    pub removed: Mutex<Vec<(String, String)>>,
    pub created: Mutex<HashMap<String, String>>,
}

impl MockPlaylists {
    pub fn mutation_count(&self) -> usize {
        self.added.lock().unwrap().len() + self.removed.lock().unwrap().len()
    }
}

#[async_trait]
impl PlaylistService for MockPlaylists {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn current_user_id(&self) -> Result<String> {
        Ok("user-1".to_string())
    }

    async fn create_playlist(
        &self,
        _user_id: &str,
        name: &str,
        _description: &str,
    ) -> Result<String> {
        let id = format!("created-{}", name.to_lowercase().replace(' ', "-"));
        self.created
            .lock()
            .unwrap()
            .insert(id.clone(), name.to_string());
        Ok(id)
    }

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        if self.failing_playlists.contains(playlist_id) {
            return Err(SyncError::Api {
                status: 403,
                message: "forbidden".to_string(),
            });
        }
        let mut added = self.added.lock().unwrap();
        for uri in uris {
            added.push((playlist_id.to_string(), uri.clone()));
        }
        Ok(())
    }

    async fn remove_track(&self, playlist_id: &str, uri: &str) -> Result<()> {
        if self.failing_removals {
            return Err(SyncError::Transport("connection reset".to_string()));
        }
        if self.failing_playlists.contains(playlist_id) {
            return Err(SyncError::Api {
                status: 403,
                message: "forbidden".to_string(),
            });
        }
        self.removed
            .lock()
            .unwrap()
            .push((playlist_id.to_string(), uri.to_string()));
        Ok(())
    }
}
