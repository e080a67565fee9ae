use chrono::{DateTime, Utc};
use itertools::Itertools;
use shared::{
    reconcile::{ComparisonResponse, ReconciliationSnapshot},
    TrackRecord,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{info, warn};

use crate::cache::ReconciliationCache;
use crate::error::{Result, SyncError};
use crate::{ComparisonSource, PlaylistService};

/// Maximum uris per playlist add call accepted by the catalog.
const PLAYLIST_ADD_CHUNK: usize = 100;

/// Freshness is governed by the cache's own ttl.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Directory holding the master collection, when known locally.
    pub master_dir_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub snapshot: Arc<ReconciliationSnapshot>,
    /// True when served without contacting the comparison source.
    pub from_cache: bool,
    /// Master directory reported by the source that the local
    /// configuration does not know about yet.
    pub suggested_master_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedPlaylist {
    pub playlist_id: String,
    pub tracks_added: usize,
}

pub struct MissingTrackReconciler {
    source: Arc<dyn ComparisonSource>,
    cache: Arc<ReconciliationCache>,
    config: ReconcilerConfig,
}

impl MissingTrackReconciler {
    pub fn new(
        source: Arc<dyn ComparisonSource>,
        cache: Arc<ReconciliationCache>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ReconciliationCache> {
        &self.cache
    }

    pub async fn reconcile(&self, force: bool) -> Result<Reconciled> {
        self.reconcile_at(force, Utc::now()).await
    }

    /// Serves the cached snapshot while fresh, otherwise compares live and
    /// replaces the cache. A failed comparison leaves the cache untouched.
    pub async fn reconcile_at(&self, force: bool, now: DateTime<Utc>) -> Result<Reconciled> {
        if !force {
            if let Some(snapshot) = self.cache.get().await {
                if !crate::cache::is_stale(Some(snapshot.as_ref()), now, self.cache.ttl()) {
                    return Ok(Reconciled {
                        snapshot,
                        from_cache: true,
                        suggested_master_dir: None,
                    });
                }
            }
        }

        info!(
            "Comparing master collection against local files via {} (forced: {})",
            self.source.name(),
            force
        );
        let response = self
            .source
            .compare(self.config.master_dir_hint.as_deref())
            .await
            .map_err(|e| match e {
                SyncError::Transport(_) | SyncError::SourceRejected(_) => e,
                other => SyncError::SourceRejected(other.to_string()),
            })?;

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "comparison failed".to_string());
            warn!("Comparison source rejected the request: {}", message);
            return Err(SyncError::SourceRejected(message));
        }

        let suggested_master_dir = match (&self.config.master_dir_hint, &response.master_tracks_dir)
        {
            (None, Some(dir)) if !dir.trim().is_empty() => {
                info!("Comparison source reports master tracks directory {}", dir);
                Some(dir.clone())
            }
            _ => None,
        };

        let snapshot = build_snapshot(response, now);
        info!(
            "Reconciled {} master tracks, {} missing, {} local",
            snapshot.master_tracks.len(),
            snapshot.missing_tracks.len(),
            snapshot.local_track_count
        );

        let snapshot = Arc::new(snapshot);
        if let Err(e) = self.cache.put(snapshot.as_ref().clone()).await {
            warn!("Could not persist reconciliation snapshot: {}", e);
        }

        Ok(Reconciled {
            snapshot,
            from_cache: false,
            suggested_master_dir,
        })
    }

    /// Missing tracks of the cached snapshot, without any network access.
    pub async fn missing_tracks(&self) -> Vec<TrackRecord> {
        self.cache
            .get()
            .await
            .map(|s| s.missing_tracks.clone())
            .unwrap_or_default()
    }

    /// Creates a private playlist holding every catalog-backed missing track.
    pub async fn export_missing_playlist(
        &self,
        playlists: &dyn PlaylistService,
        name: &str,
    ) -> Result<ExportedPlaylist> {
        if name.trim().is_empty() {
            return Err(SyncError::Validation("playlist name is empty".to_string()));
        }

        let reconciled = self.reconcile(false).await?;
        let uris: Vec<String> = reconciled
            .snapshot
            .missing_tracks
            .iter()
            .filter(|t| !t.is_local && t.has_uri())
            .map(|t| t.uri.clone())
            .unique()
            .collect();

        if uris.is_empty() {
            return Err(SyncError::Validation(
                "no catalog tracks are missing locally".to_string(),
            ));
        }

        let user_id = playlists.current_user_id().await?;
        let description = format!(
            "{} tracks from the master collection that are missing locally",
            uris.len()
        );
        let playlist_id = playlists
            .create_playlist(&user_id, name, &description)
            .await?;
        info!("Created playlist '{}' ({})", name, playlist_id);

        for chunk in uris.chunks(PLAYLIST_ADD_CHUNK) {
            playlists.add_tracks(&playlist_id, chunk).await?;
        }

        Ok(ExportedPlaylist {
            playlist_id,
            tracks_added: uris.len(),
        })
    }
}

fn build_snapshot(response: ComparisonResponse, now: DateTime<Utc>) -> ReconciliationSnapshot {
    let master_uris: HashSet<&str> = response
        .master_tracks
        .iter()
        .map(|t| t.uri.as_str())
        .collect();

    let (missing_tracks, foreign): (Vec<TrackRecord>, Vec<TrackRecord>) = response
        .missing_tracks
        .iter()
        .cloned()
        .partition(|t| master_uris.contains(t.uri.as_str()));
    if !foreign.is_empty() {
        warn!(
            "Dropping {} missing tracks that are not part of the master collection",
            foreign.len()
        );
    }

    ReconciliationSnapshot {
        missing_tracks,
        local_track_count: response.local_track_count,
        captured_at: response.captured_at.unwrap_or(now),
        master_tracks_dir: response.master_tracks_dir,
        master_tracks: response.master_tracks,
    }
}
