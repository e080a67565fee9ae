use futures::{stream, StreamExt};
use shared::{
    download::{
        AcquiredItem, AcquisitionOutcome, BatchAcquisitionOutcome, BatchProgress, BatchResult,
        DownloadJob, DownloadStatus, FailedItem,
    },
    TrackRecord,
};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::reconciler::MissingTrackReconciler;
use crate::AcquisitionService;

const NO_RESULT: &str = "no result reported by acquisition service";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub destination: PathBuf,
    /// Chunk requests allowed in flight at once.
    pub max_in_flight: usize,
    /// Uris per acquisition request.
    pub chunk_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("./downloads"),
            max_in_flight: 4,
            chunk_size: 10,
        }
    }
}

struct ChunkReport {
    jobs: Vec<DownloadJob>,
    /// The request never reached the acquisition service.
    unreachable: Option<String>,
}

pub struct BatchDownloadOrchestrator {
    acquisition: Arc<dyn AcquisitionService>,
    reconciler: Arc<MissingTrackReconciler>,
    config: OrchestratorConfig,
    succeeded: Mutex<HashSet<String>>,
    progress: watch::Sender<BatchProgress>,
}

impl BatchDownloadOrchestrator {
    pub fn new(
        acquisition: Arc<dyn AcquisitionService>,
        reconciler: Arc<MissingTrackReconciler>,
        config: OrchestratorConfig,
    ) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            acquisition,
            reconciler,
            config,
            succeeded: Mutex::new(HashSet::new()),
            progress,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> BatchProgress {
        self.progress.borrow().clone()
    }

    fn already_succeeded(&self, uri: &str) -> bool {
        self.succeeded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(uri)
    }

    fn remember<'a>(&self, uris: impl IntoIterator<Item = &'a str>) {
        let mut succeeded = self
            .succeeded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        succeeded.extend(uris.into_iter().map(str::to_string));
    }

    fn reset_progress(&self, total_count: usize) {
        self.progress.send_replace(BatchProgress {
            completed_count: 0,
            total_count,
            current_track_uri: None,
        });
    }

    fn mark_started(&self, uri: Option<&str>) {
        // send_* on a watch never fails, even without receivers
        self.progress.send_modify(|p| {
            p.current_track_uri = uri.map(str::to_string);
        });
    }

    fn mark_completed(&self, completed: &AtomicUsize) {
        let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
        self.progress.send_modify(|p| {
            p.completed_count = p.completed_count.max(done);
        });
    }

    async fn refresh_missing(&self) {
        if let Err(e) = self.reconciler.reconcile(true).await {
            warn!("Refresh after download failed: {}", e);
        }
    }

    /// Downloads a single missing track.
    ///
    /// A track that already succeeded in this session is answered without
    /// contacting the acquisition service.
    pub async fn download_one(&self, track: &TrackRecord) -> Result<DownloadJob> {
        track.validate_actionable().map_err(SyncError::Validation)?;

        if self.already_succeeded(&track.uri) {
            info!("Already downloaded in this session: {}", track.uri);
            return Ok(DownloadJob::already_downloaded(&track.uri));
        }

        let mut job = DownloadJob::pending(&track.uri);
        job.start();
        info!("Downloading '{}' by {}", track.title, track.artists);

        match self
            .acquisition
            .download(&track.uri, &self.config.destination)
            .await
        {
            Ok(outcome) if outcome.success => {
                job.succeed(outcome.mapping_created);
                self.remember([track.uri.as_str()]);
                if !outcome.mapping_created {
                    warn!("Downloaded {} but no track mapping was created", track.uri);
                }
                self.refresh_missing().await;
            }
            Ok(outcome) => {
                let message = outcome
                    .message
                    .unwrap_or_else(|| "download failed".to_string());
                warn!("Download of {} failed: {}", track.uri, message);
                job.fail(message);
            }
            Err(e) => {
                warn!("Download of {} failed: {}", track.uri, e);
                job.fail(e.to_string());
            }
        }

        Ok(job)
    }

    /// Downloads many tracks; every dispatched uri yields one terminal job.
    ///
    /// Only a batch whose every request failed to reach the acquisition
    /// service is an error.
    pub async fn download_many(&self, tracks: &[TrackRecord]) -> Result<BatchResult> {
        let mut order: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let mut skipped_invalid = 0;
        for track in tracks {
            if !track.has_uri() {
                skipped_invalid += 1;
                continue;
            }
            if seen.insert(track.uri.as_str()) {
                order.push(track.uri.clone());
            }
        }
        if skipped_invalid > 0 {
            warn!("Skipping {} tracks without uri", skipped_invalid);
        }
        if order.is_empty() {
            return Ok(BatchResult::empty(skipped_invalid));
        }

        let batch_id = Uuid::new_v4();
        let (done, pending): (Vec<String>, Vec<String>) =
            order.iter().cloned().partition(|u| self.already_succeeded(u));

        info!(
            "Batch {}: {} tracks ({} already downloaded)",
            batch_id,
            order.len(),
            done.len()
        );

        let completed = AtomicUsize::new(0);
        self.reset_progress(order.len());

        let mut jobs: HashMap<String, DownloadJob> = HashMap::new();
        for uri in done {
            jobs.insert(uri.clone(), DownloadJob::already_downloaded(&uri));
            self.mark_completed(&completed);
        }

        let chunks: Vec<Vec<String>> = pending
            .chunks(self.config.chunk_size.max(1))
            .map(<[String]>::to_vec)
            .collect();
        let chunk_count = chunks.len();

        let reports: Vec<ChunkReport> = stream::iter(chunks)
            .map(|chunk| self.dispatch_chunk(chunk, &completed))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        let unreachable: Vec<&String> = reports
            .iter()
            .filter_map(|r| r.unreachable.as_ref())
            .collect();
        if chunk_count > 0 && unreachable.len() == chunk_count {
            let message = unreachable
                .first()
                .map(|m| m.to_string())
                .unwrap_or_default();
            error!(
                "Batch {}: acquisition service unreachable: {}",
                batch_id, message
            );
            self.reset_progress(0);
            return Err(SyncError::Transport(message));
        }

        let mut fetched = 0;
        for report in reports {
            for job in report.jobs {
                if job.status == DownloadStatus::Succeeded {
                    fetched += 1;
                }
                jobs.insert(job.track_uri.clone(), job);
            }
        }

        let jobs: Vec<DownloadJob> = order
            .iter()
            .map(|uri| {
                jobs.remove(uri).unwrap_or_else(|| {
                    let mut job = DownloadJob::pending(uri);
                    job.fail(NO_RESULT);
                    job
                })
            })
            .collect();

        self.remember(
            jobs.iter()
                .filter(|j| j.status == DownloadStatus::Succeeded)
                .map(|j| j.track_uri.as_str()),
        );

        let result = BatchResult::from_jobs(batch_id, jobs, skipped_invalid);
        info!(
            "Batch {} finished: {} succeeded, {} failed",
            batch_id, result.success_count, result.failure_count
        );
        self.reset_progress(0);

        if fetched > 0 {
            self.refresh_missing().await;
        }

        Ok(result)
    }

    async fn dispatch_chunk(&self, uris: Vec<String>, completed: &AtomicUsize) -> ChunkReport {
        self.mark_started(uris.first().map(String::as_str));
        let mut jobs: Vec<DownloadJob> = uris
            .iter()
            .map(|u| {
                let mut job = DownloadJob::pending(u);
                job.start();
                job
            })
            .collect();

        debug!("Dispatching {} uris", uris.len());
        let reply = match uris.as_slice() {
            [single] => self
                .acquisition
                .download(single, &self.config.destination)
                .await
                .map(|outcome| single_as_batch(single, outcome)),
            _ => {
                self.acquisition
                    .download_batch(&uris, &self.config.destination)
                    .await
            }
        };

        let unreachable = match reply {
            Ok(outcome) => {
                apply_outcome(&mut jobs, outcome);
                None
            }
            Err(e) => {
                warn!("Acquisition request for {} uris failed: {}", uris.len(), e);
                let message = e.to_string();
                for job in &mut jobs {
                    job.fail(message.clone());
                }
                e.is_transport().then_some(message)
            }
        };

        for _ in &jobs {
            self.mark_completed(completed);
        }

        ChunkReport { jobs, unreachable }
    }
}

fn single_as_batch(uri: &str, outcome: AcquisitionOutcome) -> BatchAcquisitionOutcome {
    let mut batch = BatchAcquisitionOutcome {
        success: true,
        message: outcome.message.clone(),
        ..Default::default()
    };
    if outcome.success {
        batch.success_count = 1;
        batch.successful.push(AcquiredItem {
            uri: uri.to_string(),
            mapping_created: outcome.mapping_created,
        });
    } else {
        batch.failure_count = 1;
        batch.failed.push(FailedItem {
            uri: uri.to_string(),
            error: outcome
                .message
                .unwrap_or_else(|| "download failed".to_string()),
        });
    }
    batch
}

fn apply_outcome(jobs: &mut [DownloadJob], outcome: BatchAcquisitionOutcome) {
    let successful: HashMap<&str, bool> = outcome
        .successful
        .iter()
        .map(|s| (s.uri.as_str(), s.mapping_created))
        .collect();
    let failed: HashMap<&str, &str> = outcome
        .failed
        .iter()
        .map(|f| (f.uri.as_str(), f.error.as_str()))
        .collect();
    let rejected = (!outcome.success).then(|| {
        outcome
            .message
            .clone()
            .unwrap_or_else(|| "batch rejected by acquisition service".to_string())
    });

    for job in jobs.iter_mut() {
        if let Some(mapping_created) = successful.get(job.track_uri.as_str()) {
            job.succeed(*mapping_created);
        } else if let Some(error) = failed.get(job.track_uri.as_str()) {
            job.fail(*error);
        } else if let Some(message) = &rejected {
            job.fail(message.clone());
        } else {
            job.fail(NO_RESULT);
        }
    }
}
