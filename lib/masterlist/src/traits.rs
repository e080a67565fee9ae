use async_trait::async_trait;
use shared::{
    download::{AcquisitionOutcome, BatchAcquisitionOutcome},
    library::DuplicateScan,
    reconcile::ComparisonResponse,
};
use std::path::Path;

use crate::error::Result;

/// Compares the master collection against the local files.
#[async_trait]
pub trait ComparisonSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compare(&self, master_dir_hint: Option<&str>) -> Result<ComparisonResponse>;
}

/// Fetches files for tracks that are missing locally.
#[async_trait]
pub trait AcquisitionService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn download(&self, uri: &str, destination: &Path) -> Result<AcquisitionOutcome>;
    async fn download_batch(
        &self,
        uris: &[String],
        destination: &Path,
    ) -> Result<BatchAcquisitionOutcome>;
    async fn health_check(&self) -> bool;
}

/// Supplies groups of tracks believed to be the same song.
#[async_trait]
pub trait DuplicateSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect_duplicates(&self) -> Result<DuplicateScan>;
}

/// Mutations against the remote playlist catalog.
#[async_trait]
pub trait PlaylistService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn current_user_id(&self) -> Result<String>;
    async fn create_playlist(&self, user_id: &str, name: &str, description: &str)
        -> Result<String>;
    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()>;
    async fn remove_track(&self, playlist_id: &str, uri: &str) -> Result<()>;
}

/// Durable string storage used by the reconciliation cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}
