use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::{AcquisitionService, ComparisonSource, DuplicateSource, KeyValueStore, PlaylistService};

/// The collaborators the engine talks to.
#[derive(Clone)]
pub struct Services {
    comparison: Arc<dyn ComparisonSource>,
    acquisition: Arc<dyn AcquisitionService>,
    duplicates: Arc<dyn DuplicateSource>,
    playlists: Option<Arc<dyn PlaylistService>>,
    store: Arc<dyn KeyValueStore>,
}

impl Services {
    pub fn comparison(&self) -> &Arc<dyn ComparisonSource> {
        &self.comparison
    }

    pub fn acquisition(&self) -> &Arc<dyn AcquisitionService> {
        &self.acquisition
    }

    pub fn duplicates(&self) -> &Arc<dyn DuplicateSource> {
        &self.duplicates
    }

    /// Only needed for cleanup and playlist export.
    pub fn playlists(&self) -> Result<&Arc<dyn PlaylistService>> {
        self.playlists
            .as_ref()
            .ok_or(SyncError::NotConfigured("playlist service"))
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn describe(&self) -> Vec<(&str, &str)> {
        let mut list = vec![
            ("comparison", self.comparison.name()),
            ("acquisition", self.acquisition.name()),
            ("duplicates", self.duplicates.name()),
        ];
        if let Some(p) = &self.playlists {
            list.push(("playlists", p.name()));
        }
        list
    }
}

#[derive(Default)]
pub struct ServicesBuilder {
    comparison: Option<Arc<dyn ComparisonSource>>,
    acquisition: Option<Arc<dyn AcquisitionService>>,
    duplicates: Option<Arc<dyn DuplicateSource>>,
    playlists: Option<Arc<dyn PlaylistService>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl ServicesBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn comparison(mut self, source: Arc<dyn ComparisonSource>) -> Self {
        self.comparison = Some(source);
        self
    }

    pub fn acquisition(mut self, service: Arc<dyn AcquisitionService>) -> Self {
        self.acquisition = Some(service);
        self
    }

    pub fn duplicates(mut self, source: Arc<dyn DuplicateSource>) -> Self {
        self.duplicates = Some(source);
        self
    }

    pub fn playlists(mut self, service: Arc<dyn PlaylistService>) -> Self {
        self.playlists = Some(service);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Services> {
        Ok(Services {
            comparison: self
                .comparison
                .ok_or(SyncError::NotConfigured("comparison source"))?,
            acquisition: self
                .acquisition
                .ok_or(SyncError::NotConfigured("acquisition service"))?,
            duplicates: self
                .duplicates
                .ok_or(SyncError::NotConfigured("duplicate source"))?,
            playlists: self.playlists,
            store: self.store.ok_or(SyncError::NotConfigured("key-value store"))?,
        })
    }
}
