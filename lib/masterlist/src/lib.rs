pub mod backend;
pub mod cache;
pub mod cleanup;
pub mod download;
pub mod duplicates;
pub mod error;
mod http;
pub mod reconciler;
pub mod services;
pub mod spotify;
pub mod store;
pub mod traits;

#[cfg(test)]
mod testing;

pub use error::{Result, SyncError};
pub use services::{Services, ServicesBuilder};
pub use traits::{
    AcquisitionService, ComparisonSource, DuplicateSource, KeyValueStore, PlaylistService,
};
