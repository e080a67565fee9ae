pub mod cleanup;
pub mod download;
pub mod library;
pub mod reconcile;
pub mod system;
pub mod track;

pub use track::{PlaylistRef, TrackRecord};
