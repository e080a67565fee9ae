//! Centralized configuration management.
//!
//! Every environment variable is read here once, at startup, so a bad value
//! fails the run before any collaborator is contacted.

use anyhow::{bail, Context, Result};
use std::{path::PathBuf, str::FromStr};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Companion backend base URL (required)
    pub backend_url: String,
    /// Bearer token for playlist mutations; cleanup and export need it
    pub spotify_access_token: Option<String>,
    /// Web API root (default: "https://api.spotify.com/v1")
    pub spotify_api_url: String,
    /// Where the master collection lives, if the backend should not guess
    pub master_tracks_dir: Option<String>,
    /// Destination handed to the backend for downloads (default: "./downloads")
    pub download_dir: PathBuf,
    /// Directory of the JSON snapshot store (default: "./.masterlist")
    pub cache_dir: PathBuf,
    pub cache_ttl_secs: i64,
    pub max_in_flight: usize,
    pub download_chunk_size: usize,
    pub cleanup_max_rounds: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url =
            var("MASTERLIST_BACKEND_URL").context("Missing required MASTERLIST_BACKEND_URL env var")?;

        let config = Self {
            backend_url,
            spotify_access_token: var("SPOTIFY_ACCESS_TOKEN"),
            spotify_api_url: var("SPOTIFY_API_URL")
                .unwrap_or_else(|| masterlist::spotify::DEFAULT_API_URL.to_string()),
            master_tracks_dir: var("MASTER_TRACKS_DIR"),
            download_dir: PathBuf::from(var("DOWNLOAD_DIR").unwrap_or_else(|| "./downloads".into())),
            cache_dir: PathBuf::from(var("CACHE_DIR").unwrap_or_else(|| "./.masterlist".into())),
            cache_ttl_secs: parse_or(var("CACHE_TTL_SECS"), "CACHE_TTL_SECS", 3600)?,
            max_in_flight: parse_or(var("MAX_IN_FLIGHT"), "MAX_IN_FLIGHT", 4)?,
            download_chunk_size: parse_or(var("DOWNLOAD_CHUNK_SIZE"), "DOWNLOAD_CHUNK_SIZE", 10)?,
            cleanup_max_rounds: parse_or(var("CLEANUP_MAX_ROUNDS"), "CLEANUP_MAX_ROUNDS", 5)?,
        };

        if config.cache_ttl_secs < 0 {
            bail!("CACHE_TTL_SECS must not be negative");
        }
        if config.max_in_flight == 0 || config.download_chunk_size == 0 {
            bail!("MAX_IN_FLIGHT and DOWNLOAD_CHUNK_SIZE must be at least 1");
        }
        Ok(config)
    }

    pub fn spotify_access_token(&self) -> Option<&str> {
        self.spotify_access_token.as_deref()
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value '{value}'")),
        None => Ok(default),
    }
}
