//! `masterlist`: keeps a local music library aligned with its master
//! playlist.
//!
//! Every subcommand prints its result as JSON on stdout; logs go to stderr.

mod config;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use masterlist::{
    backend::BackendClient,
    cache::ReconciliationCache,
    cleanup::{CleanupExecutor, ExecutorConfig},
    download::{BatchDownloadOrchestrator, OrchestratorConfig},
    duplicates::{DuplicateGroupResolver, SelectionMap},
    reconciler::{MissingTrackReconciler, ReconcilerConfig},
    spotify::SpotifyClient,
    store::JsonFileStore,
    Services, ServicesBuilder,
};
use serde_json::json;
use shared::{system::SystemHealth, TrackRecord};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "masterlist", version, about = "Master playlist reconciliation and cleanup")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backend reachability and cache freshness
    Status,
    /// Master tracks that have no local file
    Missing {
        /// Ignore the cached snapshot
        #[arg(long)]
        force: bool,
    },
    /// Fetch missing tracks
    Download {
        /// Every track of the current missing list
        #[arg(long, conflicts_with = "uris")]
        all: bool,
        #[arg(required_unless_present = "all")]
        uris: Vec<String>,
    },
    /// Detect and classify duplicate groups
    Duplicates,
    /// Remove duplicates from playlists, keeping one track per group
    Cleanup {
        #[arg(long)]
        dry_run: bool,
        /// Track to keep for a group, as GROUP_ID=URI
        #[arg(long = "select", value_name = "GROUP=URI", value_parser = parse_selection)]
        select: Vec<(String, String)>,
        /// Detect and clean again until no duplicates remain
        #[arg(long, conflicts_with = "dry_run")]
        converge: bool,
    },
    /// Create a playlist holding every missing catalog track
    ExportMissing { name: String },
}

fn parse_selection(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((group, uri)) if !group.trim().is_empty() && !uri.trim().is_empty() => {
            Ok((group.trim().to_string(), uri.trim().to_string()))
        }
        _ => Err(format!("expected GROUP_ID=URI, got '{raw}'")),
    }
}

struct App {
    config: AppConfig,
    services: Services,
    reconciler: Arc<MissingTrackReconciler>,
}

impl App {
    fn new(config: AppConfig) -> Result<Self> {
        let backend = Arc::new(
            BackendClient::builder()
                .base_url(&config.backend_url)
                .build()
                .context("Invalid backend configuration")?,
        );

        let mut builder = ServicesBuilder::new()
            .comparison(backend.clone())
            .acquisition(backend.clone())
            .duplicates(backend)
            .store(Arc::new(JsonFileStore::new(&config.cache_dir)));

        match config.spotify_access_token() {
            Some(token) => {
                let spotify = SpotifyClient::builder()
                    .base_url(&config.spotify_api_url)
                    .access_token(token)
                    .build()
                    .context("Invalid Spotify configuration")?;
                builder = builder.playlists(Arc::new(spotify));
            }
            None => warn!("SPOTIFY_ACCESS_TOKEN not set, playlist changes are unavailable"),
        }

        let services = builder.build()?;
        for (role, name) in services.describe() {
            info!("Using {} for {}", name, role);
        }

        let ttl = Duration::seconds(config.cache_ttl_secs);
        let cache = Arc::new(ReconciliationCache::with_ttl(services.store().clone(), ttl));
        let reconciler = Arc::new(MissingTrackReconciler::new(
            services.comparison().clone(),
            cache,
            ReconcilerConfig {
                master_dir_hint: config.master_tracks_dir.clone(),
            },
        ));

        Ok(Self {
            config,
            services,
            reconciler,
        })
    }

    async fn run(&self, command: Command) -> Result<serde_json::Value> {
        match command {
            Command::Status => {
                let health = SystemHealth {
                    backend_online: self.services.acquisition().health_check().await,
                    cache_fresh: !self.reconciler.cache().is_stale_default(Utc::now()).await,
                };
                Ok(serde_json::to_value(health)?)
            }
            Command::Missing { force } => {
                let reconciled = self.reconciler.reconcile(force).await?;
                let snapshot = &reconciled.snapshot;
                if let Some(dir) = &reconciled.suggested_master_dir {
                    info!("Set MASTER_TRACKS_DIR={} to pin the master directory", dir);
                }
                Ok(json!({
                    "from_cache": reconciled.from_cache,
                    "captured_at": snapshot.captured_at,
                    "master_track_count": snapshot.master_tracks.len(),
                    "local_track_count": snapshot.local_track_count,
                    "master_tracks_dir": snapshot.master_tracks_dir,
                    "missing_tracks": snapshot.missing_tracks,
                }))
            }
            Command::Download { all, uris } => {
                let tracks = if all {
                    self.reconciler.reconcile(false).await?.snapshot.missing_tracks.clone()
                } else {
                    self.lookup_tracks(uris).await
                };
                let orchestrator = BatchDownloadOrchestrator::new(
                    self.services.acquisition().clone(),
                    self.reconciler.clone(),
                    OrchestratorConfig {
                        destination: self.config.download_dir.clone(),
                        max_in_flight: self.config.max_in_flight,
                        chunk_size: self.config.download_chunk_size,
                    },
                );

                let mut progress = orchestrator.subscribe();
                let reporter = tokio::spawn(async move {
                    while progress.changed().await.is_ok() {
                        let p = progress.borrow_and_update().clone();
                        if p.total_count > 0 {
                            info!("Downloaded {}/{}", p.completed_count, p.total_count);
                        }
                    }
                });

                let result = orchestrator.download_many(&tracks).await;
                drop(orchestrator);
                let _ = reporter.await;
                Ok(serde_json::to_value(result?)?)
            }
            Command::Duplicates => {
                let groups = self.resolver().detect().await?;
                Ok(json!({
                    "summary": DuplicateGroupResolver::summarize(&groups),
                    "groups": groups,
                }))
            }
            Command::Cleanup {
                dry_run,
                select,
                converge,
            } => {
                let selections: SelectionMap = select.into_iter().collect();
                let executor = CleanupExecutor::new(
                    self.services.playlists()?.clone(),
                    ExecutorConfig {
                        max_in_flight: self.config.max_in_flight,
                        max_rounds: self.config.cleanup_max_rounds,
                    },
                );
                let resolver = self.resolver();
                if converge {
                    let report = executor.converge(&resolver, &selections).await?;
                    return Ok(json!({
                        "outcome": format!("{:?}", report.outcome),
                        "tracks_removed": report.tracks_removed(),
                        "rounds": report.rounds,
                    }));
                }
                let groups = resolver.detect().await?;
                let result = executor.execute(&groups, &selections, dry_run).await?;
                Ok(serde_json::to_value(result)?)
            }
            Command::ExportMissing { name } => {
                let playlists = self.services.playlists()?;
                let exported = self
                    .reconciler
                    .export_missing_playlist(playlists.as_ref(), &name)
                    .await?;
                Ok(json!({
                    "playlist_id": exported.playlist_id,
                    "tracks_added": exported.tracks_added,
                }))
            }
        }
    }

    fn resolver(&self) -> DuplicateGroupResolver {
        DuplicateGroupResolver::new(self.services.duplicates().clone())
    }

    /// Resolves uris against the cached snapshot so downloads carry titles
    /// in their logs; unknown uris are sent as bare records.
    async fn lookup_tracks(&self, uris: Vec<String>) -> Vec<TrackRecord> {
        let known = self.reconciler.cache().get().await;
        uris.into_iter()
            .map(|uri| {
                known
                    .as_ref()
                    .and_then(|s| s.master_tracks.iter().find(|t| t.uri == uri).cloned())
                    .unwrap_or_else(|| TrackRecord {
                        id: uri.clone(),
                        uri,
                        ..Default::default()
                    })
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }
    let config = AppConfig::from_env()?;
    let app = App::new(config)?;

    let output = app.run(cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_argument_parsing() {
        assert_eq!(
            parse_selection("abc123=spotify:track:9").unwrap(),
            ("abc123".to_string(), "spotify:track:9".to_string())
        );
        assert!(parse_selection("abc123").is_err());
        assert!(parse_selection("=spotify:track:9").is_err());
    }

    #[test]
    fn cli_shape() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["masterlist", "cleanup", "--dry-run", "--select", "g=u"])
            .unwrap();
        match cli.command {
            Command::Cleanup {
                dry_run, select, ..
            } => {
                assert!(dry_run);
                assert_eq!(select, vec![("g".to_string(), "u".to_string())]);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["masterlist", "download"]).is_err());
    }
}
