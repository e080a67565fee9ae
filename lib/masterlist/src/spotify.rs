use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, SyncError};
use crate::http;
use crate::PlaylistService;

pub const DEFAULT_API_URL: &str = "https://api.spotify.com/v1";

/// Sliding window limiter shared by every mutating call.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    timestamps: Mutex<VecDeque<Instant>>,
    max_calls: usize,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            max_calls: max_calls.max(1),
            window,
        }
    }

    /// Waits until one more call fits in the window, then records it.
    pub(crate) async fn acquire(&self) {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        while timestamps
            .front()
            .is_some_and(|ts| now.duration_since(*ts) >= self.window)
        {
            timestamps.pop_front();
        }
        if timestamps.len() >= self.max_calls {
            if let Some(&oldest) = timestamps.front() {
                let wait = (oldest + self.window).saturating_duration_since(now);
                if !wait.is_zero() {
                    info!(
                        "Rate limit reached ({}/{}), waiting for {:.1}s",
                        timestamps.len(),
                        self.max_calls,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
            timestamps.pop_front();
        }
        timestamps.push_back(Instant::now());
    }
}

/// Web API client used for playlist mutations.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    base_url: Url,
    access_token: String,
    client: Client,
    limiter: Arc<RateLimiter>,
}

#[derive(Default)]
pub struct SpotifyClientBuilder {
    base_url: Option<String>,
    access_token: Option<String>,
    max_mutations_per_window: Option<usize>,
    rate_limit_window_seconds: Option<u64>,
}

impl SpotifyClientBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    pub fn access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn rate_limit(mut self, max_mutations: usize, window_seconds: u64) -> Self {
        self.max_mutations_per_window = Some(max_mutations);
        self.rate_limit_window_seconds = Some(window_seconds);
        self
    }

    pub fn build(self) -> Result<SpotifyClient> {
        let access_token = self
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(SyncError::NotConfigured("spotify access token"))?;
        let base_url = self.base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;

        Ok(SpotifyClient {
            base_url,
            access_token,
            client: Client::new(),
            limiter: Arc::new(RateLimiter::new(
                self.max_mutations_per_window.unwrap_or(60),
                Duration::from_secs(self.rate_limit_window_seconds.unwrap_or(30)),
            )),
        })
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Serialize)]
struct NewPlaylist<'a> {
    name: &'a str,
    description: &'a str,
    public: bool,
}

#[derive(Serialize)]
struct AddTracks<'a> {
    uris: &'a [String],
}

#[derive(Serialize)]
struct TrackUri<'a> {
    uri: &'a str,
}

#[derive(Serialize)]
struct RemoveTracks<'a> {
    tracks: [TrackUri<'a>; 1],
}

impl SpotifyClient {
    pub fn builder() -> SpotifyClientBuilder {
        SpotifyClientBuilder::new()
    }

    /// Appends percent-encoded path segments to the api root.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Validation(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn make_request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<B>,
    ) -> Result<T> {
        debug!("Request: {} {}", method, url);
        let request = self
            .client
            .request(method, url)
            .bearer_auth(&self.access_token);
        http::send(request, body).await
    }
}

#[async_trait]
impl PlaylistService for SpotifyClient {
    fn name(&self) -> &'static str {
        "spotify"
    }

    async fn current_user_id(&self) -> Result<String> {
        let me: IdOnly = self
            .make_request(Method::GET, self.endpoint(&["me"])?, None::<()>)
            .await?;
        Ok(me.id)
    }

    async fn create_playlist(&self, user_id: &str, name: &str, description: &str) -> Result<String> {
        self.limiter.acquire().await;
        let body = NewPlaylist {
            name,
            description,
            public: false,
        };
        let created: IdOnly = self
            .make_request(
                Method::POST,
                self.endpoint(&["users", user_id, "playlists"])?,
                Some(&body),
            )
            .await?;
        Ok(created.id)
    }

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        if uris.is_empty() {
            return Ok(());
        }
        self.limiter.acquire().await;
        debug!("Adding {} tracks to playlist {}", uris.len(), playlist_id);
        self.make_request::<serde_json::Value, _>(
            Method::POST,
            self.endpoint(&["playlists", playlist_id, "tracks"])?,
            Some(&AddTracks { uris }),
        )
        .await?;
        Ok(())
    }

    async fn remove_track(&self, playlist_id: &str, uri: &str) -> Result<()> {
        self.limiter.acquire().await;
        debug!("Removing {} from playlist {}", uri, playlist_id);
        self.make_request::<serde_json::Value, _>(
            Method::DELETE,
            self.endpoint(&["playlists", playlist_id, "tracks"])?,
            Some(&RemoveTracks {
                tracks: [TrackUri { uri }],
            }),
        )
        .await?;
        Ok(())
    }
}
