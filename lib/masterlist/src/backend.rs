use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    download::{AcquisitionOutcome, BatchAcquisitionOutcome},
    library::DuplicateScan,
    reconcile::ComparisonResponse,
};
use std::{path::Path, time::Duration};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, SyncError};
use crate::http;
use crate::{AcquisitionService, ComparisonSource, DuplicateSource};

/// Downloads and duplicate scans can take minutes on large libraries.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// HTTP client for the local companion service that sees both the master
/// collection and the files on disk.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: Url,
    client: Client,
}

#[derive(Default)]
pub struct BackendClientBuilder {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl BackendClientBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn base_url(mut self, url: &str) -> Self {
        let mut resolved_url = url.to_string();
        if Path::new("/.dockerenv").exists() && resolved_url.contains("localhost") {
            resolved_url = resolved_url.replace("localhost", "host.docker.internal");
            info!("Docker detected, using {} for backend connection", resolved_url);
        }
        self.base_url = Some(resolved_url);
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = Some(seconds);
        self
    }

    pub fn build(self) -> Result<BackendClient> {
        let base_url = self.base_url.ok_or(SyncError::NotConfigured("backend url"))?;
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(
                self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()?;

        Ok(BackendClient { base_url, client })
    }
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    track_uri: &'a str,
    download_dir: &'a Path,
}

#[derive(Serialize)]
struct BatchDownloadRequest<'a> {
    track_uris: &'a [String],
    download_dir: &'a Path,
}

impl BackendClient {
    pub fn builder() -> BackendClientBuilder {
        BackendClientBuilder::new()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("api/{path}"))?)
    }

    async fn make_request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<B>,
    ) -> Result<T> {
        debug!("Request: {} {}", method, url);
        http::send(self.client.request(method, url), body).await
    }
}

#[async_trait]
impl ComparisonSource for BackendClient {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn compare(&self, master_dir_hint: Option<&str>) -> Result<ComparisonResponse> {
        let mut url = self.endpoint("compare")?;
        if let Some(dir) = master_dir_hint.filter(|d| !d.trim().is_empty()) {
            url.query_pairs_mut().append_pair("master_dir", dir);
        }
        self.make_request(Method::GET, url, None::<()>).await
    }
}

#[async_trait]
impl AcquisitionService for BackendClient {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn download(&self, uri: &str, destination: &Path) -> Result<AcquisitionOutcome> {
        let body = DownloadRequest {
            track_uri: uri,
            download_dir: destination,
        };
        self.make_request(Method::POST, self.endpoint("download")?, Some(&body))
            .await
    }

    async fn download_batch(
        &self,
        uris: &[String],
        destination: &Path,
    ) -> Result<BatchAcquisitionOutcome> {
        info!("Requesting {} downloads from backend", uris.len());
        let body = BatchDownloadRequest {
            track_uris: uris,
            download_dir: destination,
        };
        self.make_request(Method::POST, self.endpoint("download-batch")?, Some(&body))
            .await
    }

    async fn health_check(&self) -> bool {
        match self.endpoint("health") {
            Ok(url) => self
                .make_request::<serde_json::Value, ()>(Method::GET, url, None)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl DuplicateSource for BackendClient {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn detect_duplicates(&self) -> Result<DuplicateScan> {
        self.make_request(Method::GET, self.endpoint("duplicates")?, None::<()>)
            .await
    }
}
