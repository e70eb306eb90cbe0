use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{with_retry, HttpClient, TransportError};
use crate::config::RetryPolicy;
use crate::error::{FetchError, Result};
use crate::hls::{self, HlsManifest};

pub const DEFAULT_MANIFEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
struct FetcherSettings {
    retry: RetryPolicy,
    allow_insecure: bool,
}

/// 清单拉取器: 协议检查, 超时与重试
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: HttpClient,
    settings: Arc<RwLock<FetcherSettings>>,
}

impl ManifestFetcher {
    pub fn new(client: HttpClient, retry: RetryPolicy, allow_insecure: bool) -> Self {
        Self {
            client,
            settings: Arc::new(RwLock::new(FetcherSettings {
                retry,
                allow_insecure,
            })),
        }
    }

    pub async fn update_policy(&self, retry: RetryPolicy, allow_insecure: bool) {
        let mut settings = self.settings.write().await;
        settings.retry = retry;
        settings.allow_insecure = allow_insecure;
    }

    /// Fetches playlist text. `timeout` defaults to [`DEFAULT_MANIFEST_TIMEOUT`].
    pub async fn fetch(&self, url: &str, timeout: Option<Duration>) -> std::result::Result<String, FetchError> {
        let settings = self.settings.read().await.clone();
        check_scheme(url, settings.allow_insecure)?;

        let timeout = timeout.unwrap_or(DEFAULT_MANIFEST_TIMEOUT);
        debug!("Fetching manifest {} (timeout {:?})", url, timeout);

        with_retry(|| self.fetch_once(url, timeout), &settings.retry).await
    }

    /// Fetch and parse in one go, used by the initial load.
    pub async fn fetch_manifest(&self, url: &str) -> Result<HlsManifest> {
        let text = self.fetch(url, None).await?;
        let manifest = hls::parse(&text, url)?;
        info!(
            "Loaded manifest {} ({:?}, {} variants, {} renditions)",
            url,
            manifest.kind,
            manifest.variants.len(),
            manifest.renditions.len()
        );
        Ok(manifest)
    }

    async fn fetch_once(&self, url: &str, timeout: Duration) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(url, None, timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout => FetchError::Timeout,
                other => FetchError::InvalidResponse(other.to_string()),
            })?;

        if !response.is_success() {
            return Err(FetchError::HttpStatus(response.status));
        }
        if response.body.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        String::from_utf8(response.body.to_vec()).map_err(|_| FetchError::Utf8Decoding)
    }
}

fn check_scheme(url: &str, allow_insecure: bool) -> std::result::Result<(), FetchError> {
    let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidResponse(format!("invalid url {}", url)))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if allow_insecure => Ok(()),
        _ => Err(FetchError::InsecureScheme(url.to_string())),
    }
}
