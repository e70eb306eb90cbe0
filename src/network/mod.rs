use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{header, Body, Client, Request, Uri};
use hyper_tls::HttpsConnector;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::Result;

mod manifest;
mod retry;

pub use manifest::{ManifestFetcher, DEFAULT_MANIFEST_TIMEOUT};
pub(crate) use retry::with_retry;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 支持 http 和 https 的共享客户端
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let tls = native_tls::TlsConnector::new()?;
        let https = HttpsConnector::from((http, tls.into()));

        Ok(Self {
            client: Client::builder().build(https),
        })
    }

    /// GET with an optional `Range` header. The whole exchange, body
    /// included, is bounded by `timeout`.
    pub async fn get(
        &self,
        url: &str,
        range: Option<&str>,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;

        let mut builder = Request::get(uri).header(header::CACHE_CONTROL, "no-cache");
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        let request = builder
            .body(Body::empty())
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let status = response.status().as_u16();
            let body = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            Ok(HttpResponse { status, body })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if let Ok(response) = &result {
                    debug!("GET {} -> {} ({} bytes)", url, response.status, response.body.len());
                }
                result
            }
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{OriginServer, Route};
    use tokio::test;

    #[test]
    async fn test_get_passes_range_header() {
        let origin = OriginServer::start(vec![Route::echo_range("/media.bin")]).await;
        let client = HttpClient::new().unwrap();

        let response = client
            .get(&origin.url("/media.bin"), Some("bytes=10-19"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(&response.body[..], b"bytes=10-19");
    }

    #[test]
    async fn test_get_times_out() {
        let origin = OriginServer::start(vec![Route::delayed("/slow", Duration::from_secs(2))]).await;
        let client = HttpClient::new().unwrap();

        let result = client
            .get(&origin.url("/slow"), None, Duration::from_millis(100))
            .await;
        assert_eq!(result.unwrap_err(), TransportError::Timeout);
    }

    #[test]
    async fn test_invalid_url() {
        let client = HttpClient::new().unwrap();
        let result = client.get("not a url", None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }
}
