use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{ChecksumAlgorithm, ValidationPolicy};
use crate::error::SegmentFetchError;
use crate::hls::{ByteRange, HlsPartialSegment, HlsSegment};
use crate::network::{HttpClient, TransportError};

pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(20);

/// 一次成功下载的统计
#[derive(Debug, Clone, PartialEq)]
pub struct FetchMetrics {
    pub url: String,
    pub bytes: u64,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

pub type MetricsSubscriber = Arc<dyn Fn(FetchMetrics) + Send + Sync>;

/// Anything able to produce segment and part bytes.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch_segment(&self, segment: &HlsSegment) -> Result<Bytes, SegmentFetchError>;
    async fn fetch_part(&self, part: &HlsPartialSegment) -> Result<Bytes, SegmentFetchError>;
}

struct FetcherState {
    validation: ValidationPolicy,
    subscriber: Option<MetricsSubscriber>,
    latest: Option<FetchMetrics>,
}

#[derive(Clone)]
pub struct HlsSegmentFetcher {
    client: HttpClient,
    timeout: Duration,
    state: Arc<RwLock<FetcherState>>,
}

impl HlsSegmentFetcher {
    pub fn new(client: HttpClient, validation: ValidationPolicy) -> Self {
        Self::with_timeout(client, validation, DEFAULT_SEGMENT_TIMEOUT)
    }

    pub fn with_timeout(client: HttpClient, validation: ValidationPolicy, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            state: Arc::new(RwLock::new(FetcherState {
                validation,
                subscriber: None,
                latest: None,
            })),
        }
    }

    pub async fn update_validation_policy(&self, validation: ValidationPolicy) {
        self.state.write().await.validation = validation;
    }

    /// 单一订阅者, 重新注册会替换旧的
    pub async fn set_metrics_subscriber(&self, subscriber: Option<MetricsSubscriber>) {
        self.state.write().await.subscriber = subscriber;
    }

    pub async fn latest_metrics(&self) -> Option<FetchMetrics> {
        self.state.read().await.latest.clone()
    }

    async fn fetch_resource(&self, url: &str, byte_range: Option<&ByteRange>) -> Result<Bytes, SegmentFetchError> {
        let started = Instant::now();
        let range = byte_range.map(ByteRange::http_range);

        let response = self
            .client
            .get(url, range.as_deref(), self.timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout => SegmentFetchError::Timeout,
                TransportError::InvalidUrl(url) => SegmentFetchError::InvalidUrl(url),
                other => SegmentFetchError::InvalidResponse(other.to_string()),
            })?;

        if !response.is_success() {
            return Err(SegmentFetchError::HttpStatus(response.status));
        }
        if response.body.is_empty() {
            return Err(SegmentFetchError::EmptyBody);
        }

        let validation = self.state.read().await.validation.clone();
        if let Err(e) = validate(&response.body, byte_range, &validation) {
            warn!("Validation failed for {}: {}", url, e);
            return Err(e);
        }

        let metrics = FetchMetrics {
            url: url.to_string(),
            bytes: response.body.len() as u64,
            duration: started.elapsed(),
            timestamp: Utc::now(),
        };
        debug!(
            "Fetched {} ({} bytes in {:?})",
            metrics.url, metrics.bytes, metrics.duration
        );

        let subscriber = {
            let mut state = self.state.write().await;
            state.latest = Some(metrics.clone());
            state.subscriber.clone()
        };
        if let Some(subscriber) = subscriber {
            subscriber(metrics);
        }

        Ok(response.body)
    }
}

#[async_trait]
impl SegmentSource for HlsSegmentFetcher {
    async fn fetch_segment(&self, segment: &HlsSegment) -> Result<Bytes, SegmentFetchError> {
        self.fetch_resource(&segment.url, segment.byte_range.as_ref()).await
    }

    async fn fetch_part(&self, part: &HlsPartialSegment) -> Result<Bytes, SegmentFetchError> {
        self.fetch_resource(&part.url, part.byte_range.as_ref()).await
    }
}

fn validate(data: &[u8], byte_range: Option<&ByteRange>, policy: &ValidationPolicy) -> Result<(), SegmentFetchError> {
    if policy.enforce_byte_range_length {
        if let Some(range) = byte_range {
            let actual = data.len() as u64;
            if actual != range.length {
                return Err(SegmentFetchError::LengthMismatch {
                    expected: range.length,
                    actual,
                });
            }
        }
    }

    if let Some(checksum) = &policy.checksum {
        let actual = match checksum.algorithm {
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        };
        if !actual.eq_ignore_ascii_case(checksum.value.trim()) {
            return Err(SegmentFetchError::ChecksumMismatch {
                expected: checksum.value.clone(),
                actual,
            });
        }
    }

    Ok(())
}
