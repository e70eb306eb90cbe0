use async_trait::async_trait;
use bytes::Bytes;
use hyper::{header, Body, Response, StatusCode};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use super::response;
use super::router::{ProxyRequest, RouteHandler};
use super::store::{rendition_playlist, AuxiliaryAssetStore, AuxiliaryAssetType, PlaylistStore};
use crate::cache::HlsSegmentCache;
use crate::diagnostics::Diagnostics;
use crate::hls::identity;
use crate::segment::{CatalogEntry, CatalogNamespace, SegmentCatalog, SegmentPrefetchScheduler, SegmentSource};

/// 播放列表标识的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistSelector {
    Fixed(String),
    /// `/renditions/<id>.m3u8`
    Rendition,
}

pub struct PlaylistHandler {
    store: PlaylistStore,
    selector: PlaylistSelector,
    diagnostics: Diagnostics,
}

impl PlaylistHandler {
    pub fn new(store: PlaylistStore, selector: PlaylistSelector, diagnostics: Diagnostics) -> Self {
        Self {
            store,
            selector,
            diagnostics,
        }
    }

    fn identifier(&self, request: &ProxyRequest) -> Option<String> {
        match &self.selector {
            PlaylistSelector::Fixed(identifier) => Some(identifier.clone()),
            PlaylistSelector::Rendition => {
                let name = request.wildcard.as_deref()?;
                let id = name.strip_suffix(".m3u8").unwrap_or(name);
                (!id.is_empty() && !id.contains('/')).then(|| rendition_playlist(id))
            }
        }
    }
}

#[async_trait]
impl RouteHandler for PlaylistHandler {
    async fn handle(&self, request: ProxyRequest) -> Response<Body> {
        let identifier = match self.identifier(&request) {
            Some(identifier) => identifier,
            None => return response::not_found(),
        };
        match self.store.snapshot(&identifier).await {
            Some(text) => {
                self.diagnostics.playlist_served(&identifier);
                response::playlist(text)
            }
            None => response::not_found(),
        }
    }
}

/// 分片请求: 缓存命中直接返回, 否则按目录同步拉取
pub struct SegmentHandler {
    cache: HlsSegmentCache,
    catalog: SegmentCatalog,
    source: Arc<dyn SegmentSource>,
    scheduler: SegmentPrefetchScheduler,
    diagnostics: Diagnostics,
}

impl SegmentHandler {
    pub fn new(
        cache: HlsSegmentCache,
        catalog: SegmentCatalog,
        source: Arc<dyn SegmentSource>,
        scheduler: SegmentPrefetchScheduler,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            cache,
            catalog,
            source,
            scheduler,
            diagnostics,
        }
    }

    async fn fetch_and_cache(&self, key: &str, namespace: &CatalogNamespace, entry: &CatalogEntry) -> Option<Bytes> {
        let fetched = match entry {
            CatalogEntry::Segment(segment) => self.source.fetch_segment(segment).await,
            CatalogEntry::Part(part) => self.source.fetch_part(part).await,
        };
        let data = match fetched {
            Ok(data) => data,
            Err(e) => {
                warn!("On-demand fetch failed for {}: {}", key, e);
                return None;
            }
        };

        self.cache.put(data.clone(), key).await;
        if namespace.is_primary() {
            match entry {
                CatalogEntry::Segment(segment) => self.scheduler.register_ready_segment(segment).await,
                CatalogEntry::Part(part) => self.scheduler.register_ready_part(part).await,
            }
        }
        Some(data)
    }

    /// 主命名空间的分片被取走后推进播放头
    async fn report_consumption(&self, key: &str, entry: Option<&(CatalogNamespace, CatalogEntry)>) {
        let (namespace, entry) = match entry {
            Some((namespace, entry)) if namespace.is_primary() => (namespace, entry),
            _ => return,
        };
        debug!("Primary {:?} entry {} served", namespace, key);
        match entry {
            CatalogEntry::Segment(_) => {
                if let Some(sequence) = identity::sequence_from(key) {
                    self.diagnostics.segment_served(sequence);
                    self.scheduler.consume(sequence).await;
                }
            }
            CatalogEntry::Part(_) => {
                if let Some((sequence, part_index)) = identity::part_info_from(key) {
                    self.scheduler.consume_part(sequence, part_index).await;
                }
            }
        }
    }
}

#[async_trait]
impl RouteHandler for SegmentHandler {
    async fn handle(&self, request: ProxyRequest) -> Response<Body> {
        let key = match request
            .wildcard
            .as_deref()
            .and_then(|rest| rest.rsplit('/').next())
            .filter(|key| !key.is_empty())
        {
            Some(key) => key.to_string(),
            None => return response::not_found(),
        };

        if let Some(data) = self.cache.get(&key).await {
            let entry = self.catalog.lookup(&key).await;
            self.report_consumption(&key, entry.as_ref()).await;
            return response::segment(data);
        }

        let entry = match self.catalog.lookup(&key).await {
            Some(entry) => entry,
            None => {
                debug!("Segment {} is not in the catalog", key);
                return response::unavailable();
            }
        };

        match self.fetch_and_cache(&key, &entry.0, &entry.1).await {
            Some(data) => {
                self.report_consumption(&key, Some(&entry)).await;
                response::segment(data)
            }
            None => response::unavailable(),
        }
    }
}

pub struct AssetHandler {
    store: AuxiliaryAssetStore,
}

impl AssetHandler {
    pub fn new(store: AuxiliaryAssetStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RouteHandler for AssetHandler {
    async fn handle(&self, request: ProxyRequest) -> Response<Body> {
        // <type>/<id>
        let rest = request.wildcard.unwrap_or_default();
        let mut parts = rest.split('/').filter(|part| !part.is_empty());
        let (kind, identifier) = match (parts.next(), parts.last()) {
            (Some(kind), Some(identifier)) => (kind, identifier),
            _ => return response::not_found(),
        };
        let kind: AuxiliaryAssetType = match kind.parse() {
            Ok(kind) => kind,
            Err(_) => return response::not_found(),
        };

        match self.store.data(identifier, kind).await {
            Some(data) => response::build(
                StatusCode::OK,
                &[
                    (header::CONTENT_TYPE, kind.content_type()),
                    (header::CACHE_CONTROL, kind.cache_control()),
                ],
                data,
            ),
            None => response::not_found(),
        }
    }
}

/// Prometheus 文本格式的缓存和缓冲指标
pub struct MetricsHandler {
    cache: HlsSegmentCache,
    scheduler: SegmentPrefetchScheduler,
}

impl MetricsHandler {
    pub fn new(cache: HlsSegmentCache, scheduler: SegmentPrefetchScheduler) -> Self {
        Self { cache, scheduler }
    }

    pub async fn render(&self) -> String {
        let (metrics, buffer) = tokio::join!(self.cache.metrics(), self.scheduler.buffer_state());

        let mut body = String::new();
        let mut metric = |name: &str, help: &str, kind: &str, value: String| {
            let _ = writeln!(body, "# HELP {} {}", name, help);
            let _ = writeln!(body, "# TYPE {} {}", name, kind);
            let _ = writeln!(body, "{} {}", name, value);
        };
        metric("hlsproxy_cache_hits", "Total number of cache hits", "counter", metrics.hits.to_string());
        metric("hlsproxy_cache_misses", "Total number of cache misses", "counter", metrics.misses.to_string());
        metric(
            "hlsproxy_cache_bytes",
            "Number of bytes stored in cache memory",
            "gauge",
            metrics.memory_bytes.to_string(),
        );
        metric(
            "hlsproxy_cache_disk_bytes",
            "Number of bytes spilled to disk",
            "gauge",
            metrics.disk_bytes.to_string(),
        );
        metric(
            "hlsproxy_buffer_depth_seconds",
            "Prefetch depth in seconds",
            "gauge",
            buffer.prefetch_depth_secs.to_string(),
        );
        metric(
            "hlsproxy_buffer_ready_segments",
            "Ready segment count",
            "gauge",
            buffer.ready_segment_count().to_string(),
        );
        metric(
            "hlsproxy_buffer_ready_parts",
            "Ready part count",
            "gauge",
            buffer.ready_part_total().to_string(),
        );
        metric(
            "hlsproxy_part_buffer_depth_seconds",
            "Part-prefetch depth in seconds",
            "gauge",
            buffer.part_depth_secs.to_string(),
        );
        body
    }
}

#[async_trait]
impl RouteHandler for MetricsHandler {
    async fn handle(&self, _request: ProxyRequest) -> Response<Body> {
        response::text(self.render().await, response::METRICS_CONTENT_TYPE)
    }
}

/// Produces the `/debug/status` document.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn status(&self) -> serde_json::Value;
}

pub struct StatusHandler {
    provider: Arc<dyn StatusProvider>,
}

impl StatusHandler {
    pub fn new(provider: Arc<dyn StatusProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RouteHandler for StatusHandler {
    async fn handle(&self, _request: ProxyRequest) -> Response<Body> {
        response::json(&self.provider.status().await)
    }
}
