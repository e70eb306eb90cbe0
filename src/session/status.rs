use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::LoadState;
use crate::abr::{AdaptiveVariantController, DecisionAction, ThroughputEstimator};
use crate::cache::HlsSegmentCache;
use crate::config::{DrmPolicy, ProxyConfig};
use crate::hls::PlaylistRefreshController;
use crate::proxy::StatusProvider;
use crate::segment::SegmentPrefetchScheduler;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Idle,
    Buffering,
    Ready,
    Failed(String),
}

/// 对外暴露的播放状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerState {
    pub status: PlayerStatus,
    pub buffer_depth_secs: f64,
    pub quality_description: String,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            status: PlayerStatus::Idle,
            buffer_depth_secs: 0.0,
            quality_description: "auto".to_string(),
        }
    }
}

impl PlayerState {
    pub(super) fn buffering(quality_description: String) -> Self {
        Self {
            status: PlayerStatus::Buffering,
            buffer_depth_secs: 0.0,
            quality_description,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == PlayerStatus::Ready
    }
}

/// Builds the `/debug/status` document from live session state.
pub(super) struct StatusReporter {
    pub(super) config: Arc<RwLock<ProxyConfig>>,
    pub(super) cache: HlsSegmentCache,
    pub(super) scheduler: SegmentPrefetchScheduler,
    pub(super) refresh: PlaylistRefreshController,
    pub(super) estimator: ThroughputEstimator,
    pub(super) abr: AdaptiveVariantController,
    pub(super) status: Arc<RwLock<PlayerState>>,
    pub(super) load: Arc<RwLock<LoadState>>,
}

#[async_trait]
impl StatusProvider for StatusReporter {
    async fn status(&self) -> serde_json::Value {
        let state = self.status.read().await.clone();
        let buffer = self.scheduler.buffer_state().await;
        let drm = self.config.read().await.drm;
        let cache = self.cache.metrics().await;
        let refresh_running = self.refresh.is_running().await;
        let refresh_metrics = self.refresh.metrics().await;
        let throughput = self.estimator.sample().await;
        let current_variant = self.abr.current_variant().await.map(|variant| variant.url);
        let consecutive_failures = self.abr.consecutive_failures().await;
        let prefetch = self.scheduler.last_telemetry().await;

        let abr = match self.abr.latest_decision().await {
            Some(decision) => json!({
                "reason": decision.reason,
                "action": match &decision.action {
                    DecisionAction::Hold => "hold".to_string(),
                    DecisionAction::SwitchVariant(variant) => format!("switch:{}", variant.url),
                },
                "timestamp": decision.timestamp,
            }),
            None => serde_json::Value::Null,
        };

        let load = self.load.read().await;
        let renditions: Vec<serde_json::Value> = load
            .renditions
            .iter()
            .map(|track| {
                json!({
                    "id": track.id(),
                    "type": track.rendition.kind.as_attribute(),
                    "language": track.rendition.language,
                    "default": track.rendition.is_default,
                    "loaded": track.playlist.is_some(),
                    "refreshing": track.refresh.is_some(),
                })
            })
            .collect();

        json!({
            "load_id": load.load_id.map(|id| id.to_string()),
            "source_url": load.source_url,
            "state": state.status,
            "quality": state.quality_description,
            "playing": load.playing,
            "quality_policy": load.quality,
            "variant": load.variant.as_ref().map(|variant| variant.describe()),
            "variant_count": load.variants.len(),
            "buffer": {
                "buffered_segments": buffer.ready_segment_count(),
                "ready_parts": buffer.ready_part_total(),
                "prefetch_depth_seconds": buffer.prefetch_depth_secs,
                "part_depth_seconds": buffer.part_depth_secs,
                "played_through_sequence": buffer.played_through,
            },
            "cache": cache,
            "refresh": {
                "running": refresh_running,
                "metrics": refresh_metrics,
            },
            "throughput": throughput,
            "abr": {
                "current_variant": current_variant,
                "consecutive_failures": consecutive_failures,
                "latest_decision": abr,
            },
            "prefetch": prefetch,
            "renditions": renditions,
            "keys": {
                "policy": match drm {
                    DrmPolicy::Passthrough => "passthrough",
                    DrmPolicy::Proxy => "proxy",
                },
                "entries": load.key_statuses,
                "proxied": load.proxied_keys.len(),
            },
        })
    }
}
