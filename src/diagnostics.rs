use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::hls::{EncryptionMethod, HlsKey, RefreshMetrics, Rendition, RenditionType, VariantPlaylist};
use crate::utils::hash_url;

/// Proxied key summary. The URI itself is never exposed, only its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub method: EncryptionMethod,
    pub uri_hash: String,
    pub is_session_key: bool,
}

impl KeyStatus {
    pub fn from_key(key: &HlsKey) -> Option<Self> {
        let uri = key.uri.as_deref()?;
        Some(Self {
            method: key.method,
            uri_hash: hash_url(uri),
            is_session_key: key.is_session_key,
        })
    }
}

pub type PlaylistServedHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type SegmentServedHook = Arc<dyn Fn(u64) + Send + Sync>;
pub type PlaylistRefreshedHook = Arc<dyn Fn(&RefreshMetrics) + Send + Sync>;
pub type QualityChangedHook = Arc<dyn Fn(&VariantPlaylist) + Send + Sync>;
pub type RenditionChangedHook = Arc<dyn Fn(RenditionType, Option<&Rendition>) + Send + Sync>;
pub type KeyMetadataHook = Arc<dyn Fn(&[KeyStatus]) + Send + Sync>;

/// 可选的诊断回调, 都在调用方任务中同步执行
#[derive(Clone, Default)]
pub struct Diagnostics {
    pub on_playlist_served: Option<PlaylistServedHook>,
    pub on_segment_served: Option<SegmentServedHook>,
    pub on_playlist_refreshed: Option<PlaylistRefreshedHook>,
    pub on_quality_changed: Option<QualityChangedHook>,
    pub on_rendition_changed: Option<RenditionChangedHook>,
    pub on_key_metadata_changed: Option<KeyMetadataHook>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("on_playlist_served", &self.on_playlist_served.is_some())
            .field("on_segment_served", &self.on_segment_served.is_some())
            .field("on_playlist_refreshed", &self.on_playlist_refreshed.is_some())
            .field("on_quality_changed", &self.on_quality_changed.is_some())
            .field("on_rendition_changed", &self.on_rendition_changed.is_some())
            .field("on_key_metadata_changed", &self.on_key_metadata_changed.is_some())
            .finish()
    }
}

impl Diagnostics {
    pub fn playlist_served(&self, identifier: &str) {
        if let Some(hook) = &self.on_playlist_served {
            hook(identifier);
        }
    }

    pub fn segment_served(&self, sequence: u64) {
        if let Some(hook) = &self.on_segment_served {
            hook(sequence);
        }
    }

    pub fn playlist_refreshed(&self, metrics: &RefreshMetrics) {
        if let Some(hook) = &self.on_playlist_refreshed {
            hook(metrics);
        }
    }

    pub fn quality_changed(&self, variant: &VariantPlaylist) {
        if let Some(hook) = &self.on_quality_changed {
            hook(variant);
        }
    }

    pub fn rendition_changed(&self, kind: RenditionType, rendition: Option<&Rendition>) {
        if let Some(hook) = &self.on_rendition_changed {
            hook(kind, rendition);
        }
    }

    pub fn key_metadata_changed(&self, keys: &[KeyStatus]) {
        if let Some(hook) = &self.on_key_metadata_changed {
            hook(keys);
        }
    }
}
