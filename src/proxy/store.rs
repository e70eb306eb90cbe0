use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub const MASTER_PLAYLIST: &str = "master";
pub const PRIMARY_PLAYLIST: &str = "variant-primary";

/// 尚未加载时返回的占位播放列表
pub const PLACEHOLDER_PLAYLIST: &str = "#EXTM3U\n#EXT-X-ENDLIST";

pub fn rendition_playlist(rendition_id: &str) -> String {
    format!("rendition-{}", rendition_id)
}

/// 按标识保存的重写后播放列表文本
#[derive(Debug, Clone)]
pub struct PlaylistStore {
    playlists: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for PlaylistStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaylistStore {
    pub fn new() -> Self {
        Self {
            playlists: Arc::new(RwLock::new(placeholders())),
        }
    }

    pub async fn update(&self, identifier: &str, text: String) {
        debug!("Playlist {} updated ({} bytes)", identifier, text.len());
        self.playlists.write().await.insert(identifier.to_string(), text);
    }

    pub async fn snapshot(&self, identifier: &str) -> Option<String> {
        self.playlists.read().await.get(identifier).cloned()
    }

    pub async fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.playlists.read().await.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    /// Drops every rendition playlist and puts the placeholders back.
    pub async fn reset(&self) {
        *self.playlists.write().await = placeholders();
    }
}

fn placeholders() -> HashMap<String, String> {
    [MASTER_PLAYLIST, PRIMARY_PLAYLIST]
        .into_iter()
        .map(|identifier| (identifier.to_string(), PLACEHOLDER_PLAYLIST.to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuxiliaryAssetType {
    Audio,
    Subtitles,
    Keys,
}

impl AuxiliaryAssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuxiliaryAssetType::Audio => "audio",
            AuxiliaryAssetType::Subtitles => "subtitles",
            AuxiliaryAssetType::Keys => "keys",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AuxiliaryAssetType::Audio => "audio/aac",
            AuxiliaryAssetType::Subtitles => "text/vtt",
            AuxiliaryAssetType::Keys => "application/octet-stream",
        }
    }

    /// 密钥不允许缓存
    pub fn cache_control(&self) -> &'static str {
        match self {
            AuxiliaryAssetType::Keys => "private, max-age=0, no-store",
            AuxiliaryAssetType::Audio | AuxiliaryAssetType::Subtitles => "public, max-age=60",
        }
    }
}

impl FromStr for AuxiliaryAssetType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "audio" => Ok(AuxiliaryAssetType::Audio),
            "subtitles" => Ok(AuxiliaryAssetType::Subtitles),
            "keys" => Ok(AuxiliaryAssetType::Keys),
            other => Err(format!("unknown asset type: {}", other)),
        }
    }
}

/// 音频/字幕/密钥等附加资源
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryAssetStore {
    assets: Arc<RwLock<HashMap<(AuxiliaryAssetType, String), Bytes>>>,
}

impl AuxiliaryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, data: Bytes, identifier: &str, kind: AuxiliaryAssetType) {
        debug!("Registered {} asset {} ({} bytes)", kind.as_str(), identifier, data.len());
        self.assets
            .write()
            .await
            .insert((kind, identifier.to_string()), data);
    }

    pub async fn data(&self, identifier: &str, kind: AuxiliaryAssetType) -> Option<Bytes> {
        self.assets
            .read()
            .await
            .get(&(kind, identifier.to_string()))
            .cloned()
    }

    pub async fn count(&self, kind: AuxiliaryAssetType) -> usize {
        self.assets
            .read()
            .await
            .keys()
            .filter(|(asset_kind, _)| *asset_kind == kind)
            .count()
    }

    pub async fn remove(&self, identifier: &str, kind: AuxiliaryAssetType) -> Option<Bytes> {
        self.assets.write().await.remove(&(kind, identifier.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::test;

    #[test]
    async fn test_playlist_store_placeholders() {
        let store = PlaylistStore::new();
        assert_eq!(store.snapshot(MASTER_PLAYLIST).await.as_deref(), Some(PLACEHOLDER_PLAYLIST));
        assert_eq!(store.snapshot(PRIMARY_PLAYLIST).await.as_deref(), Some(PLACEHOLDER_PLAYLIST));
        assert!(store.snapshot(&rendition_playlist("audio-en")).await.is_none());

        store.update(&rendition_playlist("audio-en"), "#EXTM3U\n".to_string()).await;
        assert_eq!(store.identifiers().await.len(), 3);

        store.reset().await;
        assert!(store.snapshot("rendition-audio-en").await.is_none());
        assert_eq!(store.snapshot(MASTER_PLAYLIST).await.as_deref(), Some(PLACEHOLDER_PLAYLIST));
    }

    #[test]
    async fn test_assets_are_keyed_by_type() {
        let store = AuxiliaryAssetStore::new();
        store
            .register(Bytes::from_static(b"key"), "abc", AuxiliaryAssetType::Keys)
            .await;
        assert!(store.data("abc", AuxiliaryAssetType::Audio).await.is_none());
        assert_eq!(
            store.data("abc", AuxiliaryAssetType::Keys).await,
            Some(Bytes::from_static(b"key"))
        );
        assert_eq!(store.count(AuxiliaryAssetType::Keys).await, 1);

        assert!(store.remove("abc", AuxiliaryAssetType::Audio).await.is_none());
        assert!(store.remove("abc", AuxiliaryAssetType::Keys).await.is_some());
        assert_eq!(store.count(AuxiliaryAssetType::Keys).await, 0);
    }

    #[test]
    async fn test_asset_type_parsing() {
        assert_eq!("keys".parse::<AuxiliaryAssetType>(), Ok(AuxiliaryAssetType::Keys));
        assert!("video".parse::<AuxiliaryAssetType>().is_err());
        assert_eq!(AuxiliaryAssetType::Keys.cache_control(), "private, max-age=0, no-store");
        assert_eq!(AuxiliaryAssetType::Subtitles.content_type(), "text/vtt");
    }
}
