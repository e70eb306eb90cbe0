use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::hls::identity;
use crate::hls::{HlsPartialSegment, HlsSegment, MediaPlaylist, PreloadHintType};

/// 分片目录的分区
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatalogNamespace {
    Primary,
    Rendition(String),
}

impl CatalogNamespace {
    /// Prefix fed to the key builders; the primary stream has none.
    pub fn key_prefix(&self) -> Option<&str> {
        match self {
            CatalogNamespace::Primary => None,
            CatalogNamespace::Rendition(id) => Some(id.as_str()),
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, CatalogNamespace::Primary)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntry {
    Segment(HlsSegment),
    Part(HlsPartialSegment),
}

impl CatalogEntry {
    pub fn url(&self) -> &str {
        match self {
            CatalogEntry::Segment(segment) => &segment.url,
            CatalogEntry::Part(part) => &part.url,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            CatalogEntry::Segment(segment) => segment.sequence,
            CatalogEntry::Part(part) => part.parent_sequence,
        }
    }
}

/// 代理分片键到源地址的映射, 按命名空间分区
#[derive(Debug, Clone, Default)]
pub struct SegmentCatalog {
    state: Arc<RwLock<HashMap<CatalogNamespace, HashMap<String, CatalogEntry>>>>,
}

impl SegmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the partition and seeds it from `playlist`.
    pub async fn replace(&self, namespace: CatalogNamespace, playlist: &MediaPlaylist) {
        let entries = entries_for(&namespace, playlist);
        debug!("Catalog {:?} seeded with {} entries", namespace, entries.len());
        self.state.write().await.insert(namespace, entries);
    }

    /// Merges a refreshed playlist into the partition. Entries that fell more
    /// than one window behind the new media sequence are dropped.
    pub async fn update(&self, namespace: CatalogNamespace, playlist: &MediaPlaylist) {
        let fresh = entries_for(&namespace, playlist);
        let floor = playlist
            .media_sequence
            .saturating_sub(playlist.segments.len() as u64);

        let mut state = self.state.write().await;
        let partition = state.entry(namespace).or_default();
        partition.extend(fresh);
        partition.retain(|_, entry| entry.sequence() >= floor);
    }

    pub async fn lookup(&self, key: &str) -> Option<(CatalogNamespace, CatalogEntry)> {
        let state = self.state.read().await;
        state.iter().find_map(|(namespace, entries)| {
            entries
                .get(key)
                .map(|entry| (namespace.clone(), entry.clone()))
        })
    }

    pub async fn remove(&self, namespace: &CatalogNamespace) {
        self.state.write().await.remove(namespace);
    }

    pub async fn clear(&self) {
        self.state.write().await.clear();
    }

    pub async fn len(&self, namespace: &CatalogNamespace) -> usize {
        self.state
            .read()
            .await
            .get(namespace)
            .map_or(0, HashMap::len)
    }
}

fn entries_for(namespace: &CatalogNamespace, playlist: &MediaPlaylist) -> HashMap<String, CatalogEntry> {
    let prefix = namespace.key_prefix();
    let mut entries = HashMap::new();

    let add_part = |entries: &mut HashMap<String, CatalogEntry>, part: &HlsPartialSegment| {
        entries.insert(
            identity::key_for_part(part.parent_sequence, part.part_index, prefix),
            CatalogEntry::Part(part.clone()),
        );
    };

    for segment in &playlist.segments {
        for part in &segment.parts {
            add_part(&mut entries, part);
        }
        entries.insert(
            identity::key_for_sequence(segment.sequence, prefix),
            CatalogEntry::Segment(segment.clone()),
        );
    }
    for part in &playlist.trailing_parts {
        add_part(&mut entries, part);
    }

    // 预加载提示的部分分片, 提前登记以便播放器直接请求
    for hint in playlist
        .preload_hints
        .iter()
        .filter(|hint| hint.kind == PreloadHintType::Part)
    {
        let key = identity::key_for_part(hint.sequence, hint.part_index, prefix);
        if entries.contains_key(&key) {
            continue;
        }
        let byte_range = hint.byte_range_length.map(|length| crate::hls::ByteRange {
            length,
            offset: hint.byte_range_start.unwrap_or(0),
        });
        entries.insert(
            key,
            CatalogEntry::Part(HlsPartialSegment {
                parent_sequence: hint.sequence,
                part_index: hint.part_index,
                duration: playlist.part_target_duration.unwrap_or(0.0),
                url: hint.uri.clone(),
                byte_range,
                independent: false,
                gap: false,
                encryption: None,
                map: None,
            }),
        );
    }

    entries
}
