use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

mod disk;

/// 内存 LRU + 可选磁盘的分片缓存, 键为代理分片键
#[derive(Debug, Clone)]
pub struct HlsSegmentCache {
    state: Arc<RwLock<CacheState>>,
}

#[derive(Debug)]
struct CacheState {
    /// capacity 0 disables the memory tier
    memory_enabled: bool,
    memory: LruCache<String, Bytes>,
    disk_directory: Option<PathBuf>,
    hits: u64,
    misses: u64,
}

fn memory_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl CacheState {
    fn insert(&mut self, key: &str, data: Bytes) {
        if !self.memory_enabled {
            return;
        }
        if let Some((evicted, _)) = self.memory.push(key.to_string(), data) {
            if evicted != key {
                debug!("Evicted {} from memory cache", evicted);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub entries: usize,
}

impl HlsSegmentCache {
    pub fn new(capacity: usize, disk_directory: Option<PathBuf>) -> Self {
        info!(
            "Initializing segment cache (capacity: {}, disk: {:?})",
            capacity, disk_directory
        );
        if let Some(directory) = &disk_directory {
            disk::ensure_directory(directory);
        }

        Self {
            state: Arc::new(RwLock::new(CacheState {
                memory_enabled: capacity > 0,
                memory: LruCache::new(memory_capacity(capacity)),
                disk_directory,
                hits: 0,
                misses: 0,
            })),
        }
    }

    /// Applies a new capacity and disk directory, evicting right away.
    pub async fn update_configuration(&self, capacity: usize, disk_directory: Option<PathBuf>) {
        let mut state = self.state.write().await;
        if let Some(directory) = &disk_directory {
            disk::ensure_directory(directory);
        }
        state.memory_enabled = capacity > 0;
        state.memory.resize(memory_capacity(capacity));
        if !state.memory_enabled {
            state.memory.clear();
        }
        state.disk_directory = disk_directory;
        debug!("Segment cache reconfigured, capacity: {}", capacity);
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let mut state = self.state.write().await;

        if let Some(data) = state.memory.get(key).cloned() {
            state.hits += 1;
            return Some(data);
        }

        if let Some(directory) = state.disk_directory.clone() {
            if let Some(data) = disk::read(&directory, key).await {
                debug!("Disk cache hit for {}", key);
                state.hits += 1;
                state.insert(key, data.clone());
                return Some(data);
            }
        }

        state.misses += 1;
        None
    }

    pub async fn put(&self, data: Bytes, key: &str) {
        let mut state = self.state.write().await;
        state.insert(key, data.clone());

        if let Some(directory) = state.disk_directory.clone() {
            disk::write(&directory, key, &data).await;
        }
    }

    pub async fn contains_in_memory(&self, key: &str) -> bool {
        self.state.read().await.memory.contains(key)
    }

    pub async fn metrics(&self) -> CacheMetrics {
        let state = self.state.read().await;
        let disk_bytes = match &state.disk_directory {
            Some(directory) => disk::directory_size(directory).await,
            None => 0,
        };
        CacheMetrics {
            hits: state.hits,
            misses: state.misses,
            memory_bytes: state.memory.iter().map(|(_, data)| data.len() as u64).sum(),
            disk_bytes,
            entries: state.memory.len(),
        }
    }

    pub async fn disk_directory(&self) -> Option<PathBuf> {
        self.state.read().await.disk_directory.clone()
    }

    /// Keys persisted in the disk tier.
    pub async fn disk_keys(&self) -> Vec<String> {
        let directory = match self.disk_directory().await {
            Some(directory) => directory,
            None => return Vec::new(),
        };
        list_disk_keys(&directory).await
    }
}

async fn list_disk_keys(directory: &Path) -> Vec<String> {
    let mut keys = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(directory).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(disk::key_from_file_name)
            {
                keys.push(key);
            }
        }
    }
    keys.sort();
    keys
}
