use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProxyError, Result};
use crate::hls::types::{MediaPlaylist, QualityPolicy};
use crate::utils::secs;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub quality: QualityPolicy,
    pub buffer: BufferPolicy,
    pub cache: CachePolicy,
    pub abr: AbrPolicy,
    /// 未配置时关闭低延迟模式
    pub low_latency: Option<LowLatencyPolicy>,
    pub manifest_retry: RetryPolicy,
    pub segment_validation: ValidationPolicy,
    pub drm: DrmPolicy,
    pub allow_insecure_manifests: bool,
    /// 写入 EXT-X-SESSION-DATA 的带宽提示
    pub artificial_bandwidth: Option<u64>,
    /// 跨播放列表预取的后续播放列表, 只能通过代码设置
    #[serde(skip)]
    pub upcoming_playlists: Vec<MediaPlaylist>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            quality: QualityPolicy::Automatic,
            buffer: BufferPolicy::default(),
            cache: CachePolicy::default(),
            abr: AbrPolicy::default(),
            low_latency: None,
            manifest_retry: RetryPolicy::default(),
            segment_validation: ValidationPolicy::default(),
            drm: DrmPolicy::Passthrough,
            allow_insecure_manifests: false,
            artificial_bandwidth: None,
            upcoming_playlists: Vec::new(),
        }
    }
}

impl ProxyConfig {
    pub fn load() -> Result<Self> {
        // 首先尝试从环境变量加载
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            return Self::from_file(&config_path);
        }

        // 否则使用默认配置
        Ok(Self::default())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProxyError::Config(e.to_string()))
    }

    /// Low-latency policy only when it is switched on.
    pub fn active_low_latency(&self) -> Option<&LowLatencyPolicy> {
        self.low_latency.as_ref().filter(|policy| policy.enabled)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// 0 表示由系统分配临时端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferPolicy {
    pub target_buffer_secs: f64,
    pub max_prefetch_segments: usize,
    pub hide_until_buffered: bool,
    pub refresh_interval_secs: f64,
    pub max_refresh_backoff_secs: f64,
    /// 播放头之后仍保留可见的分片数
    pub history_window: u64,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            target_buffer_secs: 6.0,
            max_prefetch_segments: 6,
            hide_until_buffered: false,
            refresh_interval_secs: 2.0,
            max_refresh_backoff_secs: 8.0,
            history_window: 4,
        }
    }
}

impl BufferPolicy {
    pub fn refresh_interval(&self) -> Duration {
        secs(self.refresh_interval_secs)
    }

    /// Never shorter than the refresh interval.
    pub fn max_refresh_backoff(&self) -> Duration {
        secs(self.max_refresh_backoff_secs).max(self.refresh_interval())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CachePolicy {
    pub memory_capacity: usize,
    pub enable_disk_cache: bool,
    pub disk_directory: Option<PathBuf>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            memory_capacity: 32,
            enable_disk_cache: false,
            disk_directory: None,
        }
    }
}

impl CachePolicy {
    /// Disk tier directory, if disk caching is on. Falls back to a directory
    /// under the system temp dir.
    pub fn effective_disk_directory(&self) -> Option<PathBuf> {
        if !self.enable_disk_cache {
            return None;
        }
        Some(
            self.disk_directory
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("hls_cache_proxy")),
        )
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AbrPolicy {
    pub enabled: bool,
    pub estimator_window: usize,
    pub minimum_bitrate_ratio: f64,
    pub maximum_bitrate_ratio: f64,
    pub hysteresis_percent: f64,
    pub minimum_switch_interval_secs: f64,
    pub failure_downgrade_threshold: u32,
}

impl Default for AbrPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            estimator_window: 5,
            minimum_bitrate_ratio: 0.85,
            maximum_bitrate_ratio: 1.2,
            hysteresis_percent: 10.0,
            minimum_switch_interval_secs: 4.0,
            failure_downgrade_threshold: 2,
        }
    }
}

impl AbrPolicy {
    pub fn minimum_switch_interval(&self) -> Duration {
        secs(self.minimum_switch_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LowLatencyPolicy {
    pub enabled: bool,
    /// 预取目标: 就绪的部分分片数, 0 表示不限制
    pub target_part_count: usize,
    pub blocking_request_timeout_secs: f64,
    pub enable_delta_updates: bool,
    pub can_skip_until_secs: Option<f64>,
    pub part_hold_back_secs: Option<f64>,
    pub allow_blocking_reload: bool,
    pub prefetch_hint_count: usize,
}

impl Default for LowLatencyPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            target_part_count: 0,
            blocking_request_timeout_secs: 6.0,
            enable_delta_updates: false,
            can_skip_until_secs: None,
            part_hold_back_secs: None,
            allow_blocking_reload: false,
            prefetch_hint_count: 0,
        }
    }
}

impl LowLatencyPolicy {
    pub fn blocking_request_timeout(&self) -> Duration {
        secs(self.blocking_request_timeout_secs)
    }
}

/// 清单拉取重试策略
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay_secs: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn retry_delay(&self) -> Duration {
        secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Checksum {
    #[serde(default = "default_checksum_algorithm")]
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

fn default_checksum_algorithm() -> ChecksumAlgorithm {
    ChecksumAlgorithm::Sha256
}

/// 分片校验策略
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationPolicy {
    pub enforce_byte_range_length: bool,
    pub checksum: Option<Checksum>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            enforce_byte_range_length: true,
            checksum: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrmPolicy {
    /// 密钥 URI 原样交给播放器
    #[default]
    Passthrough,
    /// 密钥经本地代理转发
    Proxy,
}
