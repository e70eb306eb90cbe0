use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{LowLatencyPolicy, ProxyConfig};
use crate::error::RefreshError;
use crate::hls::parser::parse;
use crate::hls::types::MediaPlaylist;
use crate::network::ManifestFetcher;
use crate::utils::{secs, with_query_params};

/// PART-HOLD-BACK 节奏下的最短轮询间隔
const MIN_HOLD_BACK_DELAY: Duration = Duration::from_millis(50);

pub type PlaylistSubscriber = Arc<dyn Fn(MediaPlaylist) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshMetrics {
    pub last_refresh: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub remote_media_sequence: Option<u64>,
    pub blocking_reload_engaged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSettings {
    pub refresh_interval: Duration,
    pub max_backoff: Duration,
    pub low_latency: Option<LowLatencyPolicy>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(8),
            low_latency: None,
        }
    }
}

impl RefreshSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            refresh_interval: config.buffer.refresh_interval(),
            max_backoff: config.buffer.max_refresh_backoff(),
            low_latency: config.active_low_latency().cloned(),
        }
    }

    fn active_low_latency(&self) -> Option<&LowLatencyPolicy> {
        self.low_latency.as_ref().filter(|policy| policy.enabled)
    }
}

/// One planned origin request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RefreshRequest {
    pub url: String,
    pub timeout: Option<Duration>,
    pub blocking: bool,
}

/// 低延迟开启且上次响应允许阻塞时, 带上 `_HLS_msn`/`_HLS_part`/`_HLS_skip`
pub(crate) fn plan_request(
    source_url: &str,
    previous: Option<&MediaPlaylist>,
    settings: &RefreshSettings,
) -> RefreshRequest {
    let plain = RefreshRequest {
        url: source_url.to_string(),
        timeout: None,
        blocking: false,
    };

    let policy = match settings.active_low_latency() {
        Some(policy) => policy,
        None => return plain,
    };
    let previous = match previous.filter(|playlist| playlist.can_block_reload()) {
        Some(previous) => previous,
        None => return plain,
    };
    let (sequence, part_index) = match previous.newest_position() {
        Some(position) => position,
        None => return plain,
    };

    let mut params = vec![("_HLS_msn", sequence.to_string())];
    if let Some(part_index) = part_index {
        params.push(("_HLS_part", part_index.to_string()));
    }
    if policy.enable_delta_updates {
        params.push(("_HLS_skip", "YES".to_string()));
    }

    match with_query_params(source_url, &params) {
        Some(url) => RefreshRequest {
            url,
            timeout: Some(policy.blocking_request_timeout()),
            blocking: true,
        },
        None => plain,
    }
}

pub(crate) fn next_delay(playlist: &MediaPlaylist, was_blocking: bool, settings: &RefreshSettings) -> Duration {
    if settings.active_low_latency().is_some() {
        if was_blocking {
            return Duration::ZERO;
        }
        if let Some(hold_back) = playlist.part_hold_back().filter(|value| *value > 0.0) {
            return secs(hold_back / 2.0).max(MIN_HOLD_BACK_DELAY);
        }
    }
    settings.refresh_interval
}

pub(crate) fn backoff(current: Duration, settings: &RefreshSettings) -> Duration {
    (current * 2)
        .max(settings.refresh_interval)
        .min(settings.max_backoff.max(settings.refresh_interval))
}

struct RefreshState {
    settings: RefreshSettings,
    source_url: Option<String>,
    previous: Option<MediaPlaylist>,
    metrics: RefreshMetrics,
    subscriber: Option<PlaylistSubscriber>,
    generation: u64,
    cancel: CancellationToken,
    running: bool,
}

/// 直播播放列表轮询
#[derive(Clone)]
pub struct PlaylistRefreshController {
    fetcher: ManifestFetcher,
    state: Arc<RwLock<RefreshState>>,
}

impl PlaylistRefreshController {
    pub fn new(fetcher: ManifestFetcher, settings: RefreshSettings) -> Self {
        Self {
            fetcher,
            state: Arc::new(RwLock::new(RefreshState {
                settings,
                source_url: None,
                previous: None,
                metrics: RefreshMetrics::default(),
                subscriber: None,
                generation: 0,
                cancel: CancellationToken::new(),
                running: false,
            })),
        }
    }

    pub async fn update_settings(&self, settings: RefreshSettings) {
        self.state.write().await.settings = settings;
    }

    pub async fn set_subscriber(&self, subscriber: Option<PlaylistSubscriber>) {
        self.state.write().await.subscriber = subscriber;
    }

    pub async fn metrics(&self) -> RefreshMetrics {
        self.state.read().await.metrics.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// Starts polling `url`, replacing any earlier loop. `seed` is the playlist
    /// the caller already holds; it enables blocking reload and delta merging
    /// from the first request on.
    pub async fn start(&self, url: &str, seed: Option<MediaPlaylist>) {
        let mut state = self.state.write().await;
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.generation += 1;
        state.source_url = Some(url.to_string());
        state.previous = seed;
        state.metrics.consecutive_failures = 0;
        state.metrics.last_error = None;
        state.running = true;

        info!("Starting playlist refresh for {}", url);
        let controller = self.clone();
        let generation = state.generation;
        let token = state.cancel.clone();
        tokio::spawn(async move { controller.run(generation, token).await });
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        state.cancel.cancel();
        state.generation += 1;
        state.source_url = None;
        state.previous = None;
        state.running = false;
    }

    async fn refresh_once(&self, url: &str, timeout: Option<Duration>) -> Result<MediaPlaylist, RefreshError> {
        let text = self.fetcher.fetch(url, timeout).await?;
        let manifest = parse(&text, url)?;
        manifest
            .media_playlist
            .ok_or(RefreshError::MediaPlaylistUnavailable)
    }

    async fn run(self, generation: u64, token: CancellationToken) {
        let mut delay = self.state.read().await.settings.refresh_interval;

        loop {
            let request = {
                let state = self.state.read().await;
                if state.generation != generation {
                    return;
                }
                match &state.source_url {
                    Some(url) => plan_request(url, state.previous.as_ref(), &state.settings),
                    None => return,
                }
            };
            debug!("Refreshing playlist {} (blocking: {})", request.url, request.blocking);

            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = self.refresh_once(&request.url, request.timeout) => result,
            };

            let mut ended = false;
            let delivery = {
                let mut state = self.state.write().await;
                if state.generation != generation {
                    return;
                }
                match result {
                    Ok(playlist) => {
                        let playlist = match &state.previous {
                            Some(previous) if playlist.skipped_segments.is_some() => playlist.merge_delta(previous),
                            _ => playlist,
                        };
                        let engaged = state.settings.active_low_latency().is_some() && playlist.can_block_reload();
                        state.metrics = RefreshMetrics {
                            last_refresh: Some(Utc::now()),
                            consecutive_failures: 0,
                            last_error: None,
                            remote_media_sequence: Some(playlist.media_sequence),
                            blocking_reload_engaged: engaged,
                        };
                        delay = next_delay(&playlist, request.blocking, &state.settings);
                        ended = playlist.is_endlist;
                        state.previous = Some(playlist.clone());
                        state.subscriber.clone().map(|subscriber| (subscriber, playlist))
                    }
                    Err(e) => {
                        warn!("Playlist refresh failed: {}", e);
                        state.metrics.consecutive_failures += 1;
                        state.metrics.last_error = Some(e.to_string());
                        delay = backoff(delay, &state.settings);
                        None
                    }
                }
            };

            if let Some((subscriber, playlist)) = delivery {
                subscriber(playlist).await;
            }

            if ended {
                info!("Playlist reached end of stream, refresh loop finished");
                let mut state = self.state.write().await;
                if state.generation == generation {
                    state.running = false;
                }
                return;
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
