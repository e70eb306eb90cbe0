use bytes::Bytes;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::abr::{AdaptiveVariantController, DecisionAction, ThroughputEstimator};
use crate::cache::HlsSegmentCache;
use crate::config::{DrmPolicy, ProxyConfig};
use crate::diagnostics::{Diagnostics, KeyStatus};
use crate::error::{ProxyError, RefreshError, Result};
use crate::hls::{
    rewrite, rewrite_master, BufferState, HlsKey, HlsManifest, MasterLayout, MediaPlaylist, PlaylistRefreshController,
    QualityPolicy, RefreshSettings, Rendition, RewriteConfig, VariantPlaylist,
};
use crate::network::{HttpClient, ManifestFetcher};
use crate::proxy::store::{rendition_playlist, MASTER_PLAYLIST, PRIMARY_PLAYLIST};
use crate::proxy::{
    AssetHandler, AuxiliaryAssetStore, AuxiliaryAssetType, MetricsHandler, PlaylistHandler, PlaylistSelector,
    PlaylistStore, ProxyRouter, ProxyServer, SegmentHandler, StatusHandler,
};
use crate::segment::{
    CatalogNamespace, FetchMetrics, HlsSegmentFetcher, PrefetchTelemetry, SchedulerSettings, SegmentCatalog,
    SegmentPrefetchScheduler, DEFAULT_SEGMENT_TIMEOUT,
};
use crate::utils::{hash_url, is_absolute_url};

mod status;

pub use status::{PlayerState, PlayerStatus};
use status::StatusReporter;

/// 主变体播放列表在代理上的路径
pub const PRIMARY_VARIANT_PATH: &str = "variants/main.m3u8";

#[derive(Clone)]
struct RenditionTrack {
    rendition: Rendition,
    playlist: Option<MediaPlaylist>,
    refresh: Option<PlaylistRefreshController>,
}

impl RenditionTrack {
    fn id(&self) -> String {
        self.rendition.id()
    }

    /// Renditions with a URI are only advertised once their playlist loaded.
    fn is_advertised(&self) -> bool {
        self.rendition.uri.is_none() || self.playlist.is_some()
    }
}

/// 当前加载的状态, 每次 load 整体替换
#[derive(Default)]
struct LoadState {
    load_id: Option<Uuid>,
    /// 变体切换时递增, 用于丢弃旧刷新循环的回调
    epoch: u64,
    source_url: Option<String>,
    quality: QualityPolicy,
    variants: Vec<VariantPlaylist>,
    variant: Option<VariantPlaylist>,
    media_url: Option<String>,
    playlist: Option<MediaPlaylist>,
    renditions: Vec<RenditionTrack>,
    session_keys: Vec<HlsKey>,
    rewrite: Option<RewriteConfig>,
    key_statuses: Vec<KeyStatus>,
    proxied_keys: Vec<String>,
    playing: bool,
}

/// 代理会话: 持有所有子系统并串起加载、预取、刷新和码率切换
#[derive(Clone)]
pub struct ProxySession {
    config: Arc<RwLock<ProxyConfig>>,
    client: HttpClient,
    manifests: ManifestFetcher,
    fetcher: HlsSegmentFetcher,
    cache: HlsSegmentCache,
    catalog: SegmentCatalog,
    scheduler: SegmentPrefetchScheduler,
    refresh: PlaylistRefreshController,
    estimator: ThroughputEstimator,
    abr: AdaptiveVariantController,
    playlists: PlaylistStore,
    assets: AuxiliaryAssetStore,
    server: ProxyServer,
    diagnostics: Diagnostics,
    status: Arc<RwLock<PlayerState>>,
    load: Arc<RwLock<LoadState>>,
    rewrite_lock: Arc<Mutex<()>>,
    switch_lock: Arc<Mutex<()>>,
}

impl ProxySession {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::with_diagnostics(config, Diagnostics::default())
    }

    pub fn with_diagnostics(config: ProxyConfig, diagnostics: Diagnostics) -> Result<Self> {
        let client = HttpClient::new()?;
        let manifests = ManifestFetcher::new(
            client.clone(),
            config.manifest_retry.clone(),
            config.allow_insecure_manifests,
        );
        let fetcher = HlsSegmentFetcher::new(client.clone(), config.segment_validation.clone());
        let cache = HlsSegmentCache::new(
            config.cache.memory_capacity,
            config.cache.effective_disk_directory(),
        );
        let catalog = SegmentCatalog::new();
        let scheduler = SegmentPrefetchScheduler::new(SchedulerSettings::from_config(&config));
        let refresh = PlaylistRefreshController::new(manifests.clone(), RefreshSettings::from_config(&config));
        let estimator = ThroughputEstimator::new(config.abr.estimator_window);
        let abr = AdaptiveVariantController::new(config.abr.clone());
        let playlists = PlaylistStore::new();
        let assets = AuxiliaryAssetStore::new();
        let status = Arc::new(RwLock::new(PlayerState::default()));
        let load = Arc::new(RwLock::new(LoadState::default()));
        let config_slot = Arc::new(RwLock::new(config.clone()));

        let reporter = StatusReporter {
            config: config_slot.clone(),
            cache: cache.clone(),
            scheduler: scheduler.clone(),
            refresh: refresh.clone(),
            estimator: estimator.clone(),
            abr: abr.clone(),
            status: status.clone(),
            load: load.clone(),
        };

        let mut router = ProxyRouter::new();
        router.register(
            "/playlist.m3u8",
            Arc::new(PlaylistHandler::new(
                playlists.clone(),
                PlaylistSelector::Fixed(MASTER_PLAYLIST.to_string()),
                diagnostics.clone(),
            )),
        );
        router.register(
            &format!("/{}", PRIMARY_VARIANT_PATH),
            Arc::new(PlaylistHandler::new(
                playlists.clone(),
                PlaylistSelector::Fixed(PRIMARY_PLAYLIST.to_string()),
                diagnostics.clone(),
            )),
        );
        router.register(
            "/renditions/*",
            Arc::new(PlaylistHandler::new(
                playlists.clone(),
                PlaylistSelector::Rendition,
                diagnostics.clone(),
            )),
        );
        router.register(
            "/segments/*",
            Arc::new(SegmentHandler::new(
                cache.clone(),
                catalog.clone(),
                Arc::new(fetcher.clone()),
                scheduler.clone(),
                diagnostics.clone(),
            )),
        );
        router.register("/assets/*", Arc::new(AssetHandler::new(assets.clone())));
        router.register("/debug/status", Arc::new(StatusHandler::new(Arc::new(reporter))));
        router.register("/metrics", Arc::new(MetricsHandler::new(cache.clone(), scheduler.clone())));

        let server = ProxyServer::new(config.server.clone(), router);

        Ok(Self {
            config: config_slot,
            client,
            manifests,
            fetcher,
            cache,
            catalog,
            scheduler,
            refresh,
            estimator,
            abr,
            playlists,
            assets,
            server,
            diagnostics,
            status,
            load,
            rewrite_lock: Arc::new(Mutex::new(())),
            switch_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Loads `url` (master or media manifest) and starts buffering it.
    /// `Automatic` defers to the configured quality policy.
    pub async fn load(&self, url: &str, quality: QualityPolicy) -> Result<()> {
        let quality = match quality {
            QualityPolicy::Automatic => self.config.read().await.quality.clone(),
            locked => locked,
        };
        *self.status.write().await = PlayerState::buffering(describe_quality(&quality));

        if let Err(e) = self.perform_load(url, quality).await {
            error!("Failed to load {}: {}", url, e);
            self.status.write().await.status = PlayerStatus::Failed(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    pub async fn play(&self) {
        self.load.write().await.playing = true;
        info!("Playback started");
    }

    pub async fn pause(&self) {
        self.load.write().await.playing = false;
        info!("Playback paused");
    }

    /// Cancels every background loop, detaches subscribers and stops the server.
    pub async fn stop(&self) {
        self.detach_subscribers().await;
        self.halt_loops().await;
        self.release_proxied_keys().await;
        self.catalog.clear().await;
        self.playlists.reset().await;
        self.server.stop().await;

        {
            let mut load = self.load.write().await;
            let epoch = load.epoch;
            *load = LoadState {
                epoch,
                ..Default::default()
            };
        }
        let mut status = self.status.write().await;
        status.status = PlayerStatus::Idle;
        status.buffer_depth_secs = 0.0;
        info!("Proxy session stopped");
    }

    pub async fn playlist_url(&self) -> Option<String> {
        let load = self.load.read().await;
        let rewrite = load.rewrite.as_ref()?;
        Some(format!("{}/playlist.m3u8", rewrite.proxy_base_url))
    }

    pub async fn base_url(&self) -> Option<String> {
        self.server.base_url().await
    }

    pub async fn state(&self) -> PlayerState {
        self.status.read().await.clone()
    }

    pub async fn register_auxiliary_asset(&self, data: Bytes, identifier: &str, kind: AuxiliaryAssetType) {
        self.assets.register(data, identifier, kind).await;
    }

    /// Re-applies every hot-swappable setting. Server bind settings take
    /// effect on the next start.
    pub async fn update_configuration(&self, config: ProxyConfig) {
        info!("Applying new proxy configuration");
        self.cache
            .update_configuration(config.cache.memory_capacity, config.cache.effective_disk_directory())
            .await;
        self.manifests
            .update_policy(config.manifest_retry.clone(), config.allow_insecure_manifests)
            .await;
        self.fetcher
            .update_validation_policy(config.segment_validation.clone())
            .await;
        self.scheduler
            .update_settings(SchedulerSettings::from_config(&config))
            .await;
        self.scheduler
            .enqueue_upcoming_playlists(config.upcoming_playlists.clone())
            .await;
        self.estimator.set_window(config.abr.estimator_window).await;
        self.abr.update_policy(config.abr.clone()).await;

        let refresh_settings = RefreshSettings::from_config(&config);
        self.refresh.update_settings(refresh_settings.clone()).await;
        let (loaded, rendition_refreshers) = {
            let mut load = self.load.write().await;
            if let Some(rewrite) = load.rewrite.as_mut() {
                apply_rewrite_settings(rewrite, &config);
            }
            let refreshers: Vec<PlaylistRefreshController> =
                load.renditions.iter().filter_map(|track| track.refresh.clone()).collect();
            (load.rewrite.is_some(), refreshers)
        };
        for refresh in rendition_refreshers {
            refresh.update_settings(refresh_settings.clone()).await;
        }
        *self.config.write().await = config;

        if loaded {
            self.publish_master().await;
            self.publish_renditions().await;
            let buffer = self.scheduler.buffer_state().await;
            self.update_playback_state(buffer).await;
        }
    }

    async fn perform_load(&self, url: &str, quality: QualityPolicy) -> Result<()> {
        self.server.start().await?;
        let base_url = self.server.wait_for_base_url().await?;

        let load_id = Uuid::new_v4();
        info!("Loading {} (load {})", url, load_id);

        self.halt_loops().await;
        self.release_proxied_keys().await;
        self.estimator.reset().await;
        self.abr.reset().await;
        self.catalog.clear().await;
        self.playlists.reset().await;
        let epoch = {
            let mut load = self.load.write().await;
            let epoch = load.epoch + 1;
            let playing = load.playing;
            *load = LoadState {
                load_id: Some(load_id),
                epoch,
                source_url: Some(url.to_string()),
                quality: quality.clone(),
                playing,
                ..Default::default()
            };
            epoch
        };

        let manifest = self.manifests.fetch_manifest(url).await?;
        let (variant, media_url, playlist) = match manifest.media_playlist.clone() {
            Some(playlist) => (None, url.to_string(), playlist),
            None => {
                let variant = select_variant(&manifest.variants, &quality)
                    .cloned()
                    .ok_or(ProxyError::NoPlayableVariant)?;
                let playlist = self.fetch_media_playlist(&variant.url).await?;
                let media_url = variant.url.clone();
                (Some(variant), media_url, playlist)
            }
        };
        match &variant {
            Some(variant) => info!("Selected variant {}", variant.describe()),
            None => debug!("Manifest is a media playlist, no variant selection"),
        }
        self.abr
            .configure(manifest.variants.clone(), variant.clone(), quality.clone())
            .await;

        let config = self.config.read().await.clone();
        let renditions = self.load_renditions(&manifest.renditions).await;

        let keys = collect_keys(&manifest, &playlist, &renditions);
        let key_statuses: Vec<KeyStatus> = keys.iter().filter_map(KeyStatus::from_key).collect();
        let mut rewrite_config = RewriteConfig::new(base_url.as_str());
        apply_rewrite_settings(&mut rewrite_config, &config);
        let proxied_keys = match config.drm {
            DrmPolicy::Proxy => self.proxy_keys(&keys, &mut rewrite_config).await,
            DrmPolicy::Passthrough => Vec::new(),
        };

        self.catalog.replace(CatalogNamespace::Primary, &playlist).await;
        for track in &renditions {
            if let Some(rendition_playlist) = &track.playlist {
                self.catalog
                    .replace(CatalogNamespace::Rendition(track.id()), rendition_playlist)
                    .await;
            }
        }

        {
            let mut load = self.load.write().await;
            if load.load_id != Some(load_id) {
                info!("Load {} superseded before it finished", load_id);
                return Ok(());
            }
            load.variants = manifest.variants.clone();
            load.variant = variant.clone();
            load.media_url = Some(media_url.clone());
            load.playlist = Some(playlist.clone());
            load.renditions = renditions;
            load.session_keys = manifest.session_keys.clone();
            load.rewrite = Some(rewrite_config);
            load.key_statuses = key_statuses.clone();
            load.proxied_keys = proxied_keys;
        }

        self.attach_subscribers().await;
        self.scheduler
            .enqueue_upcoming_playlists(config.upcoming_playlists.clone())
            .await;
        self.scheduler
            .start(playlist.clone(), Arc::new(self.fetcher.clone()), self.cache.clone())
            .await;
        self.start_refresh(epoch, &media_url, &playlist).await;
        self.start_rendition_refresh(load_id, &config).await;

        if let Some(variant) = &variant {
            self.diagnostics.quality_changed(variant);
        }
        {
            let load = self.load.read().await;
            for track in load.renditions.iter().filter(|t| t.rendition.is_default && t.is_advertised()) {
                self.diagnostics
                    .rendition_changed(track.rendition.kind, Some(&track.rendition));
            }
        }
        if !key_statuses.is_empty() {
            self.diagnostics.key_metadata_changed(&key_statuses);
        }

        self.publish_master().await;
        self.publish_renditions().await;
        let buffer = self.scheduler.buffer_state().await;
        self.update_playback_state(buffer).await;
        info!("Proxy playlist ready at {}/playlist.m3u8", base_url);
        Ok(())
    }

    async fn fetch_media_playlist(&self, url: &str) -> Result<MediaPlaylist> {
        self.manifests
            .fetch_manifest(url)
            .await?
            .media_playlist
            .ok_or(ProxyError::Refresh(RefreshError::MediaPlaylistUnavailable))
    }

    /// Rendition playlists that fail to load are skipped, not fatal.
    async fn load_renditions(&self, renditions: &[Rendition]) -> Vec<RenditionTrack> {
        let mut tracks = Vec::with_capacity(renditions.len());
        for rendition in renditions {
            let playlist = match &rendition.uri {
                Some(uri) => match self.fetch_media_playlist(uri).await {
                    Ok(playlist) => Some(playlist),
                    Err(e) => {
                        warn!("Skipping rendition {}: {}", rendition.id(), e);
                        None
                    }
                },
                None => None,
            };
            tracks.push(RenditionTrack {
                rendition: rendition.clone(),
                playlist,
                refresh: None,
            });
        }
        tracks
    }

    /// 把密钥拉到本地并改写 URI, 失败的密钥保持原样
    async fn proxy_keys(&self, keys: &[HlsKey], rewrite_config: &mut RewriteConfig) -> Vec<String> {
        let mut proxied = Vec::new();
        for uri in keys.iter().filter_map(|key| key.uri.as_deref()) {
            if rewrite_config.key_overrides.contains_key(uri) || !is_absolute_url(uri) {
                continue;
            }
            let identifier = hash_url(uri);
            match self.client.get(uri, None, DEFAULT_SEGMENT_TIMEOUT).await {
                Ok(response) if response.is_success() && !response.body.is_empty() => {
                    self.assets
                        .register(response.body, &identifier, AuxiliaryAssetType::Keys)
                        .await;
                    rewrite_config.key_overrides.insert(
                        uri.to_string(),
                        format!(
                            "{}/assets/{}/{}",
                            rewrite_config.proxy_base_url,
                            AuxiliaryAssetType::Keys.as_str(),
                            identifier
                        ),
                    );
                    debug!("Proxying key {}", identifier);
                    proxied.push(identifier);
                }
                Ok(response) => warn!("Key {} returned status {}", identifier, response.status),
                Err(e) => warn!("Key {} could not be fetched: {}", identifier, e),
            }
        }
        proxied
    }

    async fn release_proxied_keys(&self) {
        let proxied = std::mem::take(&mut self.load.write().await.proxied_keys);
        for identifier in proxied {
            self.assets.remove(&identifier, AuxiliaryAssetType::Keys).await;
        }
    }

    /// Picks up keys that appeared after a refresh (key rotation).
    async fn sync_keys(&self, playlist: &MediaPlaylist) {
        let keys = playlist_keys(playlist);
        let drm = self.config.read().await.drm;

        let (fresh, mut rewrite_config) = {
            let load = self.load.read().await;
            let known: HashSet<&str> = load.key_statuses.iter().map(|s| s.uri_hash.as_str()).collect();
            let fresh: Vec<HlsKey> = keys
                .into_iter()
                .filter(|key| key.uri.as_deref().map_or(false, |uri| !known.contains(hash_url(uri).as_str())))
                .collect();
            match &load.rewrite {
                Some(rewrite_config) if !fresh.is_empty() => (fresh, rewrite_config.clone()),
                _ => return,
            }
        };

        let proxied = match drm {
            DrmPolicy::Proxy => self.proxy_keys(&fresh, &mut rewrite_config).await,
            DrmPolicy::Passthrough => Vec::new(),
        };
        let statuses = {
            let mut load = self.load.write().await;
            load.key_statuses
                .extend(fresh.iter().filter_map(KeyStatus::from_key));
            load.proxied_keys.extend(proxied);
            if let Some(current) = load.rewrite.as_mut() {
                current.key_overrides = rewrite_config.key_overrides;
            }
            load.key_statuses.clone()
        };
        info!("{} new key(s) after refresh", fresh.len());
        self.diagnostics.key_metadata_changed(&statuses);
    }

    async fn attach_subscribers(&self) {
        let session = self.clone();
        self.scheduler
            .set_buffer_subscriber(Some(Arc::new(move |state: BufferState| {
                let session = session.clone();
                async move { session.on_buffer_state(state).await }.boxed()
            })))
            .await;

        let session = self.clone();
        self.scheduler
            .set_telemetry_subscriber(Some(Arc::new(move |telemetry: PrefetchTelemetry| {
                let session = session.clone();
                async move { session.on_telemetry(telemetry).await }.boxed()
            })))
            .await;

        let session = self.clone();
        self.fetcher
            .set_metrics_subscriber(Some(Arc::new(move |metrics: FetchMetrics| {
                let session = session.clone();
                tokio::spawn(async move { session.on_fetch_metrics(metrics).await });
            })))
            .await;
    }

    async fn detach_subscribers(&self) {
        self.scheduler.set_buffer_subscriber(None).await;
        self.scheduler.set_telemetry_subscriber(None).await;
        self.fetcher.set_metrics_subscriber(None).await;
        self.refresh.set_subscriber(None).await;
    }

    async fn halt_loops(&self) {
        self.refresh.stop().await;
        let tracks = std::mem::take(&mut self.load.write().await.renditions);
        for track in tracks {
            if let Some(refresh) = track.refresh {
                refresh.stop().await;
            }
        }
        self.scheduler.stop().await;
    }

    async fn start_refresh(&self, epoch: u64, url: &str, playlist: &MediaPlaylist) {
        if playlist.is_endlist {
            debug!("{} is complete, no refresh loop", url);
            self.refresh.stop().await;
            return;
        }
        let session = self.clone();
        self.refresh
            .set_subscriber(Some(Arc::new(move |playlist: MediaPlaylist| {
                let session = session.clone();
                async move { session.on_primary_refreshed(epoch, playlist).await }.boxed()
            })))
            .await;
        self.refresh.start(url, Some(playlist.clone())).await;
    }

    async fn start_rendition_refresh(&self, load_id: Uuid, config: &ProxyConfig) {
        let live: Vec<(String, String, MediaPlaylist)> = self
            .load
            .read()
            .await
            .renditions
            .iter()
            .filter_map(|track| match (&track.rendition.uri, &track.playlist) {
                (Some(uri), Some(playlist)) if !playlist.is_endlist => {
                    Some((track.id(), uri.clone(), playlist.clone()))
                }
                _ => None,
            })
            .collect();

        for (id, uri, playlist) in live {
            let refresh = PlaylistRefreshController::new(self.manifests.clone(), RefreshSettings::from_config(config));
            let session = self.clone();
            let rendition_id = id.clone();
            refresh
                .set_subscriber(Some(Arc::new(move |playlist: MediaPlaylist| {
                    let session = session.clone();
                    let id = rendition_id.clone();
                    async move { session.on_rendition_refreshed(load_id, id, playlist).await }.boxed()
                })))
                .await;

            let mut load = self.load.write().await;
            if load.load_id != Some(load_id) {
                return;
            }
            if let Some(track) = load.renditions.iter_mut().find(|track| track.id() == id) {
                track.refresh = Some(refresh.clone());
            }
            drop(load);
            refresh.start(&uri, Some(playlist)).await;
        }
    }

    async fn on_primary_refreshed(&self, epoch: u64, playlist: MediaPlaylist) {
        {
            let mut load = self.load.write().await;
            if load.epoch != epoch {
                return;
            }
            load.playlist = Some(playlist.clone());
        }
        debug!(
            "Primary playlist refreshed (media sequence {}, {} segments)",
            playlist.media_sequence,
            playlist.segments.len()
        );
        self.catalog.update(CatalogNamespace::Primary, &playlist).await;
        self.sync_keys(&playlist).await;
        self.scheduler.update_playlist(playlist).await;

        let metrics = self.refresh.metrics().await;
        self.diagnostics.playlist_refreshed(&metrics);

        let buffer = self.scheduler.buffer_state().await;
        self.update_playback_state(buffer).await;
    }

    async fn on_rendition_refreshed(&self, load_id: Uuid, id: String, playlist: MediaPlaylist) {
        {
            let mut load = self.load.write().await;
            if load.load_id != Some(load_id) {
                return;
            }
            match load.renditions.iter_mut().find(|track| track.id() == id) {
                Some(track) => track.playlist = Some(playlist.clone()),
                None => return,
            }
        }
        self.catalog
            .update(CatalogNamespace::Rendition(id.clone()), &playlist)
            .await;
        self.publish_rendition(&id).await;
    }

    async fn on_buffer_state(&self, buffer: BufferState) {
        self.update_playback_state(buffer).await;
        self.evaluate_abr().await;
    }

    async fn on_telemetry(&self, telemetry: PrefetchTelemetry) {
        info!(
            "Prefetch run: scheduled={:?} ready={} failures={}",
            telemetry.scheduled_sequences, telemetry.ready_count, telemetry.failure_count
        );
        if telemetry.failure_count > 0 {
            self.abr.register_failure().await;
            self.evaluate_abr().await;
        } else {
            self.abr.reset_failures().await;
        }
    }

    async fn on_fetch_metrics(&self, metrics: FetchMetrics) {
        self.estimator
            .ingest(metrics.bytes, metrics.duration, metrics.timestamp)
            .await;
        self.evaluate_abr().await;
    }

    async fn evaluate_abr(&self) {
        if self.load.read().await.load_id.is_none() {
            return;
        }
        let sample = self.estimator.sample().await;
        let buffer = self.scheduler.buffer_state().await;
        let decision = self.abr.evaluate(sample, &buffer).await;
        debug!("ABR decision: {}", decision.reason);

        if let DecisionAction::SwitchVariant(target) = decision.action {
            let session = self.clone();
            tokio::spawn(async move { session.switch_variant(target).await });
        }
    }

    /// Replaces the primary playlist, prefetch loop and refresh loop with
    /// `target`'s.
    async fn switch_variant(&self, target: VariantPlaylist) {
        let _switching = self.switch_lock.lock().await;
        let (load_id, previous) = {
            let load = self.load.read().await;
            if load.media_url.as_deref() == Some(target.url.as_str()) {
                return;
            }
            (load.load_id, load.variant.clone())
        };
        if load_id.is_none() {
            return;
        }
        info!("Switching to variant {}", target.describe());

        let playlist = match self.fetch_media_playlist(&target.url).await {
            Ok(playlist) => playlist,
            Err(e) => {
                warn!("Variant switch to {} failed: {}", target.url, e);
                self.abr.revert_to(previous).await;
                self.abr.register_failure().await;
                return;
            }
        };

        let epoch = {
            let mut load = self.load.write().await;
            if load.load_id != load_id {
                return;
            }
            load.epoch += 1;
            load.variant = Some(target.clone());
            load.media_url = Some(target.url.clone());
            load.playlist = Some(playlist.clone());
            load.epoch
        };

        self.catalog.replace(CatalogNamespace::Primary, &playlist).await;
        self.scheduler
            .start(playlist.clone(), Arc::new(self.fetcher.clone()), self.cache.clone())
            .await;
        self.start_refresh(epoch, &target.url, &playlist).await;
        self.diagnostics.quality_changed(&target);

        self.publish_master().await;
        let buffer = self.scheduler.buffer_state().await;
        self.update_playback_state(buffer).await;
    }

    /// With hide-until-buffered the primary playlist stays unpublished until
    /// something is buffered.
    async fn update_playback_state(&self, buffer: BufferState) {
        if self.load.read().await.rewrite.is_none() {
            return;
        }
        let hide = self.config.read().await.buffer.hide_until_buffered;
        let depth = buffer.prefetch_depth_secs;

        if hide && depth <= 0.0 {
            let mut status = self.status.write().await;
            status.status = PlayerStatus::Buffering;
            status.buffer_depth_secs = depth;
            return;
        }

        self.publish_primary().await;
        let mut status = self.status.write().await;
        status.status = PlayerStatus::Ready;
        status.buffer_depth_secs = depth;
    }

    /// 重写串行执行, 总是读取最新的播放列表和缓冲状态
    async fn publish_primary(&self) {
        let _rewriting = self.rewrite_lock.lock().await;
        let (playlist, rewrite_config) = {
            let load = self.load.read().await;
            match (&load.playlist, &load.rewrite) {
                (Some(playlist), Some(rewrite_config)) => (playlist.clone(), rewrite_config.clone()),
                _ => return,
            }
        };
        let buffer = self.scheduler.buffer_state().await;
        let text = rewrite(&playlist, &rewrite_config, &buffer, None);
        self.playlists.update(PRIMARY_PLAYLIST, text).await;
    }

    async fn publish_master(&self) {
        let _rewriting = self.rewrite_lock.lock().await;
        let text = {
            let load = self.load.read().await;
            let rewrite_config = match &load.rewrite {
                Some(rewrite_config) => rewrite_config,
                None => return,
            };
            let renditions: Vec<Rendition> = load
                .renditions
                .iter()
                .filter(|track| track.is_advertised())
                .map(|track| track.rendition.clone())
                .collect();
            let layout = MasterLayout {
                variant: load.variant.as_ref(),
                variant_path: PRIMARY_VARIANT_PATH,
                renditions: &renditions,
                session_keys: &load.session_keys,
            };
            rewrite_master(&layout, rewrite_config)
        };
        self.playlists.update(MASTER_PLAYLIST, text).await;
    }

    async fn publish_renditions(&self) {
        let ids: Vec<String> = self
            .load
            .read()
            .await
            .renditions
            .iter()
            .filter(|track| track.playlist.is_some())
            .map(RenditionTrack::id)
            .collect();
        for id in ids {
            self.publish_rendition(&id).await;
        }
    }

    /// Renditions are not prefetched, so every listed segment is exposed.
    async fn publish_rendition(&self, id: &str) {
        let _rewriting = self.rewrite_lock.lock().await;
        let text = {
            let load = self.load.read().await;
            let rewrite_config = match &load.rewrite {
                Some(rewrite_config) => rewrite_config,
                None => return,
            };
            let playlist = match load
                .renditions
                .iter()
                .find(|track| track.id() == id)
                .and_then(|track| track.playlist.as_ref())
            {
                Some(playlist) => playlist,
                None => return,
            };
            rewrite(
                playlist,
                rewrite_config,
                &BufferState::fully_buffered(playlist),
                Some(id),
            )
        };
        debug!("Publishing rendition playlist {}", id);
        self.playlists.update(&rendition_playlist(id), text).await;
    }
}

fn describe_quality(quality: &QualityPolicy) -> String {
    match quality {
        QualityPolicy::Automatic => "auto".to_string(),
        QualityPolicy::Locked(profile) => profile.label.clone().unwrap_or_else(|| "locked".to_string()),
    }
}

/// automatic 选第一个变体; locked 选第一个匹配的, 没有则退回第一个
fn select_variant<'a>(variants: &'a [VariantPlaylist], quality: &QualityPolicy) -> Option<&'a VariantPlaylist> {
    match quality {
        QualityPolicy::Automatic => variants.first(),
        QualityPolicy::Locked(profile) => variants
            .iter()
            .find(|variant| profile.matches(variant))
            .or_else(|| variants.first()),
    }
}

fn apply_rewrite_settings(rewrite_config: &mut RewriteConfig, config: &ProxyConfig) {
    rewrite_config.hide_until_buffered = config.buffer.hide_until_buffered;
    rewrite_config.artificial_bandwidth = config.artificial_bandwidth;
    rewrite_config.history_window = config.buffer.history_window;
    rewrite_config.low_latency = config.low_latency.clone();
}

/// Every key with a URI, first occurrence wins.
fn playlist_keys(playlist: &MediaPlaylist) -> Vec<HlsKey> {
    let segment_keys = playlist.segments.iter().flat_map(|segment| {
        segment
            .encryption
            .iter()
            .chain(segment.parts.iter().filter_map(|part| part.encryption.as_ref()))
    });
    let trailing_keys = playlist
        .trailing_parts
        .iter()
        .filter_map(|part| part.encryption.as_ref());

    dedupe_keys(
        playlist
            .session_keys
            .iter()
            .chain(segment_keys)
            .chain(trailing_keys),
    )
}

fn collect_keys(manifest: &HlsManifest, playlist: &MediaPlaylist, renditions: &[RenditionTrack]) -> Vec<HlsKey> {
    let mut keys = manifest.session_keys.clone();
    keys.extend(playlist_keys(playlist));
    for playlist in renditions.iter().filter_map(|track| track.playlist.as_ref()) {
        keys.extend(playlist_keys(playlist));
    }
    dedupe_keys(keys.iter())
}

fn dedupe_keys<'a>(keys: impl Iterator<Item = &'a HlsKey>) -> Vec<HlsKey> {
    let mut seen = HashSet::new();
    keys.filter(|key| match &key.uri {
        Some(uri) => seen.insert(uri.clone()),
        None => false,
    })
    .cloned()
    .collect()
}
