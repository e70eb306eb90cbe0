use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetcher::SegmentSource;
use crate::cache::HlsSegmentCache;
use crate::config::ProxyConfig;
use crate::error::SegmentFetchError;
use crate::hls::identity;
use crate::hls::{BufferState, HlsPartialSegment, HlsSegment, MediaPlaylist};

pub type BufferSubscriber = Arc<dyn Fn(BufferState) -> BoxFuture<'static, ()> + Send + Sync>;
pub type TelemetrySubscriber = Arc<dyn Fn(PrefetchTelemetry) -> BoxFuture<'static, ()> + Send + Sync>;

/// 预取预算
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub target_buffer_secs: f64,
    /// 0 表示不按分片数限制
    pub max_segments: usize,
    /// 0 表示不按部分分片数限制
    pub target_part_count: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            target_buffer_secs: 6.0,
            max_segments: 6,
            target_part_count: 0,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            target_buffer_secs: config.buffer.target_buffer_secs,
            max_segments: config.buffer.max_prefetch_segments,
            target_part_count: config
                .active_low_latency()
                .map_or(0, |policy| policy.target_part_count),
        }
    }
}

/// Summary of one prefetch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrefetchTelemetry {
    pub scheduled_sequences: Vec<u64>,
    pub ready_count: usize,
    pub failure_count: usize,
}

#[derive(Debug, Clone)]
enum PrefetchItem {
    Segment(HlsSegment),
    Part(HlsPartialSegment),
}

impl PrefetchItem {
    fn key(&self) -> String {
        match self {
            PrefetchItem::Segment(segment) => identity::key_for_sequence(segment.sequence, None),
            PrefetchItem::Part(part) => identity::key_for_part(part.parent_sequence, part.part_index, None),
        }
    }

    fn sequence(&self) -> u64 {
        match self {
            PrefetchItem::Segment(segment) => segment.sequence,
            PrefetchItem::Part(part) => part.parent_sequence,
        }
    }

    async fn fetch(&self, source: &dyn SegmentSource) -> Result<Bytes, SegmentFetchError> {
        match self {
            PrefetchItem::Segment(segment) => source.fetch_segment(segment).await,
            PrefetchItem::Part(part) => source.fetch_part(part).await,
        }
    }
}

fn items_for(playlist: &MediaPlaylist) -> Vec<PrefetchItem> {
    let mut items = Vec::new();
    for segment in &playlist.segments {
        items.extend(segment.parts.iter().cloned().map(PrefetchItem::Part));
        items.push(PrefetchItem::Segment(segment.clone()));
    }
    items.extend(playlist.trailing_parts.iter().cloned().map(PrefetchItem::Part));
    items
}

struct SchedulerState {
    settings: SchedulerSettings,
    playlist: Option<MediaPlaylist>,
    upcoming: Vec<MediaPlaylist>,
    items: Vec<PrefetchItem>,
    cursor: usize,
    fetched: HashSet<String>,
    ready_sequences: BTreeSet<u64>,
    segment_durations: HashMap<u64, f64>,
    ready_parts: BTreeMap<u64, BTreeSet<usize>>,
    part_durations: HashMap<(u64, usize), f64>,
    played_through: Option<u64>,
    source: Option<Arc<dyn SegmentSource>>,
    cache: Option<HlsSegmentCache>,
    generation: u64,
    cancel: CancellationToken,
    running: bool,
    dispatching: bool,
    receiver: Option<mpsc::UnboundedReceiver<BufferState>>,
    last_telemetry: Option<PrefetchTelemetry>,
}

impl SchedulerState {
    fn rebuild_items(&mut self) {
        let mut items = self.playlist.as_ref().map(items_for).unwrap_or_default();
        for playlist in &self.upcoming {
            items.extend(items_for(playlist));
        }
        self.items = items;
        self.cursor = 0;
    }

    fn reset_counters(&mut self) {
        self.cursor = 0;
        self.fetched.clear();
        self.ready_sequences.clear();
        self.segment_durations.clear();
        self.ready_parts.clear();
        self.part_durations.clear();
        self.played_through = None;
    }

    fn depths(&self) -> (f64, f64) {
        let segments: f64 = self
            .ready_sequences
            .iter()
            .filter_map(|sequence| self.segment_durations.get(sequence))
            .fold(0.0, |total, duration| total + duration);
        let parts: f64 = self
            .part_durations
            .iter()
            .filter(|((sequence, _), _)| !self.ready_sequences.contains(sequence))
            .fold(0.0, |total, (_, duration)| total + duration);
        (segments + parts, parts)
    }

    fn snapshot(&self) -> BufferState {
        let (depth, part_depth) = self.depths();
        // 只统计从 0 开始连续就绪的部分分片
        let ready_part_counts = self
            .ready_parts
            .iter()
            .map(|(sequence, indices)| {
                let contiguous = (0..).take_while(|index| indices.contains(index)).count();
                (*sequence, contiguous)
            })
            .filter(|(_, count)| *count > 0)
            .collect();

        BufferState {
            ready_sequences: self.ready_sequences.clone(),
            ready_part_counts,
            prefetch_depth_secs: depth,
            part_depth_secs: part_depth,
            played_through: self.played_through,
        }
    }

    fn ready_part_total(&self) -> usize {
        self.ready_parts.values().map(BTreeSet::len).sum()
    }

    fn should_prefetch_more(&self) -> bool {
        let settings = &self.settings;
        let (depth, _) = self.depths();
        depth < settings.target_buffer_secs
            || (settings.max_segments > 0 && self.ready_sequences.len() < settings.max_segments)
            || (settings.target_part_count > 0 && self.ready_part_total() < settings.target_part_count)
    }

    fn is_behind_playhead(&self, sequence: u64) -> bool {
        self.played_through.map_or(false, |played| sequence <= played)
    }

    /// Next item worth fetching, skipping anything already fetched, played, or
    /// covered by a ready parent segment.
    fn next_item(&mut self) -> Option<PrefetchItem> {
        while let Some(item) = self.items.get(self.cursor) {
            let skip = self.fetched.contains(&item.key())
                || self.is_behind_playhead(item.sequence())
                || matches!(item, PrefetchItem::Part(part) if self.ready_sequences.contains(&part.parent_sequence));
            if !skip {
                return Some(item.clone());
            }
            self.cursor += 1;
        }
        None
    }

    fn mark_segment_ready(&mut self, segment: &HlsSegment) {
        self.fetched
            .insert(identity::key_for_sequence(segment.sequence, None));
        if self.is_behind_playhead(segment.sequence) {
            return;
        }
        self.ready_sequences.insert(segment.sequence);
        self.segment_durations.insert(segment.sequence, segment.duration);
    }

    fn mark_part_ready(&mut self, part: &HlsPartialSegment) {
        self.fetched
            .insert(identity::key_for_part(part.parent_sequence, part.part_index, None));
        if self.is_behind_playhead(part.parent_sequence) {
            return;
        }
        self.ready_parts
            .entry(part.parent_sequence)
            .or_default()
            .insert(part.part_index);
        self.part_durations
            .insert((part.parent_sequence, part.part_index), part.duration);
    }

    fn mark_ready(&mut self, item: &PrefetchItem) {
        match item {
            PrefetchItem::Segment(segment) => self.mark_segment_ready(segment),
            PrefetchItem::Part(part) => self.mark_part_ready(part),
        }
    }
}

/// 分片预取调度器, 每次加载只有一个后台预取循环
#[derive(Clone)]
pub struct SegmentPrefetchScheduler {
    state: Arc<RwLock<SchedulerState>>,
    snapshots: mpsc::UnboundedSender<BufferState>,
    buffer_subscriber: Arc<RwLock<Option<BufferSubscriber>>>,
    telemetry_subscriber: Arc<RwLock<Option<TelemetrySubscriber>>>,
}

impl SegmentPrefetchScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(RwLock::new(SchedulerState {
                settings,
                playlist: None,
                upcoming: Vec::new(),
                items: Vec::new(),
                cursor: 0,
                fetched: HashSet::new(),
                ready_sequences: BTreeSet::new(),
                segment_durations: HashMap::new(),
                ready_parts: BTreeMap::new(),
                part_durations: HashMap::new(),
                played_through: None,
                source: None,
                cache: None,
                generation: 0,
                cancel: CancellationToken::new(),
                running: false,
                dispatching: false,
                receiver: Some(rx),
                last_telemetry: None,
            })),
            snapshots: tx,
            buffer_subscriber: Arc::new(RwLock::new(None)),
            telemetry_subscriber: Arc::new(RwLock::new(None)),
        }
    }

    /// Replaces the buffer-state subscriber. Snapshots are delivered one at a
    /// time, in mutation order, by a single dispatcher task.
    pub async fn set_buffer_subscriber(&self, subscriber: Option<BufferSubscriber>) {
        *self.buffer_subscriber.write().await = subscriber;

        let mut state = self.state.write().await;
        if let Some(mut receiver) = state.receiver.take() {
            let slot = self.buffer_subscriber.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = receiver.recv().await {
                    let subscriber = slot.read().await.clone();
                    if let Some(subscriber) = subscriber {
                        subscriber(snapshot).await;
                    }
                }
            });
            state.dispatching = true;
        }
    }

    pub async fn set_telemetry_subscriber(&self, subscriber: Option<TelemetrySubscriber>) {
        *self.telemetry_subscriber.write().await = subscriber;
    }

    pub async fn update_settings(&self, settings: SchedulerSettings) {
        let mut state = self.state.write().await;
        state.settings = settings;
        self.trigger(&mut state);
    }

    /// Resets all counters and launches a fresh prefetch loop for `playlist`.
    pub async fn start(
        &self,
        playlist: MediaPlaylist,
        source: Arc<dyn SegmentSource>,
        cache: HlsSegmentCache,
    ) {
        let mut state = self.state.write().await;
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.generation += 1;
        state.running = false;
        state.reset_counters();
        info!(
            "Starting prefetch for {} segments (media sequence {})",
            playlist.segments.len(),
            playlist.media_sequence
        );
        state.playlist = Some(playlist);
        state.rebuild_items();
        state.source = Some(source);
        state.cache = Some(cache);
        self.publish(&state);
        self.trigger(&mut state);
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        state.cancel.cancel();
        state.generation += 1;
        state.running = false;
        state.reset_counters();
        state.playlist = None;
        state.items.clear();
        state.source = None;
        state.cache = None;
        self.publish(&state);
        debug!("Prefetch scheduler stopped");
    }

    /// Swaps in a refreshed playlist without touching the ready counters.
    pub async fn update_playlist(&self, playlist: MediaPlaylist) {
        let mut state = self.state.write().await;
        state.playlist = Some(playlist);
        state.rebuild_items();
        self.trigger(&mut state);
    }

    pub async fn enqueue_upcoming_playlists(&self, playlists: Vec<MediaPlaylist>) {
        let mut state = self.state.write().await;
        state.upcoming = playlists;
        if state.playlist.is_some() {
            state.rebuild_items();
            self.trigger(&mut state);
        }
    }

    pub async fn buffer_state(&self) -> BufferState {
        self.state.read().await.snapshot()
    }

    pub async fn last_telemetry(&self) -> Option<PrefetchTelemetry> {
        self.state.read().await.last_telemetry.clone()
    }

    pub async fn register_ready_segment(&self, segment: &HlsSegment) {
        let mut state = self.state.write().await;
        state.mark_segment_ready(segment);
        self.publish(&state);
        self.trigger(&mut state);
    }

    pub async fn register_ready_part(&self, part: &HlsPartialSegment) {
        let mut state = self.state.write().await;
        state.mark_part_ready(part);
        self.publish(&state);
        self.trigger(&mut state);
    }

    /// The player has fetched `sequence`: drop it (and anything older) from the
    /// ready sets and move the playhead forward.
    pub async fn consume(&self, sequence: u64) {
        let mut state = self.state.write().await;

        let before = state.ready_sequences.len() + state.ready_parts.len();
        state.ready_sequences.retain(|s| *s > sequence);
        state.segment_durations.retain(|s, _| *s > sequence);
        state.ready_parts.retain(|s, _| *s > sequence);
        state.part_durations.retain(|(s, _), _| *s > sequence);
        let removed = before != state.ready_sequences.len() + state.ready_parts.len();

        let advanced = state.played_through.map_or(true, |played| sequence > played);
        if advanced {
            state.played_through = Some(sequence);
        }

        if removed || advanced {
            debug!(
                "Consumed {} (ready {}, playhead {:?})",
                sequence,
                state.ready_sequences.len(),
                state.played_through
            );
            self.publish(&state);
            self.trigger(&mut state);
        }
    }

    pub async fn consume_part(&self, sequence: u64, part_index: usize) {
        let mut state = self.state.write().await;
        let removed = match state.ready_parts.get_mut(&sequence) {
            Some(indices) => indices.remove(&part_index),
            None => false,
        };
        if !removed {
            return;
        }
        if state.ready_parts.get(&sequence).map_or(false, BTreeSet::is_empty) {
            state.ready_parts.remove(&sequence);
        }
        state.part_durations.remove(&(sequence, part_index));
        self.publish(&state);
        self.trigger(&mut state);
    }

    fn publish(&self, state: &SchedulerState) {
        if state.dispatching {
            let _ = self.snapshots.send(state.snapshot());
        }
    }

    /// Launches the loop unless one is running or there is nothing to do.
    fn trigger(&self, state: &mut SchedulerState) {
        if state.running || state.source.is_none() || state.cancel.is_cancelled() {
            return;
        }
        if !state.should_prefetch_more() || state.next_item().is_none() {
            return;
        }
        state.running = true;
        let scheduler = self.clone();
        let generation = state.generation;
        let token = state.cancel.clone();
        tokio::spawn(async move { scheduler.run(generation, token).await });
    }

    async fn run(self, generation: u64, token: CancellationToken) {
        let mut scheduled = Vec::new();
        let mut failures = 0;

        loop {
            let (item, source, cache) = {
                let mut state = self.state.write().await;
                if state.generation != generation || token.is_cancelled() {
                    return;
                }
                if !state.should_prefetch_more() {
                    break;
                }
                let item = match state.next_item() {
                    Some(item) => item,
                    None => break,
                };
                match (state.source.clone(), state.cache.clone()) {
                    (Some(source), Some(cache)) => (item, source, cache),
                    _ => break,
                }
            };

            let key = item.key();
            scheduled.push(item.sequence());

            if cache.get(&key).await.is_none() {
                let fetched = tokio::select! {
                    _ = token.cancelled() => return,
                    fetched = item.fetch(source.as_ref()) => fetched,
                };
                match fetched {
                    Ok(data) => cache.put(data, &key).await,
                    Err(e) => {
                        warn!("Prefetch failed for {}: {}", key, e);
                        failures += 1;
                        break;
                    }
                }
            }

            let mut state = self.state.write().await;
            if state.generation != generation {
                return;
            }
            state.mark_ready(&item);
            state.cursor += 1;
            self.publish(&state);
        }

        let telemetry = {
            let mut state = self.state.write().await;
            if state.generation != generation {
                return;
            }
            state.running = false;
            let telemetry = PrefetchTelemetry {
                scheduled_sequences: scheduled,
                ready_count: state.ready_sequences.len(),
                failure_count: failures,
            };
            state.last_telemetry = Some(telemetry.clone());
            telemetry
        };

        let subscriber = self.telemetry_subscriber.read().await.clone();
        if let Some(subscriber) = subscriber {
            subscriber(telemetry).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Checksum, ChecksumAlgorithm, ValidationPolicy};
    use crate::network::HttpClient;
    use crate::segment::fetcher::HlsSegmentFetcher;
    use crate::test_support::{OriginServer, Route};
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::test;

    #[derive(Default)]
    struct FakeSource {
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SegmentSource for FakeSource {
        async fn fetch_segment(&self, segment: &HlsSegment) -> Result<Bytes, SegmentFetchError> {
            self.calls.lock().unwrap().push(segment.url.clone());
            if self.failing.contains(&segment.url) {
                return Err(SegmentFetchError::HttpStatus(500));
            }
            Ok(Bytes::from(segment.url.clone()))
        }

        async fn fetch_part(&self, part: &HlsPartialSegment) -> Result<Bytes, SegmentFetchError> {
            self.calls.lock().unwrap().push(part.url.clone());
            Ok(Bytes::from(part.url.clone()))
        }
    }

    fn playlist(first: u64, count: u64) -> MediaPlaylist {
        MediaPlaylist {
            target_duration: 2.0,
            media_sequence: first,
            segments: (first..first + count)
                .map(|seq| HlsSegment::new(format!("https://cdn.test/{}.ts", seq), 2.0, seq))
                .collect(),
            ..Default::default()
        }
    }

    fn settings(target: f64, max_segments: usize) -> SchedulerSettings {
        SchedulerSettings {
            target_buffer_secs: target,
            max_segments,
            target_part_count: 0,
        }
    }

    async fn telemetry_channel(scheduler: &SegmentPrefetchScheduler) -> mpsc::UnboundedReceiver<PrefetchTelemetry> {
        let (tx, rx) = mpsc::unbounded_channel();
        scheduler
            .set_telemetry_subscriber(Some(Arc::new(move |telemetry: PrefetchTelemetry| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(telemetry);
                }
                .boxed()
            })))
            .await;
        rx
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[test]
    async fn test_prefetch_fills_budget() {
        let scheduler = SegmentPrefetchScheduler::new(settings(4.0, 2));
        let mut telemetry = telemetry_channel(&scheduler).await;
        let cache = HlsSegmentCache::new(16, None);
        let source = Arc::new(FakeSource::default());

        scheduler.start(playlist(1, 5), source.clone(), cache.clone()).await;
        let report = next(&mut telemetry).await;

        assert_eq!(report.scheduled_sequences, vec![1, 2]);
        assert_eq!(report.failure_count, 0);
        let state = scheduler.buffer_state().await;
        assert_eq!(state.ready_sequences.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(state.prefetch_depth_secs, 4.0);
        assert!(cache.contains_in_memory("segment-2").await);
        assert!(!cache.contains_in_memory("segment-3").await);
    }

    #[test]
    async fn test_consume_slides_window() {
        let scheduler = SegmentPrefetchScheduler::new(settings(4.0, 2));
        let mut telemetry = telemetry_channel(&scheduler).await;
        let cache = HlsSegmentCache::new(16, None);
        scheduler
            .start(playlist(1, 5), Arc::new(FakeSource::default()), cache)
            .await;
        next(&mut telemetry).await;

        scheduler.consume(1).await;
        let report = next(&mut telemetry).await;
        assert_eq!(report.scheduled_sequences, vec![3]);

        let state = scheduler.buffer_state().await;
        assert_eq!(state.played_through, Some(1));
        assert!(state.is_ready(1));
        assert_eq!(state.ready_segment_count(), 2);

        // 播放头只增不减
        scheduler.consume(0).await;
        assert_eq!(scheduler.buffer_state().await.played_through, Some(1));
    }

    #[test]
    async fn test_failure_stops_and_keeps_ready_items() {
        let scheduler = SegmentPrefetchScheduler::new(settings(10.0, 0));
        let mut telemetry = telemetry_channel(&scheduler).await;
        let source = Arc::new(FakeSource {
            failing: ["https://cdn.test/3.ts".to_string()].into_iter().collect(),
            ..Default::default()
        });
        scheduler
            .start(playlist(1, 5), source.clone(), HlsSegmentCache::new(16, None))
            .await;

        let report = next(&mut telemetry).await;
        assert_eq!(report.scheduled_sequences, vec![1, 2, 3]);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.ready_count, 2);
        assert_eq!(source.calls.lock().unwrap().len(), 3);
        assert_eq!(scheduler.last_telemetry().await, Some(report));
    }

    #[test]
    async fn test_cache_hit_skips_network() {
        let scheduler = SegmentPrefetchScheduler::new(settings(2.0, 1));
        let mut telemetry = telemetry_channel(&scheduler).await;
        let cache = HlsSegmentCache::new(16, None);
        cache.put(Bytes::from_static(b"cached"), "segment-1").await;
        let source = Arc::new(FakeSource::default());

        scheduler.start(playlist(1, 3), source.clone(), cache).await;
        next(&mut telemetry).await;
        assert!(source.calls.lock().unwrap().is_empty());
        assert!(scheduler.buffer_state().await.is_ready(1));
    }

    #[test]
    async fn test_parts_before_parent_and_part_depth() {
        let mut media = playlist(1, 1);
        media.segments[0].parts = (0..2)
            .map(|index| HlsPartialSegment {
                parent_sequence: 1,
                part_index: index,
                duration: 1.0,
                url: format!("https://cdn.test/1.{}.mp4", index),
                byte_range: None,
                independent: index == 0,
                gap: false,
                encryption: None,
                map: None,
            })
            .collect();
        media.trailing_parts = vec![HlsPartialSegment {
            parent_sequence: 2,
            part_index: 0,
            duration: 1.0,
            url: "https://cdn.test/2.0.mp4".to_string(),
            byte_range: None,
            independent: true,
            gap: false,
            encryption: None,
            map: None,
        }];

        let scheduler = SegmentPrefetchScheduler::new(settings(10.0, 0));
        let mut telemetry = telemetry_channel(&scheduler).await;
        let source = Arc::new(FakeSource::default());
        scheduler
            .start(media, source.clone(), HlsSegmentCache::new(16, None))
            .await;
        next(&mut telemetry).await;

        assert_eq!(
            *source.calls.lock().unwrap(),
            vec![
                "https://cdn.test/1.0.mp4",
                "https://cdn.test/1.1.mp4",
                "https://cdn.test/1.ts",
                "https://cdn.test/2.0.mp4",
            ]
        );
        let state = scheduler.buffer_state().await;
        assert_eq!(state.ready_part_count(1), 2);
        assert_eq!(state.ready_part_count(2), 1);
        assert_eq!(state.part_depth_secs, 1.0);
        assert_eq!(state.prefetch_depth_secs, 3.0);

        scheduler.consume_part(2, 0).await;
        assert_eq!(scheduler.buffer_state().await.ready_part_count(2), 0);
    }

    #[test]
    async fn test_buffer_snapshots_arrive_in_order() {
        let scheduler = SegmentPrefetchScheduler::new(settings(0.0, 0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler
            .set_buffer_subscriber(Some(Arc::new(move |state: BufferState| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(state.ready_segment_count());
                }
                .boxed()
            })))
            .await;

        for seq in 1..=3 {
            scheduler
                .register_ready_segment(&HlsSegment::new(format!("{}.ts", seq), 2.0, seq))
                .await;
        }
        scheduler.consume(3).await;

        let mut counts = Vec::new();
        for _ in 0..4 {
            counts.push(next(&mut rx).await);
        }
        assert_eq!(counts, vec![1, 2, 3, 0]);
    }

    #[test]
    async fn test_checksum_mismatch_never_populates_cache() {
        let origin = OriginServer::start(vec![Route::text("/1.ts", "payload")]).await;
        let fetcher = HlsSegmentFetcher::new(
            HttpClient::new().unwrap(),
            ValidationPolicy {
                enforce_byte_range_length: true,
                checksum: Some(Checksum {
                    algorithm: ChecksumAlgorithm::Sha256,
                    value: "00".repeat(32),
                }),
            },
        );
        let media = MediaPlaylist {
            target_duration: 2.0,
            media_sequence: 1,
            segments: vec![HlsSegment::new(origin.url("/1.ts"), 2.0, 1)],
            ..Default::default()
        };

        let scheduler = SegmentPrefetchScheduler::new(settings(2.0, 1));
        let mut telemetry = telemetry_channel(&scheduler).await;
        let cache = HlsSegmentCache::new(4, None);
        scheduler.start(media, Arc::new(fetcher), cache.clone()).await;

        let report = next(&mut telemetry).await;
        assert_eq!(report.failure_count, 1);
        assert_eq!(cache.metrics().await.entries, 0);
        assert!(!scheduler.buffer_state().await.is_ready(1));
    }

    #[test]
    async fn test_upcoming_playlists_extend_lookahead() {
        let scheduler = SegmentPrefetchScheduler::new(settings(100.0, 0));
        let mut telemetry = telemetry_channel(&scheduler).await;
        let source = Arc::new(FakeSource::default());
        scheduler
            .start(playlist(1, 2), source.clone(), HlsSegmentCache::new(16, None))
            .await;
        next(&mut telemetry).await;

        scheduler.enqueue_upcoming_playlists(vec![playlist(10, 2)]).await;
        let report = next(&mut telemetry).await;
        assert_eq!(report.scheduled_sequences, vec![10, 11]);
        assert_eq!(scheduler.buffer_state().await.ready_segment_count(), 4);
    }

    #[test]
    async fn test_empty_buffer_reports_positive_zero_depth() {
        let scheduler = SegmentPrefetchScheduler::new(settings(4.0, 2));
        let state = scheduler.buffer_state().await;
        assert_eq!(state.prefetch_depth_secs, 0.0);
        assert!(state.prefetch_depth_secs.is_sign_positive());
        assert!(state.part_depth_secs.is_sign_positive());

        let config = crate::hls::RewriteConfig::new("http://127.0.0.1:9000");
        let output = crate::hls::rewrite(&playlist(1, 2), &config, &state, None);
        assert!(output.contains("#EXT-X-PREFETCH-DISTANCE:0.00"));
        assert!(!output.contains("-0.00"));
    }
}
