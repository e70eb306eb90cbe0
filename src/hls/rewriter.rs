use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::config::LowLatencyPolicy;
use crate::hls::buffer::BufferState;
use crate::hls::identity;
use crate::hls::types::*;

pub const BANDWIDTH_DATA_ID: &str = "com.hlsproxy.bandwidth";

/// 重写播放列表所需的配置
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// 形如 `http://127.0.0.1:54321`
    pub proxy_base_url: String,
    pub segment_path_prefix: String,
    pub hide_until_buffered: bool,
    pub artificial_bandwidth: Option<u64>,
    pub history_window: u64,
    pub low_latency: Option<LowLatencyPolicy>,
    /// 源密钥 URI 到代理 URL 的映射 (DRM 代理模式)
    pub key_overrides: HashMap<String, String>,
}

impl RewriteConfig {
    pub fn new(proxy_base_url: impl Into<String>) -> Self {
        Self {
            proxy_base_url: proxy_base_url.into().trim_end_matches('/').to_string(),
            segment_path_prefix: "segments".to_string(),
            hide_until_buffered: false,
            artificial_bandwidth: None,
            history_window: 4,
            low_latency: None,
            key_overrides: HashMap::new(),
        }
    }

    pub fn segment_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.proxy_base_url, self.segment_path_prefix, key)
    }

    fn key_uri<'a>(&'a self, uri: &'a str) -> &'a str {
        self.key_overrides.get(uri).map(String::as_str).unwrap_or(uri)
    }

    fn active_low_latency(&self) -> Option<&LowLatencyPolicy> {
        self.low_latency.as_ref().filter(|policy| policy.enabled)
    }
}

fn format_key(config: &RewriteConfig, key: &HlsKey) -> String {
    let mut line = format!("METHOD={}", key.method.as_attribute());
    if let Some(uri) = &key.uri {
        let _ = write!(line, ",URI=\"{}\"", config.key_uri(uri));
    }
    if let Some(iv) = &key.iv {
        let _ = write!(line, ",IV={}", iv);
    }
    if let Some(format) = &key.key_format {
        let _ = write!(line, ",KEYFORMAT=\"{}\"", format);
    }
    if let Some(versions) = &key.key_format_versions {
        let _ = write!(line, ",KEYFORMATVERSIONS=\"{}\"", versions);
    }
    line
}

fn format_map(map: &MediaInitializationMap) -> String {
    match &map.byte_range {
        Some(range) => format!("#EXT-X-MAP:URI=\"{}\",BYTERANGE=\"{}\"", map.uri, range),
        None => format!("#EXT-X-MAP:URI=\"{}\"", map.uri),
    }
}

fn format_part(config: &RewriteConfig, part: &HlsPartialSegment, namespace: Option<&str>) -> String {
    let key = identity::key_for_part(part.parent_sequence, part.part_index, namespace);
    let mut line = format!(
        "#EXT-X-PART:DURATION={:.3},URI=\"{}\"",
        part.duration,
        config.segment_url(&key)
    );
    if part.independent {
        line.push_str(",INDEPENDENT=YES");
    }
    if part.gap {
        line.push_str(",GAP=YES");
    }
    line
}

/// 记录上一次输出的 MAP 和 KEY, 只在变化时输出
#[derive(Default)]
struct Transitions<'a> {
    map: Option<&'a MediaInitializationMap>,
    key: Option<&'a SegmentEncryption>,
}

impl<'a> Transitions<'a> {
    fn emit(
        &mut self,
        body: &mut Vec<String>,
        config: &RewriteConfig,
        map: Option<&'a MediaInitializationMap>,
        key: Option<&'a SegmentEncryption>,
    ) {
        if let Some(map) = map {
            if self.map != Some(map) {
                body.push(format_map(map));
            }
            self.map = Some(map);
        }
        if key != self.key {
            match key {
                Some(key) => body.push(format!("#EXT-X-KEY:{}", format_key(config, key))),
                None => body.push("#EXT-X-KEY:METHOD=NONE".to_string()),
            }
            self.key = key;
        }
    }
}

fn server_control_line(playlist: &MediaPlaylist, config: &RewriteConfig) -> Option<String> {
    let source = playlist.server_control.clone().unwrap_or_default();
    let configured = config.active_low_latency();

    let can_skip_until = configured
        .and_then(|policy| policy.can_skip_until_secs)
        .or(source.can_skip_until);
    let can_block_reload =
        configured.map_or(false, |policy| policy.allow_blocking_reload) || source.can_block_reload;
    let can_prefetch =
        configured.map_or(false, |policy| policy.prefetch_hint_count > 0) || source.can_prefetch;
    let part_hold_back = configured
        .and_then(|policy| policy.part_hold_back_secs)
        .or(source.part_hold_back);

    let mut attributes = Vec::new();
    if let Some(skip) = can_skip_until {
        attributes.push(format!("CAN-SKIP-UNTIL={:.3}", skip));
        if source.can_skip_dateranges {
            attributes.push("CAN-SKIP-DATERANGES=YES".to_string());
        }
    }
    if can_block_reload {
        attributes.push("CAN-BLOCK-RELOAD=YES".to_string());
    }
    if can_prefetch {
        attributes.push("CAN-PREFETCH=YES".to_string());
    }
    if let Some(hold_back) = source.hold_back {
        attributes.push(format!("HOLD-BACK={:.3}", hold_back));
    }
    if let Some(part_hold_back) = part_hold_back {
        attributes.push(format!("PART-HOLD-BACK={:.3}", part_hold_back));
    }

    if attributes.is_empty() {
        None
    } else {
        Some(format!("#EXT-X-SERVER-CONTROL:{}", attributes.join(",")))
    }
}

/// Renders `playlist` as proxy-addressed M3U8 text for the given buffer state.
///
/// Segments from the first one that is not ready onwards stay pending, so the
/// player never sees a gap in the sequence. The first pending segment may
/// still expose the parts that are already cached.
pub fn rewrite(
    playlist: &MediaPlaylist,
    config: &RewriteConfig,
    state: &BufferState,
    namespace: Option<&str>,
) -> String {
    let low_latency = config.active_low_latency();
    let hide = config.hide_until_buffered;
    let mut lines: Vec<String> = vec!["#EXTM3U".to_string()];

    let version = if low_latency.is_some() || playlist.has_low_latency_features() {
        7
    } else {
        3
    };
    lines.push(format!("#EXT-X-VERSION:{}", version));
    lines.push(format!(
        "#EXT-X-TARGETDURATION:{}",
        playlist.target_duration.ceil() as u64
    ));

    if let Some(bandwidth) = config.artificial_bandwidth {
        lines.push(format!(
            "#EXT-X-SESSION-DATA:DATA-ID=\"{}\",VALUE=\"{}\"",
            BANDWIDTH_DATA_ID, bandwidth
        ));
    }

    if let Some(line) = server_control_line(playlist, config) {
        lines.push(line);
    }
    if let Some(part_target) = playlist.part_target_duration {
        lines.push(format!("#EXT-X-PART-INF:PART-TARGET={:.3}", part_target));
    }

    let floor = match state.played_through {
        Some(played) => playlist
            .media_sequence
            .max((played + 1).saturating_sub(config.history_window)),
        None => playlist.media_sequence,
    };
    lines.push(format!("#EXT-X-MEDIA-SEQUENCE:{}", floor));

    for key in &playlist.session_keys {
        lines.push(format!("#EXT-X-SESSION-KEY:{}", format_key(config, key)));
    }

    let mut body: Vec<String> = Vec::new();
    let mut pending: Vec<&HlsSegment> = Vec::new();
    let mut transitions = Transitions::default();

    for segment in playlist.segments.iter().filter(|s| s.sequence >= floor) {
        if !pending.is_empty() {
            pending.push(segment);
            continue;
        }

        let ready = !hide || state.is_ready(segment.sequence);
        let visible_parts = if hide {
            state.ready_part_count(segment.sequence).min(segment.parts.len())
        } else {
            segment.parts.len()
        };

        if !ready {
            pending.push(segment);
            if visible_parts == 0 {
                continue;
            }
        }

        transitions.emit(&mut body, config, segment.map.as_ref(), segment.encryption.as_ref());
        for part in &segment.parts[..visible_parts] {
            body.push(format_part(config, part, namespace));
        }
        if ready {
            body.push(format!("#EXTINF:{:.3},", segment.duration));
            body.push(config.segment_url(&identity::key_for_sequence(
                segment.sequence,
                namespace,
            )));
        }
    }

    if pending.is_empty() && !playlist.trailing_parts.is_empty() {
        let visible = if hide {
            let sequence = playlist.trailing_parts[0].parent_sequence;
            state.ready_part_count(sequence).min(playlist.trailing_parts.len())
        } else {
            playlist.trailing_parts.len()
        };
        if let Some(first) = playlist.trailing_parts.first().filter(|_| visible > 0) {
            transitions.emit(&mut body, config, first.map.as_ref(), first.encryption.as_ref());
        }
        for part in &playlist.trailing_parts[..visible] {
            body.push(format_part(config, part, namespace));
        }
    }

    if hide && !pending.is_empty() {
        debug!(
            "Hiding {} of {} segments until buffered",
            pending.len(),
            playlist.segments.len()
        );
    }

    if let Some(policy) = low_latency {
        if policy.enable_delta_updates && !pending.is_empty() {
            lines.push(format!("#EXT-X-SKIP:SKIPPED-SEGMENTS={}", pending.len()));
        }
    }

    lines.extend(body);

    for hint in &playlist.preload_hints {
        let line = match hint.kind {
            PreloadHintType::Part => {
                let key = identity::key_for_part(hint.sequence, hint.part_index, namespace);
                format!(
                    "#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"{}\"",
                    config.segment_url(&key)
                )
            }
            PreloadHintType::Map => {
                let mut line = format!("#EXT-X-PRELOAD-HINT:TYPE=MAP,URI=\"{}\"", hint.uri);
                if let Some(start) = hint.byte_range_start {
                    let _ = write!(line, ",BYTERANGE-START={}", start);
                }
                if let Some(length) = hint.byte_range_length {
                    let _ = write!(line, ",BYTERANGE-LENGTH={}", length);
                }
                line
            }
        };
        lines.push(line);
    }

    for report in &playlist.rendition_reports {
        let mut line = format!("#EXT-X-RENDITION-REPORT:URI=\"{}\"", report.uri);
        if let Some(msn) = report.last_sequence {
            let _ = write!(line, ",LAST-MSN={}", msn);
        }
        if let Some(part) = report.last_part {
            let _ = write!(line, ",LAST-PART={}", part);
        }
        lines.push(line);
    }

    if let Some(policy) = low_latency {
        for segment in pending.iter().take(policy.prefetch_hint_count) {
            lines.push(format!(
                "#EXT-X-PREFETCH:{}",
                config.segment_url(&identity::key_for_sequence(segment.sequence, namespace))
            ));
        }
    }

    lines.push(format!(
        "#EXT-X-PREFETCH-DISTANCE:{:.2}",
        state.prefetch_depth_secs
    ));

    if pending.is_empty() && playlist.is_endlist {
        lines.push("#EXT-X-ENDLIST".to_string());
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

/// Inputs for the proxy master playlist.
#[derive(Debug, Clone)]
pub struct MasterLayout<'a> {
    pub variant: Option<&'a VariantPlaylist>,
    pub variant_path: &'a str,
    pub renditions: &'a [Rendition],
    pub session_keys: &'a [HlsKey],
}

pub fn rendition_path(rendition: &Rendition) -> String {
    format!("renditions/{}.m3u8", rendition.id())
}

/// 生成代理主播放列表, 只包含当前变体流
pub fn rewrite_master(layout: &MasterLayout<'_>, config: &RewriteConfig) -> String {
    let mut lines = vec!["#EXTM3U".to_string()];
    let version = if config.active_low_latency().is_some() { 7 } else { 3 };
    lines.push(format!("#EXT-X-VERSION:{}", version));

    if let Some(bandwidth) = config.artificial_bandwidth {
        lines.push(format!(
            "#EXT-X-SESSION-DATA:DATA-ID=\"{}\",VALUE=\"{}\"",
            BANDWIDTH_DATA_ID, bandwidth
        ));
    }

    for key in layout.session_keys {
        lines.push(format!("#EXT-X-SESSION-KEY:{}", format_key(config, key)));
    }

    for rendition in layout.renditions {
        let mut line = format!(
            "#EXT-X-MEDIA:TYPE={},GROUP-ID=\"{}\",NAME=\"{}\"",
            rendition.kind.as_attribute(),
            rendition.group_id,
            rendition.name
        );
        if let Some(language) = &rendition.language {
            let _ = write!(line, ",LANGUAGE=\"{}\"", language);
        }
        let flag = |value: bool| if value { "YES" } else { "NO" };
        let _ = write!(
            line,
            ",DEFAULT={},AUTOSELECT={}",
            flag(rendition.is_default),
            flag(rendition.autoselect)
        );
        if rendition.kind == RenditionType::Subtitles {
            let _ = write!(line, ",FORCED={}", flag(rendition.forced));
        }
        if !rendition.characteristics.is_empty() {
            let _ = write!(line, ",CHARACTERISTICS=\"{}\"", rendition.characteristics.join(","));
        }
        if let Some(instream_id) = &rendition.instream_id {
            let _ = write!(line, ",INSTREAM-ID=\"{}\"", instream_id);
        }
        if rendition.uri.is_some() {
            let _ = write!(
                line,
                ",URI=\"{}/{}\"",
                config.proxy_base_url,
                rendition_path(rendition)
            );
        }
        lines.push(line);
    }

    let attributes = layout.variant.map(|v| v.attributes.clone()).unwrap_or_default();
    let mut stream = String::from("#EXT-X-STREAM-INF:");
    let mut fields = Vec::new();
    if let Some(bandwidth) = attributes
        .bandwidth
        .or(attributes.average_bandwidth)
        .or(config.artificial_bandwidth)
    {
        fields.push(format!("BANDWIDTH={}", bandwidth));
    }
    if let Some(average) = attributes.average_bandwidth {
        fields.push(format!("AVERAGE-BANDWIDTH={}", average));
    }
    if let Some(resolution) = attributes.resolution {
        fields.push(format!("RESOLUTION={}", resolution));
    }
    if let Some(frame_rate) = attributes.frame_rate {
        fields.push(format!("FRAME-RATE={:.3}", frame_rate));
    }
    if let Some(codecs) = &attributes.codecs {
        fields.push(format!("CODECS=\"{}\"", codecs));
    }
    if let Some(group) = &attributes.audio_group {
        fields.push(format!("AUDIO=\"{}\"", group));
    }
    if let Some(group) = &attributes.subtitles_group {
        fields.push(format!("SUBTITLES=\"{}\"", group));
    }
    if let Some(group) = &attributes.closed_captions_group {
        fields.push(format!("CLOSED-CAPTIONS=\"{}\"", group));
    }
    stream.push_str(&fields.join(","));
    lines.push(stream);
    lines.push(format!("{}/{}", config.proxy_base_url, layout.variant_path));

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::parser;

    const BASE: &str = "http://127.0.0.1:8080";

    fn two_segment_playlist() -> MediaPlaylist {
        MediaPlaylist {
            target_duration: 4.0,
            media_sequence: 1,
            segments: vec![
                HlsSegment::new("https://cdn.test/1.ts", 4.0, 1),
                HlsSegment::new("https://cdn.test/2.ts", 4.0, 2),
            ],
            is_endlist: true,
            ..Default::default()
        }
    }

    fn ready(sequences: &[u64]) -> BufferState {
        BufferState {
            ready_sequences: sequences.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn hiding_config() -> RewriteConfig {
        RewriteConfig {
            hide_until_buffered: true,
            ..RewriteConfig::new(BASE)
        }
    }

    #[test]
    fn test_hide_until_buffered() {
        let output = rewrite(&two_segment_playlist(), &hiding_config(), &ready(&[1]), None);
        assert!(output.contains("http://127.0.0.1:8080/segments/segment-1"));
        assert!(!output.contains("segment-2"));
        assert!(!output.contains("#EXT-X-ENDLIST"));
        assert!(output.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n"));
    }

    #[test]
    fn test_endlist_when_everything_ready() {
        let output = rewrite(&two_segment_playlist(), &hiding_config(), &ready(&[1, 2]), None);
        assert!(output.trim_end().ends_with("#EXT-X-ENDLIST"));

        let mut live = two_segment_playlist();
        live.is_endlist = false;
        let output = rewrite(&live, &hiding_config(), &ready(&[1, 2]), None);
        assert!(!output.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_pending_segments_stay_contiguous() {
        let mut playlist = two_segment_playlist();
        playlist.segments.push(HlsSegment::new("https://cdn.test/3.ts", 4.0, 3));
        let output = rewrite(&playlist, &hiding_config(), &ready(&[1, 3]), None);
        assert!(output.contains("segment-1"));
        assert!(!output.contains("segment-3"));
    }

    #[test]
    fn test_media_sequence_slides_with_playhead() {
        let state = BufferState {
            played_through: Some(10),
            ..Default::default()
        };
        let output = rewrite(&two_segment_playlist(), &hiding_config(), &state, None);
        assert!(output.contains("#EXT-X-MEDIA-SEQUENCE:7\n"));

        let config = RewriteConfig {
            history_window: 2,
            ..hiding_config()
        };
        let output = rewrite(&two_segment_playlist(), &config, &state, None);
        assert!(output.contains("#EXT-X-MEDIA-SEQUENCE:9\n"));
    }

    #[test]
    fn test_namespaced_keys() {
        let output = rewrite(
            &two_segment_playlist(),
            &RewriteConfig::new(BASE),
            &BufferState::default(),
            Some("Audio Main!?"),
        );
        assert!(output.contains("/segments/audio-main-segment-1\n"));
        assert!(output.contains("/segments/audio-main-segment-2\n"));
    }

    #[test]
    fn test_low_latency_options() {
        let config = RewriteConfig {
            low_latency: Some(LowLatencyPolicy {
                can_skip_until_secs: Some(6.0),
                part_hold_back_secs: Some(0.5),
                allow_blocking_reload: true,
                prefetch_hint_count: 1,
                enable_delta_updates: true,
                ..Default::default()
            }),
            ..hiding_config()
        };
        let output = rewrite(&two_segment_playlist(), &config, &BufferState::default(), None);
        assert!(output.contains("#EXT-X-VERSION:7"));
        assert!(output.contains(
            "#EXT-X-SERVER-CONTROL:CAN-SKIP-UNTIL=6.000,CAN-BLOCK-RELOAD=YES,CAN-PREFETCH=YES,PART-HOLD-BACK=0.500"
        ));
        assert!(output.contains("#EXT-X-SKIP:SKIPPED-SEGMENTS=2"));
        assert!(output.contains("#EXT-X-PREFETCH:http://127.0.0.1:8080/segments/segment-1"));
        assert!(!output.contains("#EXT-X-PREFETCH:http://127.0.0.1:8080/segments/segment-2"));
        assert!(output.contains("#EXT-X-PREFETCH-DISTANCE:0.00"));
    }

    #[test]
    fn test_artificial_bandwidth_marker() {
        let config = RewriteConfig {
            artificial_bandwidth: Some(1_500_000),
            ..RewriteConfig::new(BASE)
        };
        let output = rewrite(&two_segment_playlist(), &config, &ready(&[1, 2]), None);
        assert!(output.contains("DATA-ID=\"com.hlsproxy.bandwidth\",VALUE=\"1500000\""));
    }

    #[test]
    fn test_ready_parts_of_pending_segment_are_exposed() {
        let text = r#"#EXTM3U
#EXT-X-TARGETDURATION:2
#EXT-X-PART-INF:PART-TARGET=0.5
#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK=1.5
#EXT-X-MEDIA-SEQUENCE:1
#EXTINF:2.0,
seg1.m4s
#EXT-X-PART:DURATION=0.5,URI="p2.0.m4s",INDEPENDENT=YES
#EXT-X-PART:DURATION=0.5,URI="p2.1.m4s"
#EXTINF:2.0,
seg2.m4s
#EXT-X-PART:DURATION=0.5,URI="p3.0.m4s"
#EXT-X-PRELOAD-HINT:TYPE=PART,URI="p3.1.m4s"
"#;
        let playlist = parser::parse(text, "https://cdn.test/live.m3u8")
            .unwrap()
            .media_playlist
            .unwrap();
        let mut state = ready(&[1]);
        state.ready_part_counts.insert(2, 1);

        let output = rewrite(&playlist, &hiding_config(), &state, None);
        assert!(output.contains("#EXT-X-PART:DURATION=0.500,URI=\"http://127.0.0.1:8080/segments/part-2-0\",INDEPENDENT=YES"));
        assert!(!output.contains("part-2-1"));
        assert!(!output.contains("segments/segment-2"));
        assert!(!output.contains("part-3-0"));
        assert!(output.contains("#EXT-X-PART-INF:PART-TARGET=0.500"));
        assert!(output.contains("#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK=1.500"));
        assert!(output.contains("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"http://127.0.0.1:8080/segments/part-3-1\""));
    }

    #[test]
    fn test_round_trip_preserves_order_and_transitions() {
        let source = r#"#EXTM3U
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:40
#EXT-X-MAP:URI="init-a.mp4"
#EXT-X-KEY:METHOD=AES-128,URI="https://keys.test/a",IV=0x1
#EXTINF:6.000,
a40.m4s
#EXTINF:5.500,
a41.m4s
#EXT-X-KEY:METHOD=NONE
#EXTINF:6.000,
a42.m4s
#EXT-X-MAP:URI="init-b.mp4"
#EXT-X-KEY:METHOD=SAMPLE-AES,URI="https://keys.test/b"
#EXTINF:4.250,
b43.m4s
#EXT-X-ENDLIST
"#;
        let base = "https://cdn.test/vod/index.m3u8";
        let playlist = parser::parse(source, base).unwrap().media_playlist.unwrap();
        let output = rewrite(
            &playlist,
            &RewriteConfig::new(BASE),
            &BufferState::fully_buffered(&playlist),
            None,
        );
        let reparsed = parser::parse(&output, BASE).unwrap().media_playlist.unwrap();

        assert_eq!(reparsed.media_sequence, playlist.media_sequence);
        assert!(reparsed.is_endlist);
        assert_eq!(reparsed.segments.len(), playlist.segments.len());
        for (original, rewritten) in playlist.segments.iter().zip(&reparsed.segments) {
            assert_eq!(original.sequence, rewritten.sequence);
            assert_eq!(original.duration, rewritten.duration);
            assert_eq!(original.encryption, rewritten.encryption);
            assert_eq!(original.map, rewritten.map);
            assert_eq!(
                rewritten.url,
                format!("{}/segments/segment-{}", BASE, original.sequence)
            );
        }
        assert_eq!(output.matches("#EXT-X-MAP").count(), 2);
        assert_eq!(output.matches("#EXT-X-KEY").count(), 3);
    }

    #[test]
    fn test_key_overrides_and_master() {
        let key = HlsKey {
            method: EncryptionMethod::Aes128,
            uri: Some("https://keys.test/a".into()),
            key_format: None,
            key_format_versions: None,
            iv: None,
            is_session_key: true,
        };
        let mut config = RewriteConfig::new(BASE);
        config
            .key_overrides
            .insert("https://keys.test/a".into(), format!("{}/assets/keys/abc", BASE));

        let variant = VariantPlaylist {
            url: "https://cdn.test/hi.m3u8".into(),
            attributes: VariantAttributes {
                bandwidth: Some(1_500_000),
                resolution: Some(Resolution { width: 1280, height: 720 }),
                audio_group: Some("aac".into()),
                ..Default::default()
            },
        };
        let rendition = Rendition {
            kind: RenditionType::Audio,
            group_id: "aac".into(),
            name: "English".into(),
            language: Some("en".into()),
            is_default: true,
            autoselect: true,
            forced: false,
            characteristics: vec![],
            uri: Some("https://cdn.test/en.m3u8".into()),
            instream_id: None,
        };
        let renditions = [rendition];
        let keys = [key];
        let output = rewrite_master(
            &MasterLayout {
                variant: Some(&variant),
                variant_path: "variants/main.m3u8",
                renditions: &renditions,
                session_keys: &keys,
            },
            &config,
        );

        assert!(output.contains("#EXT-X-SESSION-KEY:METHOD=AES-128,URI=\"http://127.0.0.1:8080/assets/keys/abc\""));
        assert!(output.contains("URI=\"http://127.0.0.1:8080/renditions/audio-aac-english.m3u8\""));
        assert!(output.contains("#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720,AUDIO=\"aac\"\nhttp://127.0.0.1:8080/variants/main.m3u8"));

        let manifest = parser::parse(&output, BASE).unwrap();
        assert_eq!(manifest.kind, ManifestKind::Master);
        assert_eq!(manifest.variants[0].url, "http://127.0.0.1:8080/variants/main.m3u8");
    }
}
