use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::slugify;

/// HLS 清单类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    /// 主播放列表(包含多个变体流或备选轨道)
    Master,
    /// 媒体播放列表(包含分片信息)
    Media,
}

/// 解析后的清单快照, 创建后不再修改
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HlsManifest {
    pub kind: ManifestKind,
    pub variants: Vec<VariantPlaylist>,
    pub media_playlist: Option<MediaPlaylist>,
    pub renditions: Vec<Rendition>,
    pub session_keys: Vec<HlsKey>,
    #[serde(skip)]
    pub original_text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// EXT-X-STREAM-INF 属性
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariantAttributes {
    /// 峰值带宽(bps)
    pub bandwidth: Option<u64>,
    /// 平均带宽(bps)
    pub average_bandwidth: Option<u64>,
    pub frame_rate: Option<f64>,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
    /// 关联的 AUDIO 组
    pub audio_group: Option<String>,
    /// 关联的 SUBTITLES 组
    pub subtitles_group: Option<String>,
    /// 关联的 CLOSED-CAPTIONS 组
    pub closed_captions_group: Option<String>,
}

/// 变体流
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantPlaylist {
    pub url: String,
    pub attributes: VariantAttributes,
}

impl VariantPlaylist {
    pub fn id(&self) -> &str {
        &self.url
    }

    /// Average bandwidth when advertised, peak bandwidth otherwise.
    pub fn bitrate(&self) -> Option<u64> {
        self.attributes.average_bandwidth.or(self.attributes.bandwidth)
    }

    pub fn describe(&self) -> String {
        match (self.bitrate(), self.attributes.resolution) {
            (Some(bps), Some(res)) => format!("{} kbps {}", bps / 1000, res),
            (Some(bps), None) => format!("{} kbps", bps / 1000),
            (None, Some(res)) => res.to_string(),
            (None, None) => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RenditionType {
    Audio,
    Subtitles,
    ClosedCaptions,
}

impl RenditionType {
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "AUDIO" => Some(RenditionType::Audio),
            "SUBTITLES" => Some(RenditionType::Subtitles),
            "CLOSED-CAPTIONS" => Some(RenditionType::ClosedCaptions),
            _ => None,
        }
    }

    pub fn as_attribute(&self) -> &'static str {
        match self {
            RenditionType::Audio => "AUDIO",
            RenditionType::Subtitles => "SUBTITLES",
            RenditionType::ClosedCaptions => "CLOSED-CAPTIONS",
        }
    }

    /// Muxed audio and subtitle renditions may omit URI, so no type mandates it.
    pub fn requires_uri(&self) -> bool {
        false
    }

    pub fn requires_instream_id(&self) -> bool {
        matches!(self, RenditionType::ClosedCaptions)
    }
}

/// 备选音频/字幕/隐藏字幕轨道
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rendition {
    pub kind: RenditionType,
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    pub is_default: bool,
    pub autoselect: bool,
    pub forced: bool,
    pub characteristics: Vec<String>,
    pub uri: Option<String>,
    pub instream_id: Option<String>,
}

impl Rendition {
    /// 由类型、组和名称生成的稳定标识
    pub fn id(&self) -> String {
        slugify(&format!(
            "{}-{}-{}",
            self.kind.as_attribute(),
            self.group_id,
            self.name
        ))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EncryptionMethod {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "AES-128")]
    Aes128,
    #[serde(rename = "SAMPLE-AES")]
    SampleAes,
    #[serde(rename = "SAMPLE-AES-CTR")]
    SampleAesCtr,
}

impl EncryptionMethod {
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "NONE" => Some(EncryptionMethod::None),
            "AES-128" => Some(EncryptionMethod::Aes128),
            "SAMPLE-AES" => Some(EncryptionMethod::SampleAes),
            "SAMPLE-AES-CTR" => Some(EncryptionMethod::SampleAesCtr),
            _ => None,
        }
    }

    pub fn as_attribute(&self) -> &'static str {
        match self {
            EncryptionMethod::None => "NONE",
            EncryptionMethod::Aes128 => "AES-128",
            EncryptionMethod::SampleAes => "SAMPLE-AES",
            EncryptionMethod::SampleAesCtr => "SAMPLE-AES-CTR",
        }
    }
}

/// EXT-X-KEY / EXT-X-SESSION-KEY. `uri` is absent iff the method is NONE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HlsKey {
    pub method: EncryptionMethod,
    pub uri: Option<String>,
    pub key_format: Option<String>,
    pub key_format_versions: Option<String>,
    pub iv: Option<String>,
    pub is_session_key: bool,
}

impl HlsKey {
    pub fn none() -> Self {
        Self {
            method: EncryptionMethod::None,
            uri: None,
            key_format: None,
            key_format_versions: None,
            iv: None,
            is_session_key: false,
        }
    }
}

/// Encryption state attached to a segment or part.
pub type SegmentEncryption = HlsKey;

/// 字节范围, `length[@offset]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ByteRange {
    pub length: u64,
    pub offset: u64,
}

impl ByteRange {
    /// Parses `length[@offset]`; the offset defaults to 0.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().trim_matches('"');
        let (length, offset) = match value.split_once('@') {
            Some((length, offset)) => (length.trim().parse().ok()?, offset.trim().parse().ok()?),
            None => (value.parse().ok()?, 0),
        };
        Some(Self { length, offset })
    }

    /// 对应 HTTP Range 请求头
    pub fn http_range(&self) -> String {
        let end = self.offset + self.length.saturating_sub(1);
        format!("bytes={}-{}", self.offset, end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.length, self.offset)
    }
}

/// fMP4 初始化分片 (EXT-X-MAP)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInitializationMap {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
}

/// LL-HLS 部分分片, identity is `(parent_sequence, part_index)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HlsPartialSegment {
    pub parent_sequence: u64,
    pub part_index: usize,
    pub duration: f64,
    pub url: String,
    pub byte_range: Option<ByteRange>,
    pub independent: bool,
    pub gap: bool,
    pub encryption: Option<SegmentEncryption>,
    pub map: Option<MediaInitializationMap>,
}

/// 媒体分片
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HlsSegment {
    pub url: String,
    /// 时长(秒)
    pub duration: f64,
    /// 序号
    pub sequence: u64,
    pub byte_range: Option<ByteRange>,
    pub encryption: Option<SegmentEncryption>,
    pub map: Option<MediaInitializationMap>,
    pub parts: Vec<HlsPartialSegment>,
}

impl HlsSegment {
    pub fn new(url: impl Into<String>, duration: f64, sequence: u64) -> Self {
        Self {
            url: url.into(),
            duration,
            sequence,
            byte_range: None,
            encryption: None,
            map: None,
            parts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PreloadHintType {
    #[serde(rename = "PART")]
    Part,
    #[serde(rename = "MAP")]
    Map,
}

/// EXT-X-PRELOAD-HINT, with the `(sequence, part_index)` it points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreloadHint {
    pub kind: PreloadHintType,
    pub uri: String,
    pub byte_range_start: Option<u64>,
    pub byte_range_length: Option<u64>,
    pub sequence: u64,
    pub part_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenditionReport {
    pub uri: String,
    pub last_sequence: Option<u64>,
    pub last_part: Option<u64>,
}

/// EXT-X-SERVER-CONTROL
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerControl {
    pub can_skip_until: Option<f64>,
    pub can_skip_dateranges: bool,
    pub can_block_reload: bool,
    pub can_prefetch: bool,
    pub hold_back: Option<f64>,
    pub part_hold_back: Option<f64>,
}

/// 媒体播放列表
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaPlaylist {
    /// 目标时长(秒)
    pub target_duration: f64,
    /// 第一个可见分片的序号
    pub media_sequence: u64,
    pub segments: Vec<HlsSegment>,
    /// 正在生成中的分片的部分分片(位于最后一个 URI 之后)
    pub trailing_parts: Vec<HlsPartialSegment>,
    pub is_endlist: bool,
    pub session_keys: Vec<HlsKey>,
    pub part_target_duration: Option<f64>,
    pub server_control: Option<ServerControl>,
    pub preload_hints: Vec<PreloadHint>,
    pub rendition_reports: Vec<RenditionReport>,
    /// EXT-X-SKIP 跳过的分片数 (delta update)
    pub skipped_segments: Option<u64>,
}

impl MediaPlaylist {
    pub fn has_low_latency_features(&self) -> bool {
        self.part_target_duration.is_some()
            || self.server_control.is_some()
            || !self.preload_hints.is_empty()
            || !self.rendition_reports.is_empty()
            || self.skipped_segments.is_some()
            || !self.trailing_parts.is_empty()
            || self.segments.iter().any(|segment| !segment.parts.is_empty())
    }

    /// Newest `(sequence, part_index)` known to the playlist. Trailing parts
    /// count as the segment being produced.
    pub fn newest_position(&self) -> Option<(u64, Option<usize>)> {
        if let Some(part) = self.trailing_parts.last() {
            return Some((part.parent_sequence, Some(part.part_index)));
        }
        self.segments.last().map(|segment| {
            (segment.sequence, segment.parts.last().map(|part| part.part_index))
        })
    }

    pub fn last_segment(&self) -> Option<&HlsSegment> {
        self.segments.last()
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|segment| segment.duration).sum()
    }

    pub fn can_block_reload(&self) -> bool {
        self.server_control
            .as_ref()
            .map_or(false, |control| control.can_block_reload)
    }

    pub fn part_hold_back(&self) -> Option<f64> {
        self.server_control.as_ref().and_then(|control| control.part_hold_back)
    }

    /// Rebuilds a full playlist from a delta update by borrowing the skipped
    /// segments from `previous`. Returns the delta unchanged when `previous`
    /// cannot supply every skipped sequence.
    pub fn merge_delta(&self, previous: &MediaPlaylist) -> MediaPlaylist {
        let skipped = match self.skipped_segments {
            Some(count) if count > 0 => count,
            _ => return self.clone(),
        };

        let first_skipped = self.media_sequence;
        let wanted = first_skipped..first_skipped + skipped;
        let borrowed: Vec<HlsSegment> = previous
            .segments
            .iter()
            .filter(|segment| wanted.contains(&segment.sequence))
            .cloned()
            .collect();

        if borrowed.len() as u64 != skipped {
            return self.clone();
        }

        let mut merged = self.clone();
        merged.segments = borrowed;
        merged.segments.extend(self.segments.iter().cloned());
        merged.skipped_segments = None;
        merged
    }
}

/// A bandwidth window a locked quality selection must fall inside.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityProfile {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub min_bandwidth: Option<u64>,
    #[serde(default)]
    pub max_bandwidth: Option<u64>,
}

impl QualityProfile {
    pub fn matches(&self, variant: &VariantPlaylist) -> bool {
        let bitrate = match variant.bitrate() {
            Some(bitrate) => bitrate,
            None => return self.min_bandwidth.is_none() && self.max_bandwidth.is_none(),
        };
        self.min_bandwidth.map_or(true, |min| bitrate >= min)
            && self.max_bandwidth.map_or(true, |max| bitrate <= max)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QualityPolicy {
    #[default]
    Automatic,
    Locked(QualityProfile),
}

impl QualityPolicy {
    pub fn is_locked(&self) -> bool {
        matches!(self, QualityPolicy::Locked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(url: &str, bandwidth: Option<u64>) -> VariantPlaylist {
        VariantPlaylist {
            url: url.to_string(),
            attributes: VariantAttributes {
                bandwidth,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_rendition_id_is_slug() {
        let rendition = Rendition {
            kind: RenditionType::Audio,
            group_id: "aac".into(),
            name: "English (Main)".into(),
            language: Some("en".into()),
            is_default: true,
            autoselect: true,
            forced: false,
            characteristics: vec![],
            uri: None,
            instream_id: None,
        };
        assert_eq!(rendition.id(), "audio-aac-english-main");
    }

    #[test]
    fn test_byte_range_parse() {
        assert_eq!(ByteRange::parse("1000@200"), Some(ByteRange { length: 1000, offset: 200 }));
        assert_eq!(ByteRange::parse("512"), Some(ByteRange { length: 512, offset: 0 }));
        assert_eq!(ByteRange::parse("x@1"), None);
        assert_eq!(ByteRange { length: 100, offset: 50 }.http_range(), "bytes=50-149");
    }

    #[test]
    fn test_bitrate_prefers_average_bandwidth() {
        let mut v = variant("https://cdn.test/hi.m3u8", Some(2_000_000));
        assert_eq!(v.bitrate(), Some(2_000_000));
        v.attributes.average_bandwidth = Some(1_600_000);
        assert_eq!(v.bitrate(), Some(1_600_000));
    }

    #[test]
    fn test_quality_profile_matching() {
        let profile = QualityProfile {
            label: Some("sd".into()),
            min_bandwidth: Some(400_000),
            max_bandwidth: Some(900_000),
        };
        assert!(profile.matches(&variant("a", Some(500_000))));
        assert!(!profile.matches(&variant("b", Some(1_500_000))));
        assert!(!profile.matches(&variant("c", None)));
        assert!(QualityProfile::default().matches(&variant("c", None)));
    }

    #[test]
    fn test_merge_delta_borrows_skipped_segments() {
        let previous = MediaPlaylist {
            target_duration: 4.0,
            media_sequence: 10,
            segments: (10..14)
                .map(|seq| HlsSegment::new(format!("https://cdn.test/{}.ts", seq), 4.0, seq))
                .collect(),
            ..Default::default()
        };
        let delta = MediaPlaylist {
            target_duration: 4.0,
            media_sequence: 11,
            segments: (13..15)
                .map(|seq| HlsSegment::new(format!("https://cdn.test/{}.ts", seq), 4.0, seq))
                .collect(),
            skipped_segments: Some(2),
            ..Default::default()
        };

        let merged = delta.merge_delta(&previous);
        let sequences: Vec<u64> = merged.segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![11, 12, 13, 14]);
        assert_eq!(merged.skipped_segments, None);

        let unrelated = MediaPlaylist::default();
        assert_eq!(delta.merge_delta(&unrelated), delta);
    }
}
