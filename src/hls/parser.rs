use tracing::debug;

use crate::error::ParserError;
use crate::hls::types::*;
use crate::utils::resolve_url;

/// Parsed `KEY=VALUE` list of an M3U8 tag, quotes stripped.
#[derive(Debug, Default)]
pub(crate) struct AttributeList {
    pairs: Vec<(String, String)>,
}

impl AttributeList {
    /// 按逗号拆分属性, 引号内的逗号不拆分
    pub(crate) fn parse(input: &str) -> Self {
        let mut pairs = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;

        let mut push = |raw: &str| {
            if let Some((key, value)) = raw.split_once('=') {
                let key = key.trim().to_ascii_uppercase();
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                if !key.is_empty() {
                    pairs.push((key, value.to_string()));
                }
            }
        };

        for c in input.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
                ',' if !in_quotes => {
                    push(&current);
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        push(&current);

        Self { pairs }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name).map_or(false, |v| v.eq_ignore_ascii_case("YES"))
    }

    fn require(&self, tag: &'static str, name: &'static str) -> Result<&str, ParserError> {
        self.get(name)
            .ok_or(ParserError::MissingAttribute { tag, attribute: name })
    }

    fn number<T: std::str::FromStr>(
        &self,
        tag: &'static str,
        name: &'static str,
    ) -> Result<Option<T>, ParserError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ParserError::InvalidAttribute {
                tag,
                attribute: name,
                value: raw.to_string(),
            }),
        }
    }

    fn required_number<T: std::str::FromStr>(
        &self,
        tag: &'static str,
        name: &'static str,
    ) -> Result<T, ParserError> {
        self.number(tag, name)?
            .ok_or(ParserError::MissingAttribute { tag, attribute: name })
    }

    fn byte_range(&self, tag: &'static str) -> Result<Option<ByteRange>, ParserError> {
        match self.get("BYTERANGE") {
            None => Ok(None),
            Some(raw) => ByteRange::parse(raw).map(Some).ok_or(ParserError::InvalidAttribute {
                tag,
                attribute: "BYTERANGE",
                value: raw.to_string(),
            }),
        }
    }
}

/// 解析过程中的临时状态
#[derive(Default)]
struct ParseState {
    variants: Vec<VariantPlaylist>,
    renditions: Vec<Rendition>,
    session_keys: Vec<HlsKey>,
    segments: Vec<HlsSegment>,
    pending_variant: Option<VariantAttributes>,
    pending_duration: Option<f64>,
    pending_byte_range: Option<ByteRange>,
    pending_parts: Vec<HlsPartialSegment>,
    current_encryption: Option<SegmentEncryption>,
    current_map: Option<MediaInitializationMap>,
    sequence: u64,
    media_sequence: u64,
    target_duration: f64,
    is_endlist: bool,
    part_target: Option<f64>,
    server_control: Option<ServerControl>,
    preload_hints: Vec<PreloadHint>,
    rendition_reports: Vec<RenditionReport>,
    skipped_segments: Option<u64>,
}

fn split_tag(line: &str) -> (&str, &str) {
    line.split_once(':').unwrap_or((line, ""))
}

fn resolve(value: &str, base_url: &str) -> Result<String, ParserError> {
    resolve_url(base_url, value).ok_or_else(|| ParserError::UnresolvedUrl(value.to_string()))
}

/// Parses M3U8 text. Relative URIs are resolved against `base_url`.
pub fn parse(text: &str, base_url: &str) -> Result<HlsManifest, ParserError> {
    let lines: Vec<&str> = text
        .lines()
        .map(|line| line.trim().trim_start_matches('\u{feff}'))
        .collect();

    if !lines.iter().any(|line| *line == "#EXTM3U") {
        return Err(ParserError::MissingHeader);
    }

    let mut state = ParseState::default();

    for line in lines.into_iter().filter(|line| !line.is_empty()) {
        if !line.starts_with('#') {
            handle_uri(&mut state, line, base_url)?;
            continue;
        }

        let (tag, value) = split_tag(line);
        match tag {
            "#EXTINF" => {
                let raw = value.split(',').next().unwrap_or("").trim();
                let duration = raw
                    .parse::<f64>()
                    .map_err(|_| ParserError::MalformedExtinf(value.to_string()))?;
                state.pending_duration = Some(duration);
            }
            "#EXT-X-STREAM-INF" => {
                state.pending_variant = Some(parse_variant_attributes(value));
            }
            "#EXT-X-MEDIA-SEQUENCE" => {
                if let Ok(sequence) = value.trim().parse() {
                    state.sequence = sequence;
                    state.media_sequence = sequence;
                }
            }
            "#EXT-X-TARGETDURATION" => {
                if let Ok(duration) = value.trim().parse() {
                    state.target_duration = duration;
                }
            }
            "#EXT-X-BYTERANGE" => {
                state.pending_byte_range = ByteRange::parse(value);
            }
            "#EXT-X-ENDLIST" => state.is_endlist = true,
            "#EXT-X-MEDIA" => {
                let rendition = parse_rendition(value, base_url)?;
                state.renditions.push(rendition);
            }
            "#EXT-X-KEY" => {
                let key = parse_key(value, base_url, false)?;
                state.current_encryption = match key.method {
                    EncryptionMethod::None => None,
                    _ => Some(key),
                };
            }
            "#EXT-X-SESSION-KEY" => {
                let key = parse_key(value, base_url, true)?;
                state.session_keys.push(key);
            }
            "#EXT-X-MAP" => {
                let attrs = AttributeList::parse(value);
                let uri = attrs.require("#EXT-X-MAP", "URI")?;
                state.current_map = Some(MediaInitializationMap {
                    uri: resolve(uri, base_url)?,
                    byte_range: attrs.byte_range("#EXT-X-MAP")?,
                });
            }
            "#EXT-X-PART" => {
                let attrs = AttributeList::parse(value);
                let duration = attrs.required_number("#EXT-X-PART", "DURATION")?;
                let uri = attrs.require("#EXT-X-PART", "URI")?;
                let part = HlsPartialSegment {
                    parent_sequence: state.sequence,
                    part_index: state.pending_parts.len(),
                    duration,
                    url: resolve(uri, base_url)?,
                    byte_range: attrs.byte_range("#EXT-X-PART")?,
                    independent: attrs.flag("INDEPENDENT"),
                    gap: attrs.flag("GAP"),
                    encryption: state.current_encryption.clone(),
                    map: state.current_map.clone(),
                };
                state.pending_parts.push(part);
            }
            "#EXT-X-PART-INF" => {
                let attrs = AttributeList::parse(value);
                state.part_target = Some(attrs.required_number("#EXT-X-PART-INF", "PART-TARGET")?);
            }
            "#EXT-X-SERVER-CONTROL" => {
                state.server_control = Some(parse_server_control(value)?);
            }
            "#EXT-X-PRELOAD-HINT" => {
                let hint = parse_preload_hint(&state, value, base_url)?;
                state.preload_hints.push(hint);
            }
            "#EXT-X-RENDITION-REPORT" => {
                let attrs = AttributeList::parse(value);
                let uri = attrs.require("#EXT-X-RENDITION-REPORT", "URI")?;
                state.rendition_reports.push(RenditionReport {
                    uri: resolve(uri, base_url)?,
                    last_sequence: attrs.number("#EXT-X-RENDITION-REPORT", "LAST-MSN")?,
                    last_part: attrs.number("#EXT-X-RENDITION-REPORT", "LAST-PART")?,
                });
            }
            "#EXT-X-SKIP" => {
                let attrs = AttributeList::parse(value);
                let skipped: u64 = attrs.required_number("#EXT-X-SKIP", "SKIPPED-SEGMENTS")?;
                // 跳过的分片仍然占用序号
                state.sequence += skipped;
                state.skipped_segments = Some(skipped);
            }
            _ => {}
        }
    }

    let kind = if state.variants.is_empty() && state.renditions.is_empty() {
        ManifestKind::Media
    } else {
        ManifestKind::Master
    };

    debug!(
        "Parsed manifest - kind: {:?}, variants: {}, renditions: {}, segments: {}",
        kind,
        state.variants.len(),
        state.renditions.len(),
        state.segments.len()
    );

    let media_playlist = match kind {
        ManifestKind::Master => None,
        ManifestKind::Media => Some(MediaPlaylist {
            target_duration: state.target_duration,
            media_sequence: state.media_sequence,
            segments: std::mem::take(&mut state.segments),
            trailing_parts: std::mem::take(&mut state.pending_parts),
            is_endlist: state.is_endlist,
            session_keys: state.session_keys.clone(),
            part_target_duration: state.part_target,
            server_control: state.server_control.take(),
            preload_hints: std::mem::take(&mut state.preload_hints),
            rendition_reports: std::mem::take(&mut state.rendition_reports),
            skipped_segments: state.skipped_segments,
        }),
    };

    Ok(HlsManifest {
        kind,
        variants: state.variants,
        media_playlist,
        renditions: state.renditions,
        session_keys: state.session_keys,
        original_text: text.to_string(),
    })
}

fn handle_uri(state: &mut ParseState, line: &str, base_url: &str) -> Result<(), ParserError> {
    let url = resolve(line, base_url)?;

    if let Some(attributes) = state.pending_variant.take() {
        state.variants.push(VariantPlaylist { url, attributes });
        return Ok(());
    }

    state.segments.push(HlsSegment {
        url,
        duration: state.pending_duration.take().unwrap_or(0.0),
        sequence: state.sequence,
        byte_range: state.pending_byte_range.take(),
        encryption: state.current_encryption.clone(),
        map: state.current_map.clone(),
        parts: std::mem::take(&mut state.pending_parts),
    });
    state.sequence += 1;
    Ok(())
}

fn parse_variant_attributes(value: &str) -> VariantAttributes {
    let attrs = AttributeList::parse(value);
    let group = |name: &str| {
        attrs
            .get(name)
            .filter(|v| !v.eq_ignore_ascii_case("NONE"))
            .map(String::from)
    };

    VariantAttributes {
        bandwidth: attrs.get("BANDWIDTH").and_then(|v| v.parse().ok()),
        average_bandwidth: attrs.get("AVERAGE-BANDWIDTH").and_then(|v| v.parse().ok()),
        frame_rate: attrs.get("FRAME-RATE").and_then(|v| v.parse().ok()),
        resolution: attrs.get("RESOLUTION").and_then(|v| {
            let (w, h) = v.split_once(|c| c == 'x' || c == 'X')?;
            Some(Resolution {
                width: w.parse().ok()?,
                height: h.parse().ok()?,
            })
        }),
        codecs: attrs.get("CODECS").map(String::from),
        audio_group: group("AUDIO"),
        subtitles_group: group("SUBTITLES"),
        closed_captions_group: group("CLOSED-CAPTIONS"),
    }
}

fn parse_rendition(value: &str, base_url: &str) -> Result<Rendition, ParserError> {
    let attrs = AttributeList::parse(value);
    let raw_type = attrs
        .get("TYPE")
        .ok_or(ParserError::MissingMediaAttribute("TYPE"))?;
    let group_id = attrs
        .get("GROUP-ID")
        .ok_or(ParserError::MissingMediaAttribute("GROUP-ID"))?;
    let name = attrs
        .get("NAME")
        .ok_or(ParserError::MissingMediaAttribute("NAME"))?;

    let kind = RenditionType::from_attribute(raw_type)
        .ok_or_else(|| ParserError::UnsupportedRenditionType(raw_type.to_string()))?;

    let uri = match attrs.get("URI") {
        Some(uri) => Some(resolve(uri, base_url)?),
        None if kind.requires_uri() => return Err(ParserError::MissingMediaAttribute("URI")),
        None => None,
    };

    let instream_id = match attrs.get("INSTREAM-ID") {
        Some(id) if kind.requires_instream_id() => Some(id.to_string()),
        None if kind.requires_instream_id() => {
            return Err(ParserError::MissingMediaAttribute("INSTREAM-ID"))
        }
        _ => None,
    };

    Ok(Rendition {
        kind,
        group_id: group_id.to_string(),
        name: name.to_string(),
        language: attrs.get("LANGUAGE").map(String::from),
        is_default: attrs.flag("DEFAULT"),
        autoselect: attrs.flag("AUTOSELECT"),
        forced: attrs.flag("FORCED"),
        characteristics: attrs
            .get("CHARACTERISTICS")
            .map(|v| v.split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_default(),
        uri,
        instream_id,
    })
}

fn parse_key(value: &str, base_url: &str, is_session_key: bool) -> Result<HlsKey, ParserError> {
    let tag = if is_session_key {
        "#EXT-X-SESSION-KEY"
    } else {
        "#EXT-X-KEY"
    };
    let attrs = AttributeList::parse(value);
    let raw_method = attrs.require(tag, "METHOD")?;
    let method = EncryptionMethod::from_attribute(raw_method).ok_or_else(|| {
        ParserError::InvalidAttribute {
            tag,
            attribute: "METHOD",
            value: raw_method.to_string(),
        }
    })?;

    let uri = match method {
        EncryptionMethod::None => None,
        _ => Some(resolve(attrs.require(tag, "URI")?, base_url)?),
    };

    Ok(HlsKey {
        method,
        uri,
        key_format: attrs.get("KEYFORMAT").map(String::from),
        key_format_versions: attrs.get("KEYFORMATVERSIONS").map(String::from),
        iv: attrs.get("IV").map(String::from),
        is_session_key,
    })
}

fn parse_server_control(value: &str) -> Result<ServerControl, ParserError> {
    const TAG: &str = "#EXT-X-SERVER-CONTROL";
    let attrs = AttributeList::parse(value);
    Ok(ServerControl {
        can_skip_until: attrs.number(TAG, "CAN-SKIP-UNTIL")?,
        can_skip_dateranges: attrs.flag("CAN-SKIP-DATERANGES"),
        can_block_reload: attrs.flag("CAN-BLOCK-RELOAD"),
        can_prefetch: attrs.flag("CAN-PREFETCH"),
        hold_back: attrs.number(TAG, "HOLD-BACK")?,
        part_hold_back: attrs.number(TAG, "PART-HOLD-BACK")?,
    })
}

fn parse_preload_hint(
    state: &ParseState,
    value: &str,
    base_url: &str,
) -> Result<PreloadHint, ParserError> {
    const TAG: &str = "#EXT-X-PRELOAD-HINT";
    let attrs = AttributeList::parse(value);
    let raw_type = attrs.require(TAG, "TYPE")?;
    let kind = match raw_type {
        "PART" => PreloadHintType::Part,
        "MAP" => PreloadHintType::Map,
        other => {
            return Err(ParserError::InvalidAttribute {
                tag: TAG,
                attribute: "TYPE",
                value: other.to_string(),
            })
        }
    };
    let uri = attrs.require(TAG, "URI")?;

    // 预加载提示指向下一个尚未出现的部分分片
    let part_index = match kind {
        PreloadHintType::Part => state.pending_parts.len(),
        PreloadHintType::Map => 0,
    };

    Ok(PreloadHint {
        kind,
        uri: resolve(uri, base_url)?,
        byte_range_start: attrs.number(TAG, "BYTERANGE-START")?,
        byte_range_length: attrs.number(TAG, "BYTERANGE-LENGTH")?,
        sequence: state.sequence,
        part_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://cdn.test/live/index.m3u8";

    #[test]
    fn test_missing_header() {
        assert_eq!(
            parse("#EXTINF:4,\nseg.ts", BASE),
            Err(ParserError::MissingHeader)
        );
    }

    #[test]
    fn test_attribute_list_respects_quotes() {
        let attrs = AttributeList::parse(r#"BANDWIDTH=800000,CODECS="avc1.4d401f,mp4a.40.2",AUDIO="aac""#);
        assert_eq!(attrs.get("BANDWIDTH"), Some("800000"));
        assert_eq!(attrs.get("CODECS"), Some("avc1.4d401f,mp4a.40.2"));
        assert_eq!(attrs.get("AUDIO"), Some("aac"));
    }

    #[test]
    fn test_parse_master_manifest() {
        let text = r#"#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",NAME="English",LANGUAGE="en",DEFAULT=YES,AUTOSELECT=YES,URI="audio/en.m3u8"
#EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS,GROUP-ID="cc",NAME="CC1",INSTREAM-ID="CC1"
#EXT-X-SESSION-KEY:METHOD=AES-128,URI="https://keys.test/k1"
#EXT-X-STREAM-INF:BANDWIDTH=1500000,AVERAGE-BANDWIDTH=1200000,RESOLUTION=1280x720,CODECS="avc1.4d401f,mp4a.40.2",AUDIO="aac",CLOSED-CAPTIONS=NONE
high/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=500000
low/index.m3u8
"#;
        let manifest = parse(text, "https://cdn.test/master.m3u8").unwrap();
        assert_eq!(manifest.kind, ManifestKind::Master);
        assert!(manifest.media_playlist.is_none());
        assert_eq!(manifest.variants.len(), 2);

        let high = &manifest.variants[0];
        assert_eq!(high.url, "https://cdn.test/high/index.m3u8");
        assert_eq!(high.bitrate(), Some(1_200_000));
        assert_eq!(high.attributes.resolution, Some(Resolution { width: 1280, height: 720 }));
        assert_eq!(high.attributes.codecs.as_deref(), Some("avc1.4d401f,mp4a.40.2"));
        assert_eq!(high.attributes.audio_group.as_deref(), Some("aac"));
        assert_eq!(high.attributes.closed_captions_group, None);

        assert_eq!(manifest.renditions.len(), 2);
        let audio = &manifest.renditions[0];
        assert_eq!(audio.kind, RenditionType::Audio);
        assert_eq!(audio.uri.as_deref(), Some("https://cdn.test/audio/en.m3u8"));
        assert!(audio.is_default);
        assert_eq!(manifest.renditions[1].instream_id.as_deref(), Some("CC1"));

        assert_eq!(manifest.session_keys.len(), 1);
        assert!(manifest.session_keys[0].is_session_key);
    }

    #[test]
    fn test_rendition_validation() {
        let missing_name = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aac\"\n";
        assert_eq!(
            parse(missing_name, BASE),
            Err(ParserError::MissingMediaAttribute("NAME"))
        );

        let cc_without_id = "#EXTM3U\n#EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS,GROUP-ID=\"cc\",NAME=\"CC\"\n";
        assert_eq!(
            parse(cc_without_id, BASE),
            Err(ParserError::MissingMediaAttribute("INSTREAM-ID"))
        );

        let video = "#EXTM3U\n#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"v\",NAME=\"Cam\"\n";
        assert_eq!(
            parse(video, BASE),
            Err(ParserError::UnsupportedRenditionType("VIDEO".into()))
        );

        let muxed_audio = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aac\",NAME=\"Main\"\n";
        assert!(parse(muxed_audio, BASE).unwrap().renditions[0].uri.is_none());
    }

    #[test]
    fn test_parse_media_playlist_with_keys_and_maps() {
        let text = r#"#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:100
#EXT-X-MAP:URI="init.mp4",BYTERANGE="720@0"
#EXT-X-KEY:METHOD=AES-128,URI="https://keys.test/k1",IV=0x01
#EXTINF:4.000,
seg100.m4s
#EXT-X-BYTERANGE:1000@2000
#EXTINF:3.5,title
seg101.m4s
#EXT-X-KEY:METHOD=NONE
#EXTINF:4,
seg102.m4s
#EXT-X-ENDLIST
"#;
        let manifest = parse(text, BASE).unwrap();
        assert_eq!(manifest.kind, ManifestKind::Media);
        let playlist = manifest.media_playlist.unwrap();
        assert_eq!(playlist.media_sequence, 100);
        assert_eq!(playlist.target_duration, 4.0);
        assert!(playlist.is_endlist);

        let sequences: Vec<u64> = playlist.segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![100, 101, 102]);

        let first = &playlist.segments[0];
        assert_eq!(first.url, "https://cdn.test/live/seg100.m4s");
        assert_eq!(first.map.as_ref().unwrap().uri, "https://cdn.test/live/init.mp4");
        assert_eq!(first.map.as_ref().unwrap().byte_range, Some(ByteRange { length: 720, offset: 0 }));
        let key = first.encryption.as_ref().unwrap();
        assert_eq!(key.method, EncryptionMethod::Aes128);
        assert_eq!(key.iv.as_deref(), Some("0x01"));

        assert_eq!(playlist.segments[1].duration, 3.5);
        assert_eq!(playlist.segments[1].byte_range, Some(ByteRange { length: 1000, offset: 2000 }));
        assert!(playlist.segments[2].encryption.is_none());
        assert!(playlist.segments[2].byte_range.is_none());
    }

    #[test]
    fn test_malformed_extinf_and_key() {
        let bad_extinf = "#EXTM3U\n#EXTINF:abc,\nseg.ts\n";
        assert!(matches!(parse(bad_extinf, BASE), Err(ParserError::MalformedExtinf(_))));

        let key_without_uri = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128\n";
        assert_eq!(
            parse(key_without_uri, BASE),
            Err(ParserError::MissingAttribute { tag: "#EXT-X-KEY", attribute: "URI" })
        );
    }

    #[test]
    fn test_parse_low_latency_playlist() {
        let text = r#"#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK=1.0,CAN-SKIP-UNTIL=24.0
#EXT-X-PART-INF:PART-TARGET=0.5
#EXT-X-MEDIA-SEQUENCE:20
#EXTINF:4.0,
seg20.m4s
#EXT-X-PART:DURATION=0.5,URI="seg21.0.m4s",INDEPENDENT=YES
#EXT-X-PART:DURATION=0.5,URI="seg21.1.m4s"
#EXT-X-PRELOAD-HINT:TYPE=PART,URI="seg21.2.m4s"
#EXT-X-RENDITION-REPORT:URI="../alt/index.m3u8",LAST-MSN=21,LAST-PART=1
"#;
        let playlist = parse(text, BASE).unwrap().media_playlist.unwrap();
        assert_eq!(playlist.part_target_duration, Some(0.5));
        let control = playlist.server_control.as_ref().unwrap();
        assert!(control.can_block_reload);
        assert_eq!(control.part_hold_back, Some(1.0));
        assert_eq!(control.can_skip_until, Some(24.0));

        assert_eq!(playlist.segments.len(), 1);
        assert_eq!(playlist.trailing_parts.len(), 2);
        assert_eq!(playlist.trailing_parts[0].parent_sequence, 21);
        assert!(playlist.trailing_parts[0].independent);
        assert_eq!(playlist.newest_position(), Some((21, Some(1))));
        let hint = &playlist.preload_hints[0];
        assert_eq!(hint.kind, PreloadHintType::Part);
        assert_eq!((hint.sequence, hint.part_index), (21, 2));
        assert_eq!(playlist.rendition_reports[0].uri, "https://cdn.test/alt/index.m3u8");
        assert_eq!(playlist.rendition_reports[0].last_sequence, Some(21));
    }

    #[test]
    fn test_parts_attach_to_following_segment() {
        let text = r#"#EXTM3U
#EXT-X-MEDIA-SEQUENCE:5
#EXT-X-PART:DURATION=1.0,URI="p0.m4s"
#EXT-X-PART:DURATION=1.0,URI="p1.m4s",BYTERANGE="400@100"
#EXTINF:2.0,
seg5.m4s
#EXTINF:2.0,
seg6.m4s
"#;
        let playlist = parse(text, BASE).unwrap().media_playlist.unwrap();
        let parts = &playlist.segments[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[1].parent_sequence, parts[1].part_index), (5, 1));
        assert!(!parts[0].independent);
        assert_eq!(parts[1].byte_range, Some(ByteRange { length: 400, offset: 100 }));
        assert!(playlist.segments[1].parts.is_empty());

        let missing_duration = "#EXTM3U\n#EXT-X-PART:URI=\"p0.m4s\"\n";
        assert_eq!(
            parse(missing_duration, BASE),
            Err(ParserError::MissingAttribute { tag: "#EXT-X-PART", attribute: "DURATION" })
        );
    }

    #[test]
    fn test_skip_advances_sequence() {
        let text = r#"#EXTM3U
#EXT-X-MEDIA-SEQUENCE:10
#EXT-X-SKIP:SKIPPED-SEGMENTS=3
#EXTINF:4,
seg13.ts
"#;
        let playlist = parse(text, BASE).unwrap().media_playlist.unwrap();
        assert_eq!(playlist.media_sequence, 10);
        assert_eq!(playlist.skipped_segments, Some(3));
        assert_eq!(playlist.segments[0].sequence, 13);
    }

    #[test]
    fn test_unresolved_url() {
        let text = "#EXTM3U\n#EXTINF:4,\nseg.ts\n";
        assert_eq!(
            parse(text, "not-a-base"),
            Err(ParserError::UnresolvedUrl("seg.ts".into()))
        );
    }
}
