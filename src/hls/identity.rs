//! Proxy-side segment keys.
//!
//! A key is `[<namespace>-]segment-<seq>` or `[<namespace>-]part-<seq>-<idx>`.
//! Namespaces are slugged, so only the partition survives decoding, not the
//! original spelling.

use crate::utils::slugify;

/// 解码后的分片键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedKey {
    pub namespace: Option<String>,
    pub sequence: u64,
    pub part_index: Option<usize>,
}

fn prefix(namespace: Option<&str>) -> String {
    match namespace.map(slugify) {
        Some(ns) if !ns.is_empty() => format!("{}-", ns),
        _ => String::new(),
    }
}

pub fn key_for_sequence(sequence: u64, namespace: Option<&str>) -> String {
    format!("{}segment-{}", prefix(namespace), sequence)
}

pub fn key_for_part(sequence: u64, part_index: usize, namespace: Option<&str>) -> String {
    format!("{}part-{}-{}", prefix(namespace), sequence, part_index)
}

pub fn parse(key: &str) -> Option<ParsedKey> {
    let tokens: Vec<&str> = key.split('-').collect();
    let n = tokens.len();

    let namespace_of = |end: usize| {
        let ns = tokens[..end].join("-");
        if ns.is_empty() {
            None
        } else {
            Some(ns)
        }
    };

    if n >= 3 && tokens[n - 3] == "part" {
        if let (Ok(sequence), Ok(part_index)) = (tokens[n - 2].parse(), tokens[n - 1].parse()) {
            return Some(ParsedKey {
                namespace: namespace_of(n - 3),
                sequence,
                part_index: Some(part_index),
            });
        }
    }

    if n >= 2 && tokens[n - 2] == "segment" {
        if let Ok(sequence) = tokens[n - 1].parse() {
            return Some(ParsedKey {
                namespace: namespace_of(n - 2),
                sequence,
                part_index: None,
            });
        }
    }

    None
}

/// Sequence number of a segment key, or of the parent segment for a part key.
pub fn sequence_from(key: &str) -> Option<u64> {
    parse(key).map(|parsed| parsed.sequence)
}

pub fn namespace_from(key: &str) -> Option<String> {
    parse(key).and_then(|parsed| parsed.namespace)
}

pub fn part_info_from(key: &str) -> Option<(u64, usize)> {
    let parsed = parse(key)?;
    parsed.part_index.map(|index| (parsed.sequence, index))
}
