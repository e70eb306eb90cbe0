use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// 从 URL 或请求路径中去掉查询串和片段
pub fn get_url_path(url: &str) -> &str {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    &url[..end]
}

/// 计算URL的哈希值
///
/// # Returns
/// 返回16位的十六进制哈希字符串
///
/// # Examples
/// ```
/// use hls_cache_proxy::utils::hash_url;
///
/// let hash = hash_url("https://example.com/key.bin");
/// assert_eq!(hash.len(), 16);
/// ```
pub fn hash_url(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// 检查URL是否为绝对URL
pub fn is_absolute_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 将相对URL转换为绝对URL, 无法解析时返回 None
///
/// # Examples
/// ```
/// use hls_cache_proxy::utils::resolve_url;
///
/// let absolute = resolve_url("http://example.com/live/index.m3u8", "seg1.ts");
/// assert_eq!(absolute.as_deref(), Some("http://example.com/live/seg1.ts"));
/// ```
pub fn resolve_url(base: &str, relative: &str) -> Option<String> {
    if is_absolute_url(relative) {
        return url::Url::parse(relative).ok().map(String::from);
    }
    let base = url::Url::parse(base).ok()?;
    base.join(relative).ok().map(String::from)
}

/// Lower-cases the input and collapses every run of non-alphanumeric
/// characters into a single `-`, trimming leading and trailing separators.
pub fn slugify(input: &str) -> String {
    input
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// 追加或替换查询参数
pub fn with_query_params(url: &str, params: &[(&str, String)]) -> Option<String> {
    let mut parsed = url::Url::parse(url).ok()?;
    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(name, _)| name == k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (k, v) in &retained {
            query.append_pair(k, v);
        }
        for (k, v) in params {
            query.append_pair(k, v);
        }
    }
    if parsed.query() == Some("") {
        parsed.set_query(None);
    }
    Some(parsed.to_string())
}

/// 配置中的秒数转为 Duration, 负数和非法值按 0 处理
pub fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_url_path() {
        assert_eq!(get_url_path("/variants/main.m3u8?_HLS_msn=4"), "/variants/main.m3u8");
        assert_eq!(get_url_path("/path?query=1#fragment"), "/path");
        assert_eq!(get_url_path("/path"), "/path");
    }

    #[test]
    fn test_hash_url() {
        let hash = hash_url("http://example.com/video.m3u8");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_url("http://example.com/video.m3u8"));
    }

    #[test]
    fn test_resolve_url() {
        let base = "http://example.com/video/playlist.m3u8";
        assert_eq!(
            resolve_url(base, "segment.ts").as_deref(),
            Some("http://example.com/video/segment.ts")
        );
        assert_eq!(
            resolve_url(base, "../segments/segment.ts").as_deref(),
            Some("http://example.com/segments/segment.ts")
        );
        assert_eq!(
            resolve_url(base, "https://cdn.example.com/a.ts").as_deref(),
            Some("https://cdn.example.com/a.ts")
        );
        assert_eq!(resolve_url("not a url", "segment.ts"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Audio Main!?"), "audio-main");
        assert_eq!(slugify("audio-aac--English"), "audio-aac-english");
        assert_eq!(slugify("  "), "");
    }

    #[test]
    fn test_with_query_params_replaces_existing() {
        let url = with_query_params(
            "https://example.com/live.m3u8?token=abc&_HLS_msn=1",
            &[("_HLS_msn", "7".to_string()), ("_HLS_skip", "YES".to_string())],
        )
        .unwrap();
        assert_eq!(url, "https://example.com/live.m3u8?token=abc&_HLS_msn=7&_HLS_skip=YES");
    }
}
