use thiserror::Error;

/// 清单(playlist 文本)拉取错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Insecure scheme rejected: {0}")]
    InsecureScheme(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("Empty response body")]
    EmptyBody,
    #[error("Response body is not valid UTF-8")]
    Utf8Decoding,
    #[error("Request timed out")]
    Timeout,
    #[error("Retry exhausted, last error: {0}")]
    RetryExhausted(Box<FetchError>),
}

impl FetchError {
    /// 不安全协议与解码错误不会重试
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::InsecureScheme(_) | FetchError::Utf8Decoding | FetchError::RetryExhausted(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("Playlist is missing the #EXTM3U header")]
    MissingHeader,
    #[error("Malformed #EXTINF line: {0}")]
    MalformedExtinf(String),
    #[error("#EXT-X-MEDIA is missing attribute {0}")]
    MissingMediaAttribute(&'static str),
    #[error("{tag} is missing attribute {attribute}")]
    MissingAttribute {
        tag: &'static str,
        attribute: &'static str,
    },
    #[error("{tag} has invalid {attribute}: {value}")]
    InvalidAttribute {
        tag: &'static str,
        attribute: &'static str,
        value: String,
    },
    #[error("Unable to resolve URL: {0}")]
    UnresolvedUrl(String),
    #[error("Unsupported rendition type: {0}")]
    UnsupportedRenditionType(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegmentFetchError {
    #[error("Invalid segment URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("Empty segment body")]
    EmptyBody,
    #[error("Byte range length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("Segment request timed out")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParserError),
    #[error("Refreshed manifest does not contain a media playlist")]
    MediaPlaylistUnavailable,
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("Manifest fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Manifest parse failed: {0}")]
    Parse(#[from] ParserError),
    #[error("Segment fetch failed: {0}")]
    Segment(#[from] SegmentFetchError),
    #[error("Playlist refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Proxy server is not ready")]
    ServerNotReady,
    #[error("Manifest does not contain a playable variant")]
    NoPlayableVariant,
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(FetchError::EmptyBody.is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(!FetchError::InsecureScheme("http".into()).is_retryable());
        assert!(!FetchError::Utf8Decoding.is_retryable());
    }

    #[test]
    fn test_refresh_error_wraps_sources() {
        let err: RefreshError = ParserError::MissingHeader.into();
        assert_eq!(err.to_string(), "Playlist is missing the #EXTM3U header");
        let err: ProxyError = FetchError::HttpStatus(404).into();
        assert!(err.to_string().contains("404"));
    }
}
