use bytes::Bytes;
use hyper::{header, Body, Response, StatusCode};
use serde::Serialize;
use tracing::error;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegURL";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// 所有响应都带 Content-Length
pub fn build(status: StatusCode, headers: &[(header::HeaderName, &str)], body: Bytes) -> Response<Body> {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, body.len());
    for (name, value) in headers {
        builder = builder.header(name.clone(), *value);
    }
    builder.body(Body::from(body)).unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from_static("0"));
        response
    })
}

pub fn empty(status: StatusCode) -> Response<Body> {
    build(status, &[], Bytes::new())
}

pub fn not_found() -> Response<Body> {
    empty(StatusCode::NOT_FOUND)
}

pub fn unavailable() -> Response<Body> {
    empty(StatusCode::SERVICE_UNAVAILABLE)
}

pub fn text(body: impl Into<String>, content_type: &str) -> Response<Body> {
    build(
        StatusCode::OK,
        &[(header::CONTENT_TYPE, content_type)],
        Bytes::from(body.into()),
    )
}

pub fn playlist(body: impl Into<String>) -> Response<Body> {
    text(body, PLAYLIST_CONTENT_TYPE)
}

pub fn segment(data: Bytes) -> Response<Body> {
    build(
        StatusCode::OK,
        &[
            (header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE),
            (header::CONNECTION, "close"),
        ],
        data,
    )
}

pub fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => build(
            StatusCode::OK,
            &[(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            Bytes::from(body),
        ),
        Err(e) => {
            error!("Failed to encode JSON response: {}", e);
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
