//! Chunked streaming of generated fragments to the caller.
//!
//! Each fragment becomes one body chunk, written as soon as the upstream
//! produces it. The media type is `text/event-stream` but the payload is the
//! raw text, without SSE framing.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio_stream::StreamExt;

use crate::upstream::FragmentStream;

pub const EVENT_STREAM: &str = "text/event-stream";

/// Turn a fragment stream into a streaming 200 response.
pub fn fragments_to_response(fragments: FragmentStream) -> Response {
    let body = Body::from_stream(fragments.map(|fragment| Ok::<_, Infallible>(Bytes::from(fragment))));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
