//! HTTP transport: talks to the daemon's native API.
//!
//! - `GET {base_url}/api/tags` for model discovery
//! - `POST {base_url}/api/generate` for streamed generation

use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn, Instrument};

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::upstream::ndjson::NdjsonDecoder;
use crate::upstream::{or_fallback, FragmentStream, PromptRequest, Upstream};

/// Fragments buffered between the upstream reader and the response body.
const FRAGMENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Upstream backed by the daemon's HTTP API.
pub struct HttpUpstream {
    base_url: String,
    client: Client,
    fallback_model: String,
    max_line_bytes: usize,
}

impl HttpUpstream {
    /// Create a client with the configured timeout profile.
    pub fn new(config: &UpstreamConfig) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect())
            .read_timeout(config.timeouts.read())
            .pool_idle_timeout(config.timeouts.pool())
            .build()
            .map_err(RelayError::Client)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            fallback_model: config.fallback_model.clone(),
            max_line_bytes: config.max_line_bytes,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::UpstreamStatus { status, body })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn list_models(&self) -> Result<Vec<String>, RelayError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(RelayError::Unreachable)?;
        let tags: TagsResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(RelayError::Decode)?;

        let models = tags.models.into_iter().map(|m| m.name).collect::<Vec<_>>();
        debug!(count = models.len(), "Daemon listed models");
        Ok(or_fallback(models, &self.fallback_model))
    }

    async fn generate(&self, request: &PromptRequest) -> Result<FragmentStream, RelayError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &request.model,
                prompt: &request.prompt,
            })
            .send()
            .await
            .map_err(RelayError::Unreachable)?;
        let response = Self::check_status(response).await?;

        info!(model = %request.model, "Upstream stream opened");

        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let decoder = NdjsonDecoder::new(self.max_line_bytes);
        tokio::spawn(relay_ndjson(response.bytes_stream(), decoder, tx).in_current_span());

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Drive an upstream byte stream through the decoder into `tx`.
///
/// Returns the number of fragments delivered. Stops early when the upstream
/// fails or the receiver goes away; dropping `body` closes the connection.
pub async fn relay_ndjson<S, E>(
    body: S,
    mut decoder: NdjsonDecoder,
    tx: mpsc::Sender<String>,
) -> usize
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut delivered = 0;

    while let Some(chunk) = body.next().await {
        let fragments = match chunk {
            Ok(chunk) => decoder.push(&chunk),
            Err(e) => {
                warn!(error = %e, delivered, "Upstream stream failed, ending early");
                return delivered;
            }
        };
        for fragment in fragments {
            if tx.send(fragment).await.is_err() {
                debug!(delivered, "Client went away, closing upstream");
                return delivered;
            }
            delivered += 1;
        }
    }

    for fragment in decoder.finish() {
        if tx.send(fragment).await.is_err() {
            return delivered;
        }
        delivered += 1;
    }

    info!(fragments = delivered, dropped = decoder.dropped(), "Upstream stream closed");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use bytes::Bytes;

    async fn collect(chunks: Vec<Result<Bytes, String>>) -> (Vec<String>, usize) {
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(relay_ndjson(
            futures::stream::iter(chunks),
            NdjsonDecoder::new(1024),
            tx,
        ));
        let mut out = Vec::new();
        while let Some(fragment) = rx.recv().await {
            out.push(fragment);
        }
        (out, task.await.unwrap())
    }

    #[tokio::test]
    async fn test_relay_concatenates_in_order() {
        let chunks = ["The", " quick", " brown", " fox"]
            .iter()
            .map(|t| Ok(Bytes::from(format!("{{\"response\":\"{t}\"}}\n"))))
            .collect();
        let (out, delivered) = collect(chunks).await;
        assert_eq!(out.concat(), "The quick brown fox");
        assert_eq!(delivered, 4);
    }

    #[tokio::test]
    async fn test_relay_stops_on_upstream_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"{\"response\":\"partial\"}\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"{\"response\":\"never\"}\n")),
        ];
        let (out, delivered) = collect(chunks).await;
        assert_eq!(out, vec!["partial"]);
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_relay_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let chunks = vec![Ok::<_, Infallible>(Bytes::from_static(b"{\"response\":\"a\"}\n"))];
        let delivered = relay_ndjson(futures::stream::iter(chunks), NdjsonDecoder::new(64), tx).await;
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = UpstreamConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..Default::default()
        };
        let upstream = HttpUpstream::new(&config).unwrap();
        assert_eq!(upstream.base_url(), "http://localhost:11434");
    }
}
