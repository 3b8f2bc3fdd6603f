//! Upstream transports to the inference daemon.
//!
//! - [`http`]: the daemon's native HTTP API
//! - [`ndjson`]: incremental decoder for the daemon's streamed JSON lines
//! - [`process`]: the daemon's command-line tool, read from stdout

pub mod http;
pub mod ndjson;
pub mod process;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::config::{Config, Transport};
use crate::error::RelayError;

/// A generation request as accepted from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    pub model: String,
}

/// Lazy, finite sequence of generated text fragments.
///
/// Mid-stream failures are logged by the producer and end the stream early.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send + 'static>>;

/// A way of reaching the daemon.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Installed model names, in daemon order.
    ///
    /// Never empty on success. Variants decide whether failures surface as
    /// errors or degrade to a default list.
    async fn list_models(&self) -> Result<Vec<String>, RelayError>;

    /// Start a generation and return its fragments.
    ///
    /// Fails only when the daemon cannot be reached at all; once a stream is
    /// returned it carries no error channel.
    async fn generate(&self, request: &PromptRequest) -> Result<FragmentStream, RelayError>;
}

pub type SharedUpstream = Arc<dyn Upstream>;

/// Build the upstream selected by the configuration.
pub fn build_upstream(config: &Config) -> Result<SharedUpstream, RelayError> {
    let upstream: SharedUpstream = match config.transport {
        Transport::Http => Arc::new(http::HttpUpstream::new(&config.upstream)?),
        Transport::Process => Arc::new(process::ProcessUpstream::new(config.process.clone())),
    };
    Ok(upstream)
}

/// Substitute the single-element default for an empty model list.
pub(crate) fn or_fallback(models: Vec<String>, fallback: &str) -> Vec<String> {
    if models.is_empty() {
        vec![fallback.to_string()]
    } else {
        models
    }
}
