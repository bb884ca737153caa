//! HTTP Client Factory
//!
//! Builds the reqwest client used to talk to the local inference server.
//! The server is always on loopback, so environment proxies are ignored.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client` for the local server.
///
/// - `Some(timeout)` -> per-request timeout
/// - `None` -> no request timeout (long generations, streaming)
pub fn build_http_client(timeout: Option<Duration>) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().no_proxy();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| LlmError::NetworkError {
        message: format!("failed to build HTTP client: {}", e),
    })
}
