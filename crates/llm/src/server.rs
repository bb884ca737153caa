//! Server Engine
//!
//! Inference through a supervised llama-server style process exposing an
//! OpenAI-compatible chat endpoint plus a model router:
//!
//! - `POST /models/load {"model": id}` then poll `GET /models` until loaded
//! - `POST /v1/chat/completions` for single and streamed completions
//!
//! The server model id is the descriptor's `path`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use orchestrator_core::{StreamAdapter, StreamEvent};

use crate::catalog::ModelDescriptor;
use crate::chunker::SERVER_CHUNK_CHARS;
use crate::device::LoadParameters;
use crate::engine::{parse_http_error, InferenceEngine, ModelSession};
use crate::http_client::build_http_client;
use crate::sse::ChatCompletionAdapter;
use crate::types::{ChatRequest, LlmError, LlmResponse, LlmResult, StopReason, ToolCall};

const BACKEND: &str = "llama-server";

/// Connection settings for the server engine.
#[derive(Debug, Clone)]
pub struct ServerEngineConfig {
    pub base_url: Url,
    /// Upper bound for a load request plus status polling
    pub load_timeout: Duration,
    pub load_poll_interval: Duration,
}

impl ServerEngineConfig {
    /// Settings for a server on loopback at `port`.
    pub fn local(port: u16) -> LlmResult<Self> {
        let base_url = Url::parse(&format!("http://127.0.0.1:{}", port)).map_err(|e| {
            LlmError::InvalidRequest {
                message: format!("invalid server url: {}", e),
            }
        })?;
        Ok(Self {
            base_url,
            load_timeout: Duration::from_secs(300),
            load_poll_interval: Duration::from_millis(3_000),
        })
    }
}

fn endpoint(base_url: &Url, path: &str) -> LlmResult<Url> {
    base_url.join(path).map_err(|e| LlmError::InvalidRequest {
        message: format!("invalid endpoint '{}': {}", path, e),
    })
}

fn network_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            message: e.to_string(),
        }
    } else {
        LlmError::NetworkError {
            message: e.to_string(),
        }
    }
}

/// Engine talking to the model router of an inference server.
pub struct ServerEngine {
    config: ServerEngineConfig,
    client: reqwest::Client,
}

impl ServerEngine {
    pub fn new(config: ServerEngineConfig) -> LlmResult<Self> {
        Ok(Self {
            config,
            client: build_http_client(None)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    async fn request_load(&self, model_id: &str) -> LlmResult<()> {
        let response = self
            .client
            .post(endpoint(&self.config.base_url, "/models/load")?)
            .json(&serde_json::json!({ "model": model_id }))
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body, BACKEND));
        }
        Ok(())
    }

    async fn current_status(&self, model_id: &str) -> LlmResult<Option<String>> {
        let response = self
            .client
            .get(endpoint(&self.config.base_url, "/models")?)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(network_error)?;
        if status != 200 {
            return Err(parse_http_error(status, &body, BACKEND));
        }
        let listing: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse model listing: {}", e),
            })?;
        Ok(model_status(&listing, model_id))
    }

    async fn load_and_wait(&self, model_id: &str) -> LlmResult<()> {
        self.request_load(model_id).await?;
        loop {
            match self.current_status(model_id).await? {
                Some(status) if status == "loaded" => return Ok(()),
                other => {
                    tracing::debug!("ServerEngine: '{}' status {:?}, polling", model_id, other);
                }
            }
            tokio::time::sleep(self.config.load_poll_interval).await;
        }
    }
}

/// Status string of `model_id` in a `GET /models` listing.
///
/// Accepts `{"status": {"value": "loaded"}}` and `{"status": "loaded"}`.
pub fn model_status(listing: &serde_json::Value, model_id: &str) -> Option<String> {
    let entries = listing
        .get("data")
        .or_else(|| listing.get("models"))
        .and_then(|v| v.as_array())?;

    entries
        .iter()
        .find(|entry| entry.get("id").and_then(|v| v.as_str()) == Some(model_id))
        .and_then(|entry| entry.get("status"))
        .and_then(|status| match status {
            serde_json::Value::String(s) => Some(s.clone()),
            other => other
                .get("value")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
}

#[async_trait]
impl InferenceEngine for ServerEngine {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        _params: LoadParameters,
    ) -> LlmResult<Box<dyn ModelSession>> {
        let model_id = descriptor.path.clone();
        tracing::info!("ServerEngine: loading '{}' ({})", descriptor.name, model_id);

        match tokio::time::timeout(self.config.load_timeout, self.load_and_wait(&model_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(LlmError::LoadFailed {
                    model: descriptor.name.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(LlmError::LoadFailed {
                    model: descriptor.name.clone(),
                    message: format!(
                        "not loaded within {}s",
                        self.config.load_timeout.as_secs()
                    ),
                })
            }
        }

        tracing::info!("ServerEngine: '{}' loaded", descriptor.name);
        Ok(Box::new(ServerSession {
            client: self.client.clone(),
            base_url: self.config.base_url.clone(),
            model_id,
            model_name: descriptor.name.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Decode tool-call arguments that servers send as a JSON string.
fn decode_arguments(raw: serde_json::Value) -> serde_json::Value {
    match raw {
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))
        }
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    }
}

/// Chat-completion request body.
pub fn chat_body(model_id: &str, request: &ChatRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role().as_str(), "content": m.content() }))
        .collect();

    let mut body = serde_json::json!({
        "model": model_id,
        "messages": messages,
        "temperature": request.temperature,
        "stream": stream,
    });
    if !request.tools.is_empty() {
        body["tools"] = serde_json::Value::Array(
            request.tools.iter().map(|t| t.to_function_schema()).collect(),
        );
    }
    body
}

/// Parse a non-streamed chat-completion response.
/// Remove the next complete line from `buffer` and decode it. Bytes of a
/// character split across reads stay buffered until its line is complete.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let line_end = buffer.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
    Some(String::from_utf8_lossy(&raw).into_owned())
}

pub fn parse_completion(body: &str, model: &str) -> LlmResult<LlmResponse> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ParseError {
            message: format!("Failed to parse response: {}", e),
        })?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ParseError {
            message: "response has no choices".to_string(),
        })?;

    let stop_reason = choice
        .finish_reason
        .as_deref()
        .map(StopReason::from)
        .unwrap_or(StopReason::EndTurn);

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id.unwrap_or_default(),
            name: tc.function.name,
            arguments: decode_arguments(tc.function.arguments),
        })
        .collect();

    Ok(LlmResponse {
        content: choice.message.content,
        tool_calls,
        stop_reason,
        model: model.to_string(),
    })
}

/// A model resident in the server's router.
pub struct ServerSession {
    client: reqwest::Client,
    base_url: Url,
    model_id: String,
    model_name: String,
}

impl ServerSession {
    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> LlmResult<reqwest::Response> {
        let response = self
            .client
            .post(endpoint(&self.base_url, "/v1/chat/completions")?)
            .json(&chat_body(&self.model_id, request, stream))
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.map_err(network_error)?;
            return Err(parse_http_error(status, &body, BACKEND));
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelSession for ServerSession {
    async fn complete(&self, request: &ChatRequest) -> LlmResult<LlmResponse> {
        let response = self.post_chat(request, false).await?;
        let body = response.text().await.map_err(network_error)?;
        parse_completion(&body, &self.model_name)
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmResponse> {
        let response = self.post_chat(request, true).await?;

        let mut adapter = ChatCompletionAdapter::new();
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while !adapter.is_finished() {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                next = stream.next() => match next {
                    Some(chunk) => chunk.map_err(network_error)?,
                    None => break,
                },
            };
            buffer.extend_from_slice(&chunk);

            while let Some(line) = take_line(&mut buffer) {
                let events = match adapter.adapt(&line) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::debug!("ServerSession: skipping stream line: {}", e);
                        continue;
                    }
                };

                for event in events {
                    match event {
                        StreamEvent::TextDelta { content: fragment } => {
                            content.push_str(&fragment);
                            if tx
                                .send(StreamEvent::TextDelta { content: fragment })
                                .await
                                .is_err()
                            {
                                return Err(LlmError::Cancelled);
                            }
                        }
                        StreamEvent::ToolComplete {
                            tool_id,
                            tool_name,
                            arguments,
                        } => tool_calls.push(ToolCall {
                            id: tool_id,
                            name: tool_name,
                            arguments: decode_arguments(serde_json::Value::String(arguments)),
                        }),
                        StreamEvent::Complete {
                            stop_reason: Some(reason),
                        } => stop_reason = StopReason::from(reason.as_str()),
                        StreamEvent::Error { message, .. } => {
                            tracing::error!(
                                "ServerSession: '{}' failed mid-stream: {}",
                                self.model_name,
                                message
                            );
                            return Err(LlmError::ServerError {
                                message,
                                status: None,
                            });
                        }
                        StreamEvent::Complete { stop_reason: None } => {}
                    }
                }
                if adapter.is_finished() {
                    break;
                }
            }
        }

        Ok(LlmResponse {
            content: (!content.is_empty()).then_some(content),
            tool_calls,
            stop_reason,
            model: self.model_name.clone(),
        })
    }

    fn count_units(&self, text: &str) -> usize {
        text.chars().count()
    }

    fn chunk_budget(&self) -> usize {
        SERVER_CHUNK_CHARS
    }

    async fn release(&self) -> LlmResult<()> {
        // The server evicts on its own (--models-max).
        tracing::debug!("ServerSession: release of '{}' left to the server", self.model_name);
        Ok(())
    }
}
