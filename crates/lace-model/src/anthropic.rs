// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::{EventStream, Provider, ProviderCaps};
use crate::types::{
    Completion, CompletionRequest, ContentBlock, Message, ResultBlock, Role, StopReason,
    StreamEvent, Usage,
};

const DEFAULT_CONTEXT_WINDOW: u32 = 200_000;
const DEFAULT_MAX_OUTPUT: u32 = 8_192;

/// Adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    context_window: u32,
    max_output_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        context_window: Option<u32>,
        max_output_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            context_window: context_window.unwrap_or(DEFAULT_CONTEXT_WINDOW),
            max_output_tokens: max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let (system_text, messages) = messages_to_wire(&req.messages);
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_output_tokens,
            "temperature": self.temperature,
            "stream": stream,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingApiKey("anthropic".into()))?;

        debug!(model = %self.model, "sending anthropic request");
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("anthropic request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = format!("anthropic error {status}: {text}");
            return Err(if status.is_server_error() {
                ProviderError::Transport(msg)
            } else {
                ProviderError::Semantic(msg)
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps {
            supports_streaming: true,
            context_window: self.context_window,
            max_output_tokens: self.max_output_tokens,
        }
    }

    async fn respond(&self, req: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = self.build_body(&req, false);
        let resp = self.post(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("reading anthropic body: {e}")))?;

        let blocks = parse_wire_content(
            v["content"]
                .as_array()
                .ok_or_else(|| ProviderError::Semantic("response has no content array".into()))?,
        )?;
        let usage = Usage {
            input_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        };
        let stop_reason = map_stop_reason(v["stop_reason"].as_str().unwrap_or("end_turn"));
        Ok(Completion {
            message: Message { role: Role::Assistant, blocks },
            usage,
            stop_reason,
        })
    }

    async fn stream(&self, req: CompletionRequest) -> Result<EventStream, ProviderError> {
        let body = self.build_body(&req, true);
        let resp = self.post(&body).await?;

        // SSE lines can be split across TCP chunks, so a remainder buffer is
        // carried forward; only complete lines are parsed.  The stop reason
        // arrives in `message_delta` but the stream is only done at
        // `message_stop`, so it rides along in the scan state.
        let event_stream = resp
            .bytes_stream()
            .scan(SseState::default(), |state, chunk| {
                let mut out: Vec<Result<StreamEvent, ProviderError>> = Vec::new();
                match chunk {
                    Ok(bytes) => {
                        state.buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = state.buf.find('\n') {
                            let line = state.buf[..pos].trim_end_matches('\r').to_string();
                            state.buf.drain(..=pos);
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                if let Some(ev) = parse_stream_event(&v, &mut state.stop) {
                                    out.push(Ok(ev));
                                }
                            }
                        }
                    }
                    Err(e) => out.push(Err(ProviderError::Transport(e.to_string()))),
                }
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

#[derive(Default)]
struct SseState {
    buf: String,
    stop: Option<StopReason>,
}

fn map_stop_reason(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxOutput,
        _ => StopReason::End,
    }
}

/// Map one parsed SSE payload to a normalized event.  Returns `None` for
/// events that carry nothing downstream (pings, signature deltas, block
/// stops).
fn parse_stream_event(v: &Value, stop: &mut Option<StopReason>) -> Option<StreamEvent> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            let usage = &v["message"]["usage"];
            Some(StreamEvent::Usage {
                input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: 0,
            })
        }
        "content_block_start" => {
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                Some(StreamEvent::ToolCallDelta {
                    index: v["index"].as_u64().unwrap_or(0) as u32,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                })
            } else {
                None
            }
        }
        "content_block_delta" => {
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => Some(StreamEvent::TextDelta(
                    delta["text"].as_str().unwrap_or("").to_string(),
                )),
                "thinking_delta" => {
                    let t = delta["thinking"].as_str().unwrap_or("");
                    if t.is_empty() {
                        None
                    } else {
                        Some(StreamEvent::ReasoningDelta(t.to_string()))
                    }
                }
                "input_json_delta" => Some(StreamEvent::ToolCallDelta {
                    index: v["index"].as_u64().unwrap_or(0) as u32,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                }),
                // signature_delta carries an opaque integrity blob
                _ => None,
            }
        }
        "message_delta" => {
            if let Some(s) = v["delta"]["stop_reason"].as_str() {
                *stop = Some(map_stop_reason(s));
            }
            v.get("usage").map(|usage| StreamEvent::Usage {
                input_tokens: 0,
                output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
            })
        }
        "message_stop" => Some(StreamEvent::Finished(
            stop.take().unwrap_or(StopReason::End),
        )),
        "error" => {
            let msg = v["error"]["message"].as_str().unwrap_or("unknown").to_string();
            warn!(error = %msg, "anthropic stream error event");
            Some(StreamEvent::Finished(StopReason::Error(msg)))
        }
        _ => None,
    }
}

// ─── Wire conversion ─────────────────────────────────────────────────────────

/// Convert generic messages to the Anthropic wire shape.
///
/// Returns `(system_text, conversation_messages)`: the system message is
/// lifted out because the API expects it as a top-level field.  Assistant
/// messages whose blocks all serialize to nothing (e.g. an empty text turn
/// that only introduced tool calls already carried elsewhere) are skipped —
/// the API rejects empty content.
pub(crate) fn messages_to_wire(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system_text = String::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => {
                // Last system message wins; persona changes replace the prompt.
                system_text = m.text();
            }
            Role::User => {
                let text = m.text();
                out.push(json!({ "role": "user", "content": text }));
            }
            Role::Assistant => {
                let blocks = assistant_blocks_to_wire(&m.blocks);
                if !blocks.is_empty() {
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            Role::ToolResult => {
                for b in &m.blocks {
                    if let ContentBlock::ToolResult { call_id, is_error, content } = b {
                        let mut block = json!({
                            "type": "tool_result",
                            "tool_use_id": call_id,
                            "content": result_content_to_wire(content),
                        });
                        if *is_error {
                            block["is_error"] = json!(true);
                        }
                        out.push(json!({ "role": "user", "content": [block] }));
                    }
                }
            }
        }
    }
    (system_text, out)
}

fn assistant_blocks_to_wire(blocks: &[ContentBlock]) -> Vec<Value> {
    let mut out = Vec::new();
    for b in blocks {
        match b {
            ContentBlock::Thinking { text } if !text.is_empty() => {
                out.push(json!({ "type": "thinking", "thinking": text }));
            }
            ContentBlock::Text { text } if !text.is_empty() => {
                out.push(json!({ "type": "text", "text": text }));
            }
            ContentBlock::ToolUse { call_id, name, input } => {
                out.push(json!({
                    "type": "tool_use",
                    "id": call_id,
                    "name": name,
                    "input": input,
                }));
            }
            _ => {}
        }
    }
    out
}

fn result_content_to_wire(content: &[ResultBlock]) -> Value {
    // A single text block collapses to a plain string for cleaner requests.
    if let [ResultBlock::Text { text }] = content {
        return json!(text);
    }
    let arr: Vec<Value> = content
        .iter()
        .map(|b| match b {
            ResultBlock::Text { text } => json!({ "type": "text", "text": text }),
            ResultBlock::ImageRef { url } => {
                json!({ "type": "image", "source": { "type": "url", "url": url } })
            }
            ResultBlock::Structured { data } => {
                json!({ "type": "text", "text": data.to_string() })
            }
        })
        .collect();
    json!(arr)
}

/// Inverse of [`messages_to_wire`]: reconstruct generic messages from the
/// wire shape.  Used when replaying requests and to verify that conversions
/// are lossless for role, block order, call-id pairing, and text.
pub(crate) fn wire_to_messages(
    system_text: &str,
    wire: &[Value],
) -> Result<Vec<Message>, ProviderError> {
    let mut out = Vec::new();
    if !system_text.is_empty() {
        out.push(Message::system(system_text));
    }
    for m in wire {
        let role = m["role"].as_str().unwrap_or("");
        let content = &m["content"];
        match role {
            "user" => {
                if let Some(text) = content.as_str() {
                    out.push(Message::user(text));
                } else if let Some(arr) = content.as_array() {
                    // Tool results ride in user messages on this wire.
                    if arr.iter().any(|b| b["type"] == "tool_result") {
                        for b in arr {
                            if b["type"] == "tool_result" {
                                out.push(wire_tool_result_to_message(b));
                            }
                        }
                    } else {
                        let text: String = arr
                            .iter()
                            .filter_map(|b| b["text"].as_str())
                            .collect::<Vec<_>>()
                            .join("");
                        out.push(Message::user(text));
                    }
                }
            }
            "assistant" => {
                let mut blocks = Vec::new();
                if let Some(text) = content.as_str() {
                    blocks.push(ContentBlock::Text { text: text.to_string() });
                } else if let Some(arr) = content.as_array() {
                    for b in arr {
                        match b["type"].as_str().unwrap_or("") {
                            "text" => blocks.push(ContentBlock::Text {
                                text: b["text"].as_str().unwrap_or("").to_string(),
                            }),
                            "thinking" => blocks.push(ContentBlock::Thinking {
                                text: b["thinking"].as_str().unwrap_or("").to_string(),
                            }),
                            "tool_use" => blocks.push(ContentBlock::ToolUse {
                                call_id: b["id"].as_str().unwrap_or("").to_string(),
                                name: b["name"].as_str().unwrap_or("").to_string(),
                                input: b["input"].clone(),
                            }),
                            other => {
                                return Err(ProviderError::Semantic(format!(
                                    "unexpected assistant block type: {other}"
                                )))
                            }
                        }
                    }
                }
                out.push(Message { role: Role::Assistant, blocks });
            }
            other => {
                return Err(ProviderError::Semantic(format!(
                    "unexpected wire role: {other}"
                )))
            }
        }
    }
    Ok(out)
}

fn wire_tool_result_to_message(b: &Value) -> Message {
    let call_id = b["tool_use_id"].as_str().unwrap_or("").to_string();
    let is_error = b["is_error"].as_bool().unwrap_or(false);
    let content = match &b["content"] {
        Value::String(s) => vec![ResultBlock::text(s.clone())],
        Value::Array(arr) => arr
            .iter()
            .map(|c| match c["type"].as_str().unwrap_or("") {
                "image" => ResultBlock::ImageRef {
                    url: c["source"]["url"].as_str().unwrap_or("").to_string(),
                },
                _ => ResultBlock::text(c["text"].as_str().unwrap_or("").to_string()),
            })
            .collect(),
        _ => vec![],
    };
    Message::tool_result(call_id, is_error, content)
}

/// Parse a non-streaming response content array into generic blocks.
fn parse_wire_content(content: &[Value]) -> Result<Vec<ContentBlock>, ProviderError> {
    let mut blocks = Vec::new();
    for b in content {
        match b["type"].as_str().unwrap_or("") {
            "text" => blocks.push(ContentBlock::Text {
                text: b["text"].as_str().unwrap_or("").to_string(),
            }),
            "thinking" => blocks.push(ContentBlock::Thinking {
                text: b["thinking"].as_str().unwrap_or("").to_string(),
            }),
            "tool_use" => blocks.push(ContentBlock::ToolUse {
                call_id: b["id"].as_str().unwrap_or("").to_string(),
                name: b["name"].as_str().unwrap_or("").to_string(),
                input: b["input"].clone(),
            }),
            other => {
                return Err(ProviderError::Semantic(format!(
                    "unexpected content block type: {other}"
                )))
            }
        }
    }
    Ok(blocks)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
