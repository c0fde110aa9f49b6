// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{EventStream, Provider, ProviderCaps};
use crate::types::{
    Completion, CompletionRequest, ContentBlock, Message, ResultBlock, Role, StopReason,
    StreamEvent, Usage,
};

const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;
const DEFAULT_MAX_OUTPUT: u32 = 4_096;

/// Adapter for OpenAI-compatible chat-completions endpoints.
///
/// Reasoning blocks cannot be expressed on this wire; they are dropped when
/// building requests.  Incoming `reasoning_content` deltas (DeepSeek-style
/// servers) are still surfaced as reasoning events.
pub struct OpenAiCompatProvider {
    name: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
    context_window: u32,
    max_output_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        context_window: Option<u32>,
        max_output_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            name: "openai".into(),
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            context_window: context_window.unwrap_or(DEFAULT_CONTEXT_WINDOW),
            max_output_tokens: max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages_to_wire(&req.messages),
            "max_tokens": self.max_output_tokens,
            "temperature": self.temperature,
            "stream": stream,
        });
        if stream {
            // Usage is only reported on the final chunk when asked for.
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
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
            .ok_or_else(|| ProviderError::MissingApiKey(self.name.clone()))?;

        debug!(model = %self.model, "sending openai-compatible request");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = format!("{} error {status}: {text}", self.name);
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
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
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
            .map_err(|e| ProviderError::Transport(format!("reading body: {e}")))?;

        let choice = &v["choices"][0];
        let message = &choice["message"];
        let mut blocks = Vec::new();
        if let Some(r) = message["reasoning_content"].as_str() {
            if !r.is_empty() {
                blocks.push(ContentBlock::Thinking { text: r.to_string() });
            }
        }
        if let Some(text) = message["content"].as_str() {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text: text.to_string() });
            }
        }
        if let Some(calls) = message["tool_calls"].as_array() {
            for c in calls {
                blocks.push(wire_tool_call_to_block(c)?);
            }
        }
        let usage = Usage {
            input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };
        let stop_reason = map_finish_reason(choice["finish_reason"].as_str().unwrap_or("stop"));
        Ok(Completion {
            message: Message { role: Role::Assistant, blocks },
            usage,
            stop_reason,
        })
    }

    async fn stream(&self, req: CompletionRequest) -> Result<EventStream, ProviderError> {
        let body = self.build_body(&req, true);
        let resp = self.post(&body).await?;

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
                            let data = data.trim();
                            if data == "[DONE]" {
                                out.push(Ok(StreamEvent::Finished(
                                    state.stop.take().unwrap_or(StopReason::End),
                                )));
                            } else if let Ok(v) = serde_json::from_str::<Value>(data) {
                                parse_stream_chunk(&v, &mut state.stop, &mut out);
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

fn map_finish_reason(s: &str) -> StopReason {
    match s {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxOutput,
        _ => StopReason::End,
    }
}

fn parse_stream_chunk(
    v: &Value,
    stop: &mut Option<StopReason>,
    out: &mut Vec<Result<StreamEvent, ProviderError>>,
) {
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        out.push(Ok(StreamEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }
    let choice = &v["choices"][0];
    if choice.is_null() {
        return;
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        *stop = Some(map_finish_reason(reason));
    }
    let delta = &choice["delta"];
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            out.push(Ok(StreamEvent::TextDelta(text.to_string())));
        }
    }
    if let Some(r) = delta["reasoning_content"].as_str() {
        if !r.is_empty() {
            out.push(Ok(StreamEvent::ReasoningDelta(r.to_string())));
        }
    }
    if let Some(calls) = delta["tool_calls"].as_array() {
        for c in calls {
            out.push(Ok(StreamEvent::ToolCallDelta {
                index: c["index"].as_u64().unwrap_or(0) as u32,
                id: c["id"].as_str().unwrap_or("").to_string(),
                name: c["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: c["function"]["arguments"].as_str().unwrap_or("").to_string(),
            }));
        }
    }
}

// ─── Wire conversion ─────────────────────────────────────────────────────────

pub(crate) fn messages_to_wire(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::new();
    for m in messages {
        match m.role {
            Role::System => {
                out.push(json!({ "role": "system", "content": m.text() }));
            }
            Role::User => {
                out.push(json!({ "role": "user", "content": m.text() }));
            }
            Role::Assistant => {
                let text = m.text();
                let tool_calls: Vec<Value> = m
                    .blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolUse { call_id, name, input } => Some(json!({
                            "id": call_id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        })),
                        _ => None,
                    })
                    .collect();
                let mut msg = json!({ "role": "assistant" });
                msg["content"] = if text.is_empty() { Value::Null } else { json!(text) };
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = json!(tool_calls);
                }
                out.push(msg);
            }
            Role::ToolResult => {
                for b in &m.blocks {
                    if let ContentBlock::ToolResult { call_id, content, .. } = b {
                        let text = content
                            .iter()
                            .map(ResultBlock::render)
                            .collect::<Vec<_>>()
                            .join("\n");
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": call_id,
                            "content": text,
                        }));
                    }
                }
            }
        }
    }
    out
}

/// Inverse of [`messages_to_wire`].  The error flag of tool results does not
/// exist on this wire, so it always comes back `false`.
pub(crate) fn wire_to_messages(wire: &[Value]) -> Result<Vec<Message>, ProviderError> {
    let mut out = Vec::new();
    for m in wire {
        match m["role"].as_str().unwrap_or("") {
            "system" => out.push(Message::system(m["content"].as_str().unwrap_or(""))),
            "user" => out.push(Message::user(m["content"].as_str().unwrap_or(""))),
            "assistant" => {
                let mut blocks = Vec::new();
                if let Some(text) = m["content"].as_str() {
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text { text: text.to_string() });
                    }
                }
                if let Some(calls) = m["tool_calls"].as_array() {
                    for c in calls {
                        blocks.push(wire_tool_call_to_block(c)?);
                    }
                }
                out.push(Message { role: Role::Assistant, blocks });
            }
            "tool" => out.push(Message::tool_result(
                m["tool_call_id"].as_str().unwrap_or(""),
                false,
                vec![ResultBlock::text(m["content"].as_str().unwrap_or(""))],
            )),
            other => {
                return Err(ProviderError::Semantic(format!(
                    "unexpected wire role: {other}"
                )))
            }
        }
    }
    Ok(out)
}

fn wire_tool_call_to_block(c: &Value) -> Result<ContentBlock, ProviderError> {
    let arguments = c["function"]["arguments"].as_str().unwrap_or("{}");
    let input: Value = serde_json::from_str(arguments)
        .map_err(|e| ProviderError::Semantic(format!("invalid tool arguments: {e}")))?;
    Ok(ContentBlock::ToolUse {
        call_id: c["id"].as_str().unwrap_or("").to_string(),
        name: c["function"]["name"].as_str().unwrap_or("").to_string(),
        input,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_user_map_directly() {
        let wire = messages_to_wire(&[Message::system("s"), Message::user("u")]);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "s");
        assert_eq!(wire[1]["role"], "user");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let m = Message {
            role: Role::Assistant,
            blocks: vec![ContentBlock::ToolUse {
                call_id: "c1".into(),
                name: "list_dir".into(),
                input: json!({"path": "."}),
            }],
        };
        let wire = messages_to_wire(&[m]);
        assert!(wire[0]["content"].is_null());
        assert_eq!(wire[0]["tool_calls"][0]["id"], "c1");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "list_dir");
    }

    #[test]
    fn thinking_blocks_are_dropped_from_requests() {
        let m = Message {
            role: Role::Assistant,
            blocks: vec![
                ContentBlock::Thinking { text: "hidden".into() },
                ContentBlock::Text { text: "visible".into() },
            ],
        };
        let wire = messages_to_wire(&[m]);
        assert_eq!(wire[0]["content"], "visible");
        assert!(wire[0].get("tool_calls").is_none());
    }

    #[test]
    fn tool_result_maps_to_tool_role() {
        let wire = messages_to_wire(&[Message::tool_result(
            "c9",
            true,
            vec![ResultBlock::text("boom")],
        )]);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "c9");
        assert_eq!(wire[0]["content"], "boom");
    }

    #[test]
    fn round_trip_preserves_call_id_pairing_and_text() {
        let original = vec![
            Message::system("sys"),
            Message::user("do it"),
            Message {
                role: Role::Assistant,
                blocks: vec![ContentBlock::ToolUse {
                    call_id: "c1".into(),
                    name: "shell".into(),
                    input: json!({"command": "ls"}),
                }],
            },
            Message::tool_result("c1", false, vec![ResultBlock::text("ok")]),
            Message::assistant("done"),
        ];
        let wire = messages_to_wire(&original);
        let back = wire_to_messages(&wire).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), StopReason::End);
        assert_eq!(map_finish_reason("tool_calls"), StopReason::ToolUse);
        assert_eq!(map_finish_reason("length"), StopReason::MaxOutput);
    }

    #[test]
    fn stream_chunk_with_text_delta() {
        let v = json!({ "choices": [{ "delta": { "content": "hi" } }] });
        let mut stop = None;
        let mut out = Vec::new();
        parse_stream_chunk(&v, &mut stop, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(*out[0].as_ref().unwrap(), StreamEvent::TextDelta("hi".into()));
    }

    #[test]
    fn stream_chunk_records_finish_reason_for_done() {
        let v = json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }] });
        let mut stop = None;
        let mut out = Vec::new();
        parse_stream_chunk(&v, &mut stop, &mut out);
        assert_eq!(stop, Some(StopReason::ToolUse));
        assert!(out.is_empty());
    }

    #[test]
    fn stream_chunk_tool_call_delta_by_index() {
        let v = json!({
            "choices": [{
                "delta": {
                    "tool_calls": [
                        { "index": 1, "id": "c2", "function": { "name": "b", "arguments": "{" } }
                    ]
                }
            }]
        });
        let mut stop = None;
        let mut out = Vec::new();
        parse_stream_chunk(&v, &mut stop, &mut out);
        assert_eq!(
            *out[0].as_ref().unwrap(),
            StreamEvent::ToolCallDelta {
                index: 1,
                id: "c2".into(),
                name: "b".into(),
                arguments: "{".into(),
            }
        );
    }

    #[test]
    fn usage_chunk_parses() {
        let v = json!({ "usage": { "prompt_tokens": 11, "completion_tokens": 3 }, "choices": [] });
        let mut stop = None;
        let mut out = Vec::new();
        parse_stream_chunk(&v, &mut stop, &mut out);
        assert_eq!(
            *out[0].as_ref().unwrap(),
            StreamEvent::Usage { input_tokens: 11, output_tokens: 3 }
        );
    }
}
