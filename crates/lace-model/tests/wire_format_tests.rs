// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-format tests: spin up a minimal HTTP/1.1 mock server, point an
//! adapter at it, issue a request, and assert both the HTTP request the
//! adapter sent and the normalized events it emitted.
//!
//! These run without API keys or external network access and exercise the
//! full adapter pipeline: serialization → HTTP → SSE parsing.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use lace_model::{
    collect_completion, AnthropicProvider, CompletionRequest, Message, OpenAiCompatProvider,
    Provider, ProviderError, StopReason, StreamEvent, ToolSchema,
};

// ── Minimal HTTP/1.1 mock server ──────────────────────────────────────────────

#[derive(Debug)]
struct CapturedRequest {
    path: String,
    headers: HashMap<String, String>,
    body: Value,
}

/// Bind a one-shot mock server on a random loopback port.  It accepts one
/// request, captures it, and replies with the given status + body.
async fn mock_server_once(
    status: u16,
    content_type: &'static str,
    resp_body: impl Into<String> + Send + 'static,
) -> (u16, tokio::sync::oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<CapturedRequest>();

    tokio::spawn(async move {
        let resp_body: String = resp_body.into();
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();
        let path = request_line
            .trim()
            .split(' ')
            .nth(1)
            .unwrap_or("")
            .to_string();

        let mut headers: HashMap<String, String> = HashMap::new();
        let mut content_length: usize = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((k, v)) = trimmed.split_once(": ") {
                let key = k.to_lowercase();
                if key == "content-length" {
                    content_length = v.parse().unwrap_or(0);
                }
                headers.insert(key, v.to_string());
            }
        }

        let mut body_bytes = vec![0u8; content_length];
        reader.read_exact(&mut body_bytes).await.unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
        let _ = tx.send(CapturedRequest { path, headers, body });

        let response = format!(
            "HTTP/1.1 {status} X\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{resp_body}",
            resp_body.len(),
        );
        write_half.write_all(response.as_bytes()).await.unwrap();
        write_half.shutdown().await.ok();
    });

    (port, rx)
}

fn sse(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| format!("data: {l}\n\n"))
        .collect::<String>()
}

fn simple_request() -> CompletionRequest {
    CompletionRequest {
        messages: vec![Message::system("be terse"), Message::user("hi")],
        tools: vec![ToolSchema {
            name: "read_file".into(),
            description: "reads a file".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        }],
    }
}

// ── Anthropic ─────────────────────────────────────────────────────────────────

fn anthropic_at(port: u16) -> AnthropicProvider {
    AnthropicProvider::new(
        "claude-test".into(),
        Some("test-key".into()),
        Some(format!("http://127.0.0.1:{port}")),
        None,
        None,
        None,
    )
}

#[tokio::test]
async fn anthropic_request_shape_and_text_stream() {
    let body = sse(&[
        r#"{"type":"message_start","message":{"usage":{"input_tokens":7,"output_tokens":0}}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
        r#"{"type":"message_stop"}"#,
    ]);
    let (port, captured) = mock_server_once(200, "text/event-stream", body).await;

    let provider = anthropic_at(port);
    let mut stream = provider.stream(simple_request()).await.unwrap();
    let mut events = Vec::new();
    while let Some(ev) = stream.next().await {
        events.push(ev.unwrap());
    }

    let req = captured.await.unwrap();
    assert_eq!(req.path, "/v1/messages");
    assert_eq!(req.headers.get("x-api-key").map(String::as_str), Some("test-key"));
    assert_eq!(req.body["model"], "claude-test");
    assert_eq!(req.body["system"], "be terse");
    assert_eq!(req.body["stream"], true);
    assert_eq!(req.body["tools"][0]["name"], "read_file");
    assert_eq!(req.body["messages"][0]["role"], "user");

    assert_eq!(
        events,
        vec![
            StreamEvent::Usage { input_tokens: 7, output_tokens: 0 },
            StreamEvent::TextDelta("Hel".into()),
            StreamEvent::TextDelta("lo".into()),
            StreamEvent::Usage { input_tokens: 0, output_tokens: 2 },
            StreamEvent::Finished(StopReason::End),
        ]
    );
}

#[tokio::test]
async fn anthropic_tool_call_split_across_deltas() {
    let body = sse(&[
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"c1","name":"read_file"}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"foo.txt\"}"}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
        r#"{"type":"message_stop"}"#,
    ]);
    let (port, _captured) = mock_server_once(200, "text/event-stream", body).await;

    let provider = anthropic_at(port);
    let stream = provider.stream(simple_request()).await.unwrap();
    let completion = collect_completion(stream).await.unwrap();

    assert_eq!(completion.stop_reason, StopReason::ToolUse);
    let uses = completion.message.tool_uses();
    assert_eq!(uses.len(), 1);
    assert_eq!(uses[0].0, "c1");
    assert_eq!(uses[0].1, "read_file");
    assert_eq!(uses[0].2["path"], "foo.txt");
}

#[tokio::test]
async fn anthropic_non_streaming_respond() {
    let body = serde_json::json!({
        "content": [
            { "type": "text", "text": "assembled" },
            { "type": "tool_use", "id": "c2", "name": "read_file", "input": {"path": "x"} }
        ],
        "usage": { "input_tokens": 11, "output_tokens": 4 },
        "stop_reason": "tool_use"
    })
    .to_string();
    let (port, captured) = mock_server_once(200, "application/json", body).await;

    let provider = anthropic_at(port);
    let completion = provider.respond(simple_request()).await.unwrap();

    let req = captured.await.unwrap();
    assert_eq!(req.body["stream"], false);

    assert_eq!(completion.message.text(), "assembled");
    assert_eq!(completion.message.tool_uses()[0].0, "c2");
    assert_eq!(completion.usage.input_tokens, 11);
    assert_eq!(completion.stop_reason, StopReason::ToolUse);
}

#[tokio::test]
async fn anthropic_server_error_is_transport() {
    let (port, _captured) = mock_server_once(500, "application/json", "{}").await;
    let err = anthropic_at(port).stream(simple_request()).await.err().unwrap();
    assert!(matches!(err, ProviderError::Transport(_)));
}

#[tokio::test]
async fn anthropic_client_error_is_semantic() {
    let (port, _captured) =
        mock_server_once(400, "application/json", r#"{"error":"bad request"}"#).await;
    let err = anthropic_at(port).stream(simple_request()).await.err().unwrap();
    assert!(matches!(err, ProviderError::Semantic(_)));
}

// ── OpenAI-compatible ─────────────────────────────────────────────────────────

fn openai_at(port: u16) -> OpenAiCompatProvider {
    OpenAiCompatProvider::new(
        "gpt-test".into(),
        Some("test-key".into()),
        Some(format!("http://127.0.0.1:{port}")),
        None,
        None,
        None,
    )
}

#[tokio::test]
async fn openai_request_shape_and_text_stream() {
    let body = sse(&[
        r#"{"choices":[{"delta":{"content":"Hey"}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":6,"completion_tokens":1}}"#,
        "[DONE]",
    ]);
    let (port, captured) = mock_server_once(200, "text/event-stream", body).await;

    let provider = openai_at(port);
    let mut stream = provider.stream(simple_request()).await.unwrap();
    let mut events = Vec::new();
    while let Some(ev) = stream.next().await {
        events.push(ev.unwrap());
    }

    let req = captured.await.unwrap();
    assert_eq!(req.path, "/chat/completions");
    assert_eq!(
        req.headers.get("authorization").map(String::as_str),
        Some("Bearer test-key")
    );
    assert_eq!(req.body["messages"][0]["role"], "system");
    assert_eq!(req.body["stream_options"]["include_usage"], true);
    assert_eq!(req.body["tools"][0]["function"]["name"], "read_file");

    assert_eq!(
        events,
        vec![
            StreamEvent::TextDelta("Hey".into()),
            StreamEvent::Usage { input_tokens: 6, output_tokens: 1 },
            StreamEvent::Finished(StopReason::End),
        ]
    );
}

#[tokio::test]
async fn openai_tool_call_stream_assembles() {
    let body = sse(&[
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c7","function":{"name":"read_file","arguments":"{\"pa"}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"a\"}"}}]}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ]);
    let (port, _captured) = mock_server_once(200, "text/event-stream", body).await;

    let provider = openai_at(port);
    let stream = provider.stream(simple_request()).await.unwrap();
    let completion = collect_completion(stream).await.unwrap();

    assert_eq!(completion.stop_reason, StopReason::ToolUse);
    let uses = completion.message.tool_uses();
    assert_eq!(uses[0].0, "c7");
    assert_eq!(uses[0].2["path"], "a");
}

#[tokio::test]
async fn openai_non_streaming_respond() {
    let body = serde_json::json!({
        "choices": [{
            "message": { "content": "plain answer", "tool_calls": [] },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 9, "completion_tokens": 3 }
    })
    .to_string();
    let (port, _captured) = mock_server_once(200, "application/json", body).await;

    let completion = openai_at(port).respond(simple_request()).await.unwrap();
    assert_eq!(completion.message.text(), "plain answer");
    assert_eq!(completion.usage.output_tokens, 3);
    assert_eq!(completion.stop_reason, StopReason::End);
}
