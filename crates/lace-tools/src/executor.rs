// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::approval::{ApprovalGate, ApprovalTicket, Decision, TurnApprovals};
use crate::registry::ToolRegistry;
use crate::schema::validate_input;
use crate::tool::{ToolCall, ToolOutputPart};

/// Ambient state for one tool invocation.
///
/// The cancellation token is the per-turn token; the executor checks it
/// while waiting for approval and while the tool body runs.
#[derive(Clone)]
pub struct ExecContext {
    /// Thread the call belongs to (delegate tools spawn children off it).
    pub thread_id: String,
    pub cancel: CancellationToken,
    /// Fallback when the tool descriptor declares no timeout of its own.
    pub default_timeout: Duration,
    /// Per-turn approval reuse cache.
    pub approvals: Arc<TurnApprovals>,
    /// Where ask tickets are surfaced.  `None` drops them, which leaves the
    /// call waiting until resolved through the gate directly or cancelled.
    pub ticket_tx: Option<mpsc::Sender<ApprovalTicket>>,
    /// Delegation nesting depth of the agent running this turn.  0 for a
    /// root conversation; each delegation hands the child `depth + 1`, so
    /// the limit is scoped to one chain and never leaks across unrelated
    /// concurrent conversations.
    pub delegate_depth: usize,
}

impl ExecContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            cancel: CancellationToken::new(),
            default_timeout: Duration::from_secs(60),
            approvals: Arc::new(TurnApprovals::new()),
            ticket_tx: None,
            delegate_depth: 0,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_ticket_tx(mut self, tx: mpsc::Sender<ApprovalTicket>) -> Self {
        self.ticket_tx = Some(tx);
        self
    }

    pub fn with_delegate_depth(mut self, depth: usize) -> Self {
        self.delegate_depth = depth;
        self
    }
}

/// Terminal outcome of one executed call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Success,
    Error { kind: ExecErrorKind, message: String },
    Denied,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    UnknownTool,
    BadInput,
    Runtime,
}

/// Everything the caller needs to persist a tool result.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ExecOutcome,
    pub content: Vec<ToolOutputPart>,
    pub duration: Duration,
}

impl ExecutionRecord {
    fn finish(
        call: &ToolCall,
        outcome: ExecOutcome,
        content: Vec<ToolOutputPart>,
        started: Instant,
    ) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome,
            content,
            duration: started.elapsed(),
        }
    }

    /// Outcome with an empty content list and a message block describing it.
    fn terminal(call: &ToolCall, outcome: ExecOutcome, message: String, started: Instant) -> Self {
        Self::finish(call, outcome, vec![ToolOutputPart::Text(message)], started)
    }
}

/// Validates input, consults the approval gate, and runs the tool under a
/// timeout and the turn's cancellation signal.
///
/// Every failure mode is data in the returned record; `execute` never
/// returns an error to the caller.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    gate: Arc<ApprovalGate>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<ApprovalGate>) -> Self {
        Self { registry, gate }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    pub async fn execute(&self, call: &ToolCall, ctx: &ExecContext) -> ExecutionRecord {
        let started = Instant::now();

        // 1. Resolve
        let Some(tool) = self.registry.get(&call.name) else {
            return ExecutionRecord::terminal(
                call,
                ExecOutcome::Error {
                    kind: ExecErrorKind::UnknownTool,
                    message: format!("unknown tool: {}", call.name),
                },
                format!("unknown tool: {}", call.name),
                started,
            );
        };

        // 2. Validate
        if let Err(msg) = validate_input(&tool.input_schema(), &call.input) {
            warn!(tool = %call.name, call_id = %call.id, error = %msg, "input rejected");
            return ExecutionRecord::terminal(
                call,
                ExecOutcome::Error {
                    kind: ExecErrorKind::BadInput,
                    message: msg.clone(),
                },
                msg,
                started,
            );
        }

        // 3. Policy / approval
        if !ctx.approvals.is_granted(&call.name, &call.input) {
            match self.gate.decide(&call.name, &tool.annotations()) {
                Decision::Allow => ctx.approvals.remember(&call.name, &call.input),
                Decision::Deny => {
                    debug!(tool = %call.name, call_id = %call.id, "denied by policy");
                    return ExecutionRecord::terminal(
                        call,
                        ExecOutcome::Denied,
                        format!("tool {} denied by policy", call.name),
                        started,
                    );
                }
                Decision::Ask => {
                    let (ticket, verdict) = self.gate.open_ticket(&call.name, &call.input);
                    if let Some(tx) = &ctx.ticket_tx {
                        let _ = tx.send(ticket.clone()).await;
                    }
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => {
                            self.gate.discard(&ticket.id);
                            return ExecutionRecord::terminal(
                                call,
                                ExecOutcome::Cancelled,
                                "cancelled while awaiting approval".into(),
                                started,
                            );
                        }
                        answer = verdict => {
                            // A dropped ticket reads as denial.
                            if !answer.unwrap_or(false) {
                                return ExecutionRecord::terminal(
                                    call,
                                    ExecOutcome::Denied,
                                    format!("tool {} denied by user", call.name),
                                    started,
                                );
                            }
                            ctx.approvals.remember(&call.name, &call.input);
                        }
                    }
                }
            }
        }

        // 4. Invoke under timeout + cancellation
        let timeout = tool.timeout().unwrap_or(ctx.default_timeout);
        let output = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return ExecutionRecord::terminal(
                    call,
                    ExecOutcome::Cancelled,
                    "cancelled while running".into(),
                    started,
                );
            }
            invoked = tokio::time::timeout(timeout, tool.execute(call, ctx)) => match invoked {
                Ok(output) => output,
                Err(_) => {
                    warn!(tool = %call.name, call_id = %call.id, ?timeout, "tool timed out");
                    return ExecutionRecord::terminal(
                        call,
                        ExecOutcome::Timeout,
                        format!("tool {} timed out after {timeout:?}", call.name),
                        started,
                    );
                }
            }
        };

        // 5. Capture
        let outcome = if output.is_error {
            ExecOutcome::Error { kind: ExecErrorKind::Runtime, message: output.text() }
        } else {
            ExecOutcome::Success
        };
        ExecutionRecord::finish(call, outcome, output.parts, started)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use lace_config::{ApprovalConfig, DestructiveDefault};

    use super::*;
    use crate::tool::{Tool, ToolAnnotations, ToolOutput};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes the text input"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations::read_only()
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ExecContext) -> ToolOutput {
            ToolOutput::ok(call.input["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps for a long time"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations::read_only()
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
        async fn execute(&self, _call: &ToolCall, _ctx: &ExecContext) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolOutput::ok("never")
        }
    }

    struct WipeTool;

    #[async_trait]
    impl Tool for WipeTool {
        fn name(&self) -> &str {
            "wipe"
        }
        fn description(&self) -> &str {
            "destroys things"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations::destructive()
        }
        async fn execute(&self, _call: &ToolCall, _ctx: &ExecContext) -> ToolOutput {
            ToolOutput::ok("wiped")
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations::read_only()
        }
        async fn execute(&self, _call: &ToolCall, _ctx: &ExecContext) -> ToolOutput {
            ToolOutput::err("disk on fire")
        }
    }

    fn executor(destructive: DestructiveDefault) -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(SlowTool);
        reg.register(WipeTool);
        reg.register(FailingTool);
        let gate = ApprovalGate::from_config(&ApprovalConfig {
            auto_allow: vec![],
            auto_deny: vec![],
            default_for_destructive: destructive,
        });
        ToolExecutor::new(Arc::new(reg), Arc::new(gate))
    }

    fn call(name: &str, input: Value) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), input }
    }

    #[tokio::test]
    async fn success_captures_content_and_duration() {
        let ex = executor(DestructiveDefault::Ask);
        let rec = ex
            .execute(&call("echo", json!({"text": "hi"})), &ExecContext::new("t"))
            .await;
        assert_eq!(rec.outcome, ExecOutcome::Success);
        assert_eq!(rec.content, vec![ToolOutputPart::Text("hi".into())]);
        assert_eq!(rec.call_id, "c1");
    }

    #[tokio::test]
    async fn unknown_tool_maps_to_error_kind() {
        let ex = executor(DestructiveDefault::Ask);
        let rec = ex.execute(&call("ghost", json!({})), &ExecContext::new("t")).await;
        assert!(matches!(
            rec.outcome,
            ExecOutcome::Error { kind: ExecErrorKind::UnknownTool, .. }
        ));
    }

    #[tokio::test]
    async fn invalid_input_maps_to_bad_input() {
        let ex = executor(DestructiveDefault::Ask);
        let rec = ex
            .execute(&call("echo", json!({"text": 42})), &ExecContext::new("t"))
            .await;
        assert!(matches!(
            rec.outcome,
            ExecOutcome::Error { kind: ExecErrorKind::BadInput, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_field_maps_to_bad_input() {
        let ex = executor(DestructiveDefault::Ask);
        let rec = ex
            .execute(&call("echo", json!({"text": "x", "sneaky": 1})), &ExecContext::new("t"))
            .await;
        assert!(matches!(
            rec.outcome,
            ExecOutcome::Error { kind: ExecErrorKind::BadInput, .. }
        ));
    }

    #[tokio::test]
    async fn tool_error_maps_to_runtime() {
        let ex = executor(DestructiveDefault::Ask);
        let rec = ex.execute(&call("failing", json!({})), &ExecContext::new("t")).await;
        match rec.outcome {
            ExecOutcome::Error { kind: ExecErrorKind::Runtime, message } => {
                assert!(message.contains("disk on fire"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn per_tool_timeout_wins_over_default() {
        let ex = executor(DestructiveDefault::Ask);
        let ctx = ExecContext::new("t").with_timeout(Duration::from_secs(600));
        let rec = ex.execute(&call("slow", json!({})), &ctx).await;
        assert_eq!(rec.outcome, ExecOutcome::Timeout);
    }

    #[tokio::test]
    async fn destructive_deny_policy_blocks_without_side_effect() {
        let ex = executor(DestructiveDefault::Deny);
        let rec = ex.execute(&call("wipe", json!({})), &ExecContext::new("t")).await;
        assert_eq!(rec.outcome, ExecOutcome::Denied);
    }

    #[tokio::test]
    async fn ask_path_approved_runs_tool() {
        let ex = executor(DestructiveDefault::Ask);
        let (tx, mut rx) = mpsc::channel::<ApprovalTicket>(4);
        let ctx = ExecContext::new("t").with_ticket_tx(tx);

        let gate = Arc::clone(ex.gate());
        let resolver = tokio::spawn(async move {
            let ticket = rx.recv().await.expect("ticket should surface");
            gate.resolve(&ticket.id, true);
        });

        let rec = ex.execute(&call("wipe", json!({})), &ctx).await;
        resolver.await.unwrap();
        assert_eq!(rec.outcome, ExecOutcome::Success);
        assert_eq!(rec.content, vec![ToolOutputPart::Text("wiped".into())]);
    }

    #[tokio::test]
    async fn ask_path_denied_yields_denied() {
        let ex = executor(DestructiveDefault::Ask);
        let (tx, mut rx) = mpsc::channel::<ApprovalTicket>(4);
        let ctx = ExecContext::new("t").with_ticket_tx(tx);

        let gate = Arc::clone(ex.gate());
        let resolver = tokio::spawn(async move {
            let ticket = rx.recv().await.expect("ticket should surface");
            gate.resolve(&ticket.id, false);
        });

        let rec = ex.execute(&call("wipe", json!({})), &ctx).await;
        resolver.await.unwrap();
        assert_eq!(rec.outcome, ExecOutcome::Denied);
    }

    #[tokio::test]
    async fn cancellation_while_awaiting_approval() {
        let ex = executor(DestructiveDefault::Ask);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<ApprovalTicket>(4);
        let ctx = ExecContext::new("t").with_cancel(cancel.clone()).with_ticket_tx(tx);

        let canceller = tokio::spawn(async move {
            let _ticket = rx.recv().await.expect("ticket should surface");
            cancel.cancel();
        });

        let rec = ex.execute(&call("wipe", json!({})), &ctx).await;
        canceller.await.unwrap();
        assert_eq!(rec.outcome, ExecOutcome::Cancelled);
        // The abandoned ticket must not linger.
        assert_eq!(ex.gate().pending_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_while_running_tool() {
        let ex = executor(DestructiveDefault::Ask);
        let cancel = CancellationToken::new();
        let ctx = ExecContext::new("t").with_cancel(cancel.clone());

        let handle = {
            let ex = Arc::new(ex);
            let ex2 = Arc::clone(&ex);
            let ctx2 = ctx.clone();
            tokio::spawn(async move { ex2.execute(&call("slow", json!({})), &ctx2).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();
        let rec = handle.await.unwrap();
        assert_eq!(rec.outcome, ExecOutcome::Cancelled);
    }

    #[tokio::test]
    async fn identical_call_reuses_turn_approval() {
        let ex = executor(DestructiveDefault::Ask);
        let (tx, mut rx) = mpsc::channel::<ApprovalTicket>(4);
        let ctx = ExecContext::new("t").with_ticket_tx(tx);

        let gate = Arc::clone(ex.gate());
        let resolver = tokio::spawn(async move {
            // Only one ticket should ever arrive.
            let ticket = rx.recv().await.expect("first ticket");
            gate.resolve(&ticket.id, true);
        });

        let first = ex.execute(&call("wipe", json!({})), &ctx).await;
        let second = ex.execute(&call("wipe", json!({})), &ctx).await;
        resolver.await.unwrap();
        assert_eq!(first.outcome, ExecOutcome::Success);
        assert_eq!(second.outcome, ExecOutcome::Success);
        assert_eq!(ex.gate().pending_count(), 0, "second call must not open a ticket");
    }
}
