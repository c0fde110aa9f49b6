// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lace_config::AgentConfig;
use lace_model::{
    CompletionRequest, ContentBlock as ModelBlock, Provider, StopReason, StreamEvent, ToolSchema,
};
use lace_store::{
    ContentBlock as StoredBlock, EventPayload, ThreadId, ThreadManager, TokenUsage,
    ToolErrorKind, ToolOutcome,
};
use lace_tools::{
    ApprovalTicket, ExecContext, ExecErrorKind, ExecOutcome, ExecutionRecord, ToolCall,
    ToolExecutor, ToolOutputPart, TurnApprovals,
};

use crate::budget::{BudgetLevel, TokenBudget};
use crate::compact::Compactor;
use crate::delegate::{run_delegate, DelegateConstraints};
use crate::error::AgentError;
use crate::events::{AgentEvent, AgentState};
use crate::reconstruct::messages_from_events;

const TRANSPORT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Per-conversation turn state machine.
///
/// One agent drives one thread (retargeted across compactions).  At most one
/// turn is in flight at a time; `send_message` during a running turn fails
/// fast with [`AgentError::Busy`].  The agent persists nothing of its own —
/// every durable effect is an event appended through the [`ThreadManager`].
pub struct Agent {
    threads: Arc<ThreadManager>,
    provider: Arc<dyn Provider>,
    /// Optional cheaper provider used only for compaction summaries.
    compaction_provider: Option<Arc<dyn Provider>>,
    executor: Arc<ToolExecutor>,
    config: Arc<AgentConfig>,
    /// Position of this agent in its delegation chain; 0 for a root
    /// conversation.  Flows into every tool invocation so the delegate tool
    /// can bound nesting per chain.
    delegate_depth: usize,
    thread_id: StdMutex<ThreadId>,
    budget: StdMutex<TokenBudget>,
    state: watch::Sender<AgentState>,
    /// Held for the duration of a turn; `try_lock` failure is the busy signal.
    turn_gate: AsyncMutex<()>,
    /// Cancellation token of the in-flight turn, if any.
    turn_cancel: StdMutex<Option<CancellationToken>>,
}

enum StreamPhase {
    Completed(StreamedTurn),
    Aborted,
}

struct StreamedTurn {
    text: String,
    reasoning: Option<String>,
    usage: TokenUsage,
    stop: StopReason,
    calls: Vec<RawCall>,
}

#[derive(Default)]
struct RawCall {
    id: String,
    name: String,
    args: String,
}

struct FinalCall {
    call: ToolCall,
    /// Set when the terminal argument JSON never parsed; the call gets a
    /// synthesized bad-input result instead of being dispatched.
    parse_error: Option<String>,
}

enum TurnOutcome {
    Completed,
    Aborted,
}

impl Agent {
    /// Create an agent on a fresh thread.  The configured system prompt (if
    /// any) is appended as the thread's first event.
    pub fn new(
        threads: Arc<ThreadManager>,
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        config: Arc<AgentConfig>,
    ) -> Result<Self, AgentError> {
        let thread = threads.create_thread()?;
        Self::on_thread(threads, provider, executor, config, thread.id)
    }

    /// Attach an agent to an existing thread (resume, delegation).  A still
    /// empty thread receives the configured system prompt; the token tally
    /// is re-seeded from the last persisted usage.
    pub fn on_thread(
        threads: Arc<ThreadManager>,
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        config: Arc<AgentConfig>,
        thread_id: ThreadId,
    ) -> Result<Self, AgentError> {
        let caps = provider.capabilities();
        let mut budget = TokenBudget::new(
            caps.context_window,
            config.context_warn_pct,
            config.context_compact_pct,
        );

        let events = threads.get_or_load(&thread_id)?;
        if let Some(usage) = events.iter().rev().find_map(|e| match &e.payload {
            EventPayload::AgentMessage { usage, .. } => Some(*usage),
            _ => None,
        }) {
            let _ = budget.observe(usage);
        }
        if events.is_empty() && !config.system_prompt.is_empty() {
            threads.append_event(
                &thread_id,
                EventPayload::SystemPrompt {
                    text: config.system_prompt.clone(),
                    role: "system".into(),
                },
            )?;
        }

        let (state, _) = watch::channel(AgentState::Idle);
        Ok(Self {
            threads,
            provider,
            compaction_provider: None,
            executor,
            config,
            delegate_depth: 0,
            thread_id: StdMutex::new(thread_id),
            budget: StdMutex::new(budget),
            state,
            turn_gate: AsyncMutex::new(()),
            turn_cancel: StdMutex::new(None),
        })
    }

    /// Use a separate (typically cheaper) provider for compaction summaries.
    pub fn with_compaction_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.compaction_provider = Some(provider);
        self
    }

    /// Place this agent at `depth` in a delegation chain.  Set by
    /// `run_delegate` when building a child; root agents stay at 0.
    pub(crate) fn with_delegate_depth(mut self, depth: usize) -> Self {
        self.delegate_depth = depth;
        self
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Thread currently targeted by this agent.  Changes when a compaction
    /// retargets the agent to the successor thread.
    pub fn thread_id(&self) -> ThreadId {
        self.lock_std(&self.thread_id).clone()
    }

    /// Canonical id of the conversation; stable across compactions.
    pub fn canonical_id(&self) -> Result<ThreadId, AgentError> {
        Ok(self.threads.thread(&self.thread_id())?.canonical_id)
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    fn lock_std<'a, T>(&self, m: &'a StdMutex<T>) -> MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Public operations ────────────────────────────────────────────────────

    /// Begin a turn.  Events stream through `tx` until the turn reaches a
    /// terminal state; the call resolves when the agent is idle again.
    ///
    /// Empty input is accepted — the provider sees an empty user message.
    pub async fn send_message(
        &self,
        text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        let Ok(_turn) = self.turn_gate.try_lock() else {
            return Err(AgentError::Busy);
        };
        let cancel = CancellationToken::new();
        *self.lock_std(&self.turn_cancel) = Some(cancel.clone());

        let result = self.run_turn(text, &tx, &cancel).await;

        *self.lock_std(&self.turn_cancel) = None;
        match &result {
            Ok(TurnOutcome::Completed) => {
                let needs_compaction =
                    self.lock_std(&self.budget).level() >= BudgetLevel::Compact;
                if needs_compaction {
                    if let Err(e) = self.compact_now(&tx).await {
                        // The turn itself succeeded; a failed compaction is
                        // reported and retried at the next boundary.
                        warn!(error = %e, "compaction failed; staying on current thread");
                        let _ = tx.send(AgentEvent::Error(format!("compaction failed: {e}"))).await;
                    }
                }
            }
            Ok(TurnOutcome::Aborted) => {
                let _ = tx.send(AgentEvent::TurnAborted).await;
            }
            Err(e) => {
                let _ = tx.send(AgentEvent::Error(e.to_string())).await;
                self.set_state(AgentState::Errored, &tx).await;
            }
        }
        self.set_state(AgentState::Idle, &tx).await;
        result.map(|_| ())
    }

    /// Cancel the in-flight turn, if any, and wait until the agent has fully
    /// drained back to idle.  No-op when idle.
    pub async fn abort(&self) {
        let token = self.lock_std(&self.turn_cancel).clone();
        if let Some(token) = token {
            token.cancel();
            // The gate is only released once every child of the turn has
            // acknowledged cancellation.
            let _drained = self.turn_gate.lock().await;
        }
    }

    /// Run a bounded sub-task on a child thread and return its summary.
    /// The child shares this agent's executor and stores; constraints may
    /// narrow the tool set or swap the provider for a cheaper one.
    pub async fn delegate(
        &self,
        task: &str,
        constraints: DelegateConstraints,
    ) -> Result<String, AgentError> {
        run_delegate(
            &self.threads,
            Arc::clone(&self.provider),
            Arc::clone(&self.executor),
            &self.config,
            &self.thread_id(),
            self.delegate_depth + 1,
            task,
            constraints,
        )
        .await
    }

    // ── Turn machinery ───────────────────────────────────────────────────────

    async fn set_state(&self, next: AgentState, tx: &mpsc::Sender<AgentEvent>) {
        let changed = *self.state.borrow() != next;
        if changed {
            self.state.send_replace(next);
            let _ = tx.send(AgentEvent::StateChanged(next)).await;
        }
    }

    async fn run_turn(
        &self,
        text: &str,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Aborted);
        }
        let thread_id = self.thread_id();
        self.threads
            .append_event(&thread_id, EventPayload::UserMessage { text: text.to_string() })?;
        self.set_state(AgentState::Thinking, tx).await;

        let turn_approvals = Arc::new(TurnApprovals::new());
        let (ticket_tx, mut ticket_rx) = mpsc::channel::<ApprovalTicket>(16);

        let mut iterations = 0u32;
        loop {
            iterations += 1;
            if iterations > self.config.max_tool_iterations {
                return Err(AgentError::IterationLimit(self.config.max_tool_iterations));
            }
            if iterations > 1 {
                self.set_state(AgentState::Thinking, tx).await;
            }

            let events = self.threads.get_or_load(&thread_id)?;
            let request = CompletionRequest {
                messages: messages_from_events(&events),
                tools: self.tool_schemas(),
            };

            let turn = match self.stream_once(request, tx, cancel).await? {
                // Streamed partial content is not persisted on abort; the log
                // keeps only completed exchanges.  Results for calls of
                // earlier iterations are already durable.
                StreamPhase::Aborted => return Ok(TurnOutcome::Aborted),
                StreamPhase::Completed(turn) => turn,
            };

            if let StopReason::Error(msg) = &turn.stop {
                return Err(AgentError::Stream(msg.clone()));
            }

            // Persistence order within the turn: the assistant message, then
            // each of its calls, then results as they complete.
            self.threads.append_event(
                &thread_id,
                EventPayload::AgentMessage {
                    text: turn.text.clone(),
                    reasoning: turn.reasoning.clone(),
                    usage: turn.usage,
                },
            )?;

            let crossed = {
                let mut budget = self.lock_std(&self.budget);
                budget
                    .observe(turn.usage)
                    .map(|level| (level, budget.used_tokens(), budget.context_window()))
            };
            if let Some((level, used_tokens, context_window)) = crossed {
                let _ = tx
                    .send(AgentEvent::TokenThreshold { level, used_tokens, context_window })
                    .await;
            }

            let finals = finalize_calls(turn.calls, iterations);
            for fc in &finals {
                self.threads.append_event(
                    &thread_id,
                    EventPayload::ToolCall {
                        call_id: fc.call.id.clone(),
                        tool_name: fc.call.name.clone(),
                        input: fc.call.input.clone(),
                    },
                )?;
                let _ = tx
                    .send(AgentEvent::ToolCallStarted {
                        call_id: fc.call.id.clone(),
                        tool_name: fc.call.name.clone(),
                        input: fc.call.input.clone(),
                    })
                    .await;
            }

            if finals.is_empty() {
                self.set_state(AgentState::ConversationComplete, tx).await;
                let _ = tx.send(AgentEvent::ResponseComplete(turn.text)).await;
                return Ok(TurnOutcome::Completed);
            }

            // Calls whose terminal JSON never parsed get an immediate
            // bad-input result so the model can self-correct next iteration.
            let mut dispatch = Vec::new();
            for fc in finals {
                if let Some(msg) = fc.parse_error {
                    let record = ExecutionRecord {
                        call_id: fc.call.id,
                        tool_name: fc.call.name,
                        outcome: ExecOutcome::Error {
                            kind: ExecErrorKind::BadInput,
                            message: msg.clone(),
                        },
                        content: vec![ToolOutputPart::Text(msg)],
                        duration: Duration::ZERO,
                    };
                    self.persist_record(&thread_id, record, tx).await?;
                } else {
                    dispatch.push(fc.call);
                }
            }

            self.set_state(AgentState::ToolExecution, tx).await;
            self.execute_calls(
                &thread_id,
                dispatch,
                &turn_approvals,
                &ticket_tx,
                &mut ticket_rx,
                tx,
                cancel,
            )
            .await?;

            // Every appended call now has a terminal result.  A cancelled
            // turn must not re-enter the provider.
            if cancel.is_cancelled() {
                return Ok(TurnOutcome::Aborted);
            }
        }
    }

    /// One provider exchange: request, consume the normalized stream, and
    /// assemble the turn.  Transport failures at connect retry once with
    /// backoff; the per-turn timeout covers the whole exchange.
    async fn stream_once(
        &self,
        request: CompletionRequest,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<StreamPhase, AgentError> {
        if !self.provider.capabilities().supports_streaming {
            return self.respond_once(request, tx, cancel).await;
        }
        let mut stream = match self.provider.stream(request.clone()).await {
            Ok(s) => s,
            Err(e) if e.is_transport() => {
                warn!(error = %e, "provider transport failure, retrying once");
                tokio::time::sleep(TRANSPORT_RETRY_BACKOFF).await;
                self.provider.stream(request).await?
            }
            Err(e) => return Err(e.into()),
        };

        let deadline = Duration::from_secs(self.config.per_turn_timeout_secs);
        let started = Instant::now();

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut usage = TokenUsage::default();
        let mut stop = StopReason::End;
        let mut pending: BTreeMap<u32, RawCall> = BTreeMap::new();
        let mut streaming = false;

        loop {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                return Err(AgentError::Stream("provider request timed out".into()));
            };
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamPhase::Aborted),
                item = tokio::time::timeout(remaining, stream.next()) => match item {
                    Ok(i) => i,
                    Err(_) => return Err(AgentError::Stream("provider request timed out".into())),
                },
            };
            // A stream that ends without a finished event is treated as a
            // normal end of turn.
            let Some(event) = item else { break };
            match event? {
                StreamEvent::TextDelta(t) if !t.is_empty() => {
                    if !streaming {
                        streaming = true;
                        self.set_state(AgentState::Streaming, tx).await;
                    }
                    text.push_str(&t);
                    let _ = tx.send(AgentEvent::TextDelta(t)).await;
                }
                StreamEvent::TextDelta(_) => {}
                StreamEvent::ReasoningDelta(t) => {
                    if !streaming {
                        streaming = true;
                        self.set_state(AgentState::Streaming, tx).await;
                    }
                    reasoning.push_str(&t);
                    let _ = tx.send(AgentEvent::ReasoningDelta(t)).await;
                }
                StreamEvent::ToolCallDelta { index, id, name, arguments } => {
                    let entry = pending.entry(index).or_default();
                    if !id.is_empty() {
                        entry.id = id;
                    }
                    if !name.is_empty() {
                        entry.name = name;
                    }
                    entry.args.push_str(&arguments);
                }
                StreamEvent::Usage { input_tokens, output_tokens } => {
                    usage.input_tokens = usage.input_tokens.max(input_tokens);
                    usage.output_tokens = usage.output_tokens.max(output_tokens);
                }
                StreamEvent::Finished(reason) => {
                    stop = reason;
                    break;
                }
            }
        }

        Ok(StreamPhase::Completed(StreamedTurn {
            text,
            reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
            usage,
            stop,
            calls: pending.into_values().collect(),
        }))
    }

    /// Non-streaming fallback for providers without a streaming surface.
    /// The assembled text is surfaced as one delta so subscribers see the
    /// same event shapes either way.
    async fn respond_once(
        &self,
        request: CompletionRequest,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<StreamPhase, AgentError> {
        let deadline = Duration::from_secs(self.config.per_turn_timeout_secs);
        let exchange = async {
            match self.provider.respond(request.clone()).await {
                Ok(c) => Ok(c),
                Err(e) if e.is_transport() => {
                    warn!(error = %e, "provider transport failure, retrying once");
                    tokio::time::sleep(TRANSPORT_RETRY_BACKOFF).await;
                    self.provider.respond(request).await
                }
                Err(e) => Err(e),
            }
        };
        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamPhase::Aborted),
            done = tokio::time::timeout(deadline, exchange) => match done {
                Ok(Ok(c)) => c,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(AgentError::Stream("provider request timed out".into())),
            },
        };

        let text = completion.message.text();
        if !text.is_empty() {
            self.set_state(AgentState::Streaming, tx).await;
            let _ = tx.send(AgentEvent::TextDelta(text.clone())).await;
        }
        let mut reasoning = String::new();
        let mut calls = Vec::new();
        for block in &completion.message.blocks {
            match block {
                ModelBlock::Thinking { text } => reasoning.push_str(text),
                ModelBlock::ToolUse { call_id, name, input } => calls.push(RawCall {
                    id: call_id.clone(),
                    name: name.clone(),
                    args: input.to_string(),
                }),
                _ => {}
            }
        }
        Ok(StreamPhase::Completed(StreamedTurn {
            text,
            reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
            usage: TokenUsage {
                input_tokens: completion.usage.input_tokens,
                output_tokens: completion.usage.output_tokens,
            },
            stop: completion.stop_reason,
            calls,
        }))
    }

    /// Dispatch tool calls and persist results as they complete.
    ///
    /// All calls run concurrently only when every descriptor declares itself
    /// parallel-safe; otherwise they run one at a time in emission order.
    /// Results append in completion order; the call id pairs each to its
    /// cause.  On cancellation, calls never dispatched still receive a
    /// terminal cancelled result.
    #[allow(clippy::too_many_arguments)]
    async fn execute_calls(
        &self,
        thread_id: &ThreadId,
        calls: Vec<ToolCall>,
        approvals: &Arc<TurnApprovals>,
        ticket_tx: &mpsc::Sender<ApprovalTicket>,
        ticket_rx: &mut mpsc::Receiver<ApprovalTicket>,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let parallel = self
            .executor
            .registry()
            .all_parallel_safe(calls.iter().map(|c| c.name.as_str()));
        let ctx = ExecContext {
            thread_id: thread_id.to_string(),
            cancel: cancel.clone(),
            default_timeout: Duration::from_secs(self.config.per_tool_timeout_secs),
            approvals: Arc::clone(approvals),
            ticket_tx: Some(ticket_tx.clone()),
            delegate_depth: self.delegate_depth,
        };

        let mut queue: VecDeque<ToolCall> = calls.into();
        let mut running: FuturesUnordered<BoxFuture<'static, ExecutionRecord>> =
            FuturesUnordered::new();

        if parallel {
            while let Some(call) = queue.pop_front() {
                spawn_call(&self.executor, &ctx, call, &mut running);
            }
        } else if let Some(call) = queue.pop_front() {
            spawn_call(&self.executor, &ctx, call, &mut running);
        }

        while !running.is_empty() {
            tokio::select! {
                biased;
                Some(ticket) = ticket_rx.recv() => {
                    let _ = tx.send(AgentEvent::ApprovalRequested(ticket)).await;
                }
                Some(record) = running.next() => {
                    self.persist_record(thread_id, record, tx).await?;
                    if !parallel && !cancel.is_cancelled() {
                        if let Some(call) = queue.pop_front() {
                            spawn_call(&self.executor, &ctx, call, &mut running);
                        }
                    }
                }
            }
        }

        // Serial dispatch interrupted by cancellation: the remaining calls
        // were persisted as TOOL_CALLs and still need terminal results.
        while let Some(call) = queue.pop_front() {
            let record = ExecutionRecord {
                call_id: call.id,
                tool_name: call.name,
                outcome: ExecOutcome::Cancelled,
                content: vec![ToolOutputPart::Text("cancelled before dispatch".into())],
                duration: Duration::ZERO,
            };
            self.persist_record(thread_id, record, tx).await?;
        }

        Ok(())
    }

    async fn persist_record(
        &self,
        thread_id: &ThreadId,
        record: ExecutionRecord,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        let outcome = map_outcome(&record.outcome);
        let content: Vec<StoredBlock> = record.content.iter().map(part_to_block).collect();
        let text = record
            .content
            .iter()
            .filter_map(|p| match p {
                ToolOutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        self.threads.append_event(
            thread_id,
            EventPayload::ToolResult {
                call_id: record.call_id.clone(),
                outcome: outcome.clone(),
                content,
                duration_ms: record.duration.as_millis() as u64,
            },
        )?;
        debug!(call_id = %record.call_id, tool = %record.tool_name, ?outcome, "tool result persisted");
        let _ = tx
            .send(AgentEvent::ToolCallFinished {
                call_id: record.call_id,
                tool_name: record.tool_name,
                outcome,
                content: text,
            })
            .await;
        Ok(())
    }

    async fn compact_now(&self, tx: &mpsc::Sender<AgentEvent>) -> Result<(), AgentError> {
        let source = self.thread_id();
        let provider = self
            .compaction_provider
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.provider));
        let compactor = Compactor::new(provider);
        let successor = compactor
            .compact(&self.threads, &source, self.config.compaction_carry_tail_turns)
            .await?;

        *self.lock_std(&self.thread_id) = successor.clone();
        self.lock_std(&self.budget).reset();
        let _ = tx
            .send(AgentEvent::ContextCompacted { source, successor })
            .await;
        Ok(())
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.executor
            .registry()
            .schemas_for(&self.config.tools)
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                input_schema: s.input_schema,
            })
            .collect()
    }
}

fn spawn_call(
    executor: &Arc<ToolExecutor>,
    ctx: &ExecContext,
    call: ToolCall,
    running: &mut FuturesUnordered<BoxFuture<'static, ExecutionRecord>>,
) {
    let executor = Arc::clone(executor);
    let ctx = ctx.clone();
    let call_id = call.id.clone();
    let tool_name = call.name.clone();
    // Tasks are isolated so one panicking tool cannot take down the turn.
    let handle = tokio::spawn(async move { executor.execute(&call, &ctx).await });
    running.push(Box::pin(async move {
        match handle.await {
            Ok(record) => record,
            Err(e) => ExecutionRecord {
                call_id,
                tool_name,
                outcome: ExecOutcome::Error {
                    kind: ExecErrorKind::Runtime,
                    message: format!("tool task panicked: {e}"),
                },
                content: vec![ToolOutputPart::Text(format!("tool task panicked: {e}"))],
                duration: Duration::ZERO,
            },
        }
    }));
}

/// Turn accumulated raw calls into dispatchable calls.
///
/// Calls with an empty name cannot be dispatched and are dropped — storing
/// them would corrupt the conversation sent back to the provider.  An empty
/// id gets a synthetic fallback so the pairing invariant still holds.
fn finalize_calls(raw: Vec<RawCall>, iteration: u32) -> Vec<FinalCall> {
    let mut out = Vec::new();
    for (i, rc) in raw.into_iter().enumerate() {
        if rc.name.is_empty() {
            warn!(call_id = %rc.id, "dropping tool call with empty name");
            continue;
        }
        let id = if rc.id.is_empty() {
            warn!(tool = %rc.name, "tool call had empty id; generating one");
            format!("call_{iteration}_{i}")
        } else {
            rc.id
        };
        let (input, parse_error) = if rc.args.trim().is_empty() {
            (serde_json::json!({}), None)
        } else {
            match serde_json::from_str::<serde_json::Value>(&rc.args) {
                Ok(v) if v.is_object() => (v, None),
                Ok(v) => (
                    serde_json::json!({}),
                    Some(format!("tool call arguments must be an object, got: {v}")),
                ),
                Err(e) => (
                    serde_json::json!({}),
                    Some(format!("tool call arguments were not valid JSON: {e}")),
                ),
            }
        };
        out.push(FinalCall { call: ToolCall { id, name: rc.name, input }, parse_error });
    }
    out
}

fn map_outcome(outcome: &ExecOutcome) -> ToolOutcome {
    match outcome {
        ExecOutcome::Success => ToolOutcome::Success,
        ExecOutcome::Error { kind, message } => ToolOutcome::Error {
            kind: match kind {
                ExecErrorKind::UnknownTool => ToolErrorKind::UnknownTool,
                ExecErrorKind::BadInput => ToolErrorKind::BadInput,
                ExecErrorKind::Runtime => ToolErrorKind::Runtime,
            },
            message: message.clone(),
        },
        ExecOutcome::Denied => ToolOutcome::Denied,
        ExecOutcome::Timeout => ToolOutcome::Timeout,
        ExecOutcome::Cancelled => ToolOutcome::Cancelled,
    }
}

fn part_to_block(part: &ToolOutputPart) -> StoredBlock {
    match part {
        ToolOutputPart::Text(t) => StoredBlock::Text { text: t.clone() },
        ToolOutputPart::ImageRef(url) => StoredBlock::ImageRef { url: url.clone() },
        ToolOutputPart::Structured(data) => StoredBlock::Structured { data: data.clone() },
    }
}
