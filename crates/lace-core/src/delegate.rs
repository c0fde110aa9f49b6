// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use lace_config::AgentConfig;
use lace_model::Provider;
use lace_store::{ThreadId, ThreadManager};
use lace_tools::{ExecContext, Tool, ToolAnnotations, ToolCall, ToolExecutor, ToolOutput};

use crate::agent::Agent;
use crate::error::AgentError;
use crate::events::AgentEvent;

/// Caller-selected narrowing for a delegate child.
#[derive(Default)]
pub struct DelegateConstraints {
    /// Tool whitelist for the child; `None` inherits the parent's set.
    pub tools: Option<Vec<String>>,
    /// System prompt for the child thread.
    pub system_prompt: Option<String>,
    pub max_tool_iterations: Option<u32>,
    /// Alternate (typically cheaper) provider for the child.
    pub provider: Option<Arc<dyn Provider>>,
}

/// Drive a child agent on a new child thread to completion and return the
/// final assistant text as the summary.
///
/// `depth` is the child's position in the delegation chain (the caller's
/// depth plus one); it flows into the child's tool contexts so nesting is
/// bounded per chain rather than process-wide.
///
/// The child shares the parent's stores and executor; it never receives a
/// reference back to the parent agent.  The child thread stays queryable
/// through its own id and the parent link afterwards.
pub async fn run_delegate(
    threads: &Arc<ThreadManager>,
    provider: Arc<dyn Provider>,
    executor: Arc<ToolExecutor>,
    config: &AgentConfig,
    parent: &ThreadId,
    depth: usize,
    task: &str,
    constraints: DelegateConstraints,
) -> Result<String, AgentError> {
    let child = threads.create_child(parent)?;
    debug!(parent = %parent, child = %child.id, depth, "delegating sub-task");

    let mut child_config = config.clone();
    if let Some(tools) = constraints.tools {
        child_config.tools = tools;
    }
    if let Some(prompt) = constraints.system_prompt {
        child_config.system_prompt = prompt;
    }
    if let Some(n) = constraints.max_tool_iterations {
        child_config.max_tool_iterations = n;
    }
    let provider = constraints.provider.unwrap_or(provider);

    let agent = Agent::on_thread(
        Arc::clone(threads),
        provider,
        executor,
        Arc::new(child_config),
        child.id,
    )?
    .with_delegate_depth(depth);

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    // Drain concurrently so a chatty child can never fill the channel and
    // stall its own turn.
    let collector = tokio::spawn(async move {
        let mut summary = String::new();
        while let Some(event) = rx.recv().await {
            if let AgentEvent::ResponseComplete(text) = event {
                summary = text;
            }
        }
        summary
    });

    let driven = agent.send_message(task, tx).await;
    let summary = collector.await.unwrap_or_default();
    driven?;
    Ok(summary)
}

/// Built-in tool that exposes delegation to the model.
///
/// Registered into the same registry the executor serves, so the executor
/// reference is bound after construction (and held weakly to avoid a
/// reference cycle through the registry).
pub struct DelegateTool {
    threads: Arc<ThreadManager>,
    provider: Arc<dyn Provider>,
    config: Arc<AgentConfig>,
    executor: OnceLock<Weak<ToolExecutor>>,
}

impl DelegateTool {
    pub fn new(
        threads: Arc<ThreadManager>,
        provider: Arc<dyn Provider>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            threads,
            provider,
            config,
            executor: OnceLock::new(),
        }
    }

    /// Must be called once after the executor wrapping this tool's registry
    /// exists.  Calls before binding fail cleanly at execution time.
    pub fn bind_executor(&self, executor: &Arc<ToolExecutor>) {
        let _ = self.executor.set(Arc::downgrade(executor));
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Spawn a constrained child agent on a separate thread to complete a focused \
         sub-task, and return its final summary. The child may be limited to a subset \
         of tools. Nesting depth is bounded."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task description for the child agent"
                },
                "tools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tool whitelist for the child (default: parent's tools)"
                },
                "system_prompt": {
                    "type": "string",
                    "description": "System prompt for the child thread"
                },
                "max_tool_iterations": {
                    "type": "integer",
                    "description": "Iteration budget for the child (default: from config)"
                }
            },
            "required": ["task"]
        })
    }

    fn annotations(&self) -> ToolAnnotations {
        // Serial on purpose: concurrent delegations compete for the same
        // provider budget and make event ordering hard to follow.
        ToolAnnotations::default()
    }

    async fn execute(&self, call: &ToolCall, ctx: &ExecContext) -> ToolOutput {
        let Some(task) = call.input.get("task").and_then(Value::as_str) else {
            return ToolOutput::err("missing 'task'");
        };

        // The depth of the agent making this call travels in the context, so
        // the bound applies to this delegation chain only.
        if ctx.delegate_depth >= self.config.max_delegate_depth {
            return ToolOutput::err(format!(
                "maximum delegation depth ({}) reached",
                self.config.max_delegate_depth
            ));
        }

        let Some(executor) = self.executor.get().and_then(Weak::upgrade) else {
            return ToolOutput::err("delegate tool is not bound to an executor");
        };

        let constraints = DelegateConstraints {
            tools: call.input.get("tools").and_then(Value::as_array).map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }),
            system_prompt: call
                .input
                .get("system_prompt")
                .and_then(Value::as_str)
                .map(str::to_string),
            max_tool_iterations: call
                .input
                .get("max_tool_iterations")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
            provider: None,
        };

        let result = run_delegate(
            &self.threads,
            Arc::clone(&self.provider),
            executor,
            &self.config,
            &ThreadId::from(ctx.thread_id.as_str()),
            ctx.delegate_depth + 1,
            task,
            constraints,
        )
        .await;

        match result {
            Ok(summary) if summary.is_empty() => {
                ToolOutput::ok("(child agent produced no text output)")
            }
            Ok(summary) => ToolOutput::ok(summary),
            Err(e) => ToolOutput::err(format!("child agent error: {e}")),
        }
    }
}
