// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Serde default helpers.
///
/// `#[serde(default)]` on a numeric field always falls back to the type's
/// zero value, so named functions are required for non-zero defaults.
fn default_warn_pct() -> f32 {
    0.80
}
fn default_compact_pct() -> f32 {
    0.90
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_turn_timeout_secs() -> u64 {
    300
}
fn default_max_tool_iterations() -> u32 {
    10
}
fn default_carry_tail_turns() -> usize {
    2
}
fn default_delegate_depth() -> usize {
    3
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub approvals: ApprovalConfig,
    /// Named provider configurations.
    ///
    /// Define custom endpoints or additional accounts here and select one by
    /// name through `provider_selector` at agent construction.
    ///
    /// ```yaml
    /// providers:
    ///   cheap_delegate:
    ///     provider: openai
    ///     model: gpt-4o-mini
    ///   work_anthropic:
    ///     provider: anthropic
    ///     api_key_env: WORK_ANTHROPIC_KEY
    ///     model: claude-sonnet-4-5
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ProviderConfig>,
}

impl Config {
    /// Resolve a provider configuration by selector name.
    ///
    /// An empty selector returns the default `provider` section; anything
    /// else must name an entry in `providers`.
    pub fn select_provider(&self, selector: &str) -> Option<&ProviderConfig> {
        if selector.is_empty() {
            Some(&self.provider)
        } else {
            self.providers.get(selector)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier: "anthropic" | "openai" | "mock"
    pub provider: String,
    /// Model name forwarded opaquely to the provider API
    pub model: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or gateways.
    pub base_url: Option<String>,
    /// Context window size in tokens.  Overrides the adapter default.
    pub context_window: Option<u32>,
    /// Maximum tokens to request in a single completion
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            context_window: None,
            max_output_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System prompt installed at thread creation.  Empty string disables the
    /// SYSTEM_PROMPT event.
    #[serde(default)]
    pub system_prompt: String,
    /// Tool names this agent may use.  Empty list means every registered tool.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Fraction of the context window at which a warn threshold event fires.
    #[serde(default = "default_warn_pct")]
    pub context_warn_pct: f32,
    /// Fraction of the context window at which compaction is scheduled.
    #[serde(default = "default_compact_pct")]
    pub context_compact_pct: f32,
    /// Default timeout for a single tool invocation.  A tool descriptor may
    /// override this with its own value.
    #[serde(default = "default_tool_timeout_secs")]
    pub per_tool_timeout_secs: u64,
    /// Timeout for one provider request (connect + full stream).
    #[serde(default = "default_turn_timeout_secs")]
    pub per_turn_timeout_secs: u64,
    /// Upper bound on the tool-call loop within one turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// How many trailing conversation turns survive compaction verbatim.
    #[serde(default = "default_carry_tail_turns")]
    pub compaction_carry_tail_turns: usize,
    /// Maximum delegation nesting depth.
    #[serde(default = "default_delegate_depth")]
    pub max_delegate_depth: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            tools: Vec::new(),
            context_warn_pct: default_warn_pct(),
            context_compact_pct: default_compact_pct(),
            per_tool_timeout_secs: default_tool_timeout_secs(),
            per_turn_timeout_secs: default_turn_timeout_secs(),
            max_tool_iterations: default_max_tool_iterations(),
            compaction_carry_tail_turns: default_carry_tail_turns(),
            max_delegate_depth: default_delegate_depth(),
        }
    }
}

/// What to do with a destructive tool that is on neither static list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestructiveDefault {
    Ask,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Glob patterns of tool names that always run without asking.
    #[serde(default)]
    pub auto_allow: Vec<String>,
    /// Glob patterns of tool names that are always refused.
    /// Deny wins over allow when both match.
    #[serde(default)]
    pub auto_deny: Vec<String>,
    /// Decision for destructive tools not covered by the lists above.
    #[serde(default = "default_destructive")]
    pub default_for_destructive: DestructiveDefault,
}

fn default_destructive() -> DestructiveDefault {
    DestructiveDefault::Ask
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_allow: Vec::new(),
            auto_deny: Vec::new(),
            default_for_destructive: DestructiveDefault::Ask,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
