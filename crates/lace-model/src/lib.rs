// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
mod anthropic;
mod error;
mod mock;
mod openai;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::ProviderError;
pub use mock::ScriptedProvider;
pub use openai::OpenAiCompatProvider;
pub use provider::{collect_completion, EventStream, Provider, ProviderCaps};
pub use types::*;

use anyhow::bail;
use lace_config::ProviderConfig;

/// Construct a boxed [`Provider`] from configuration.
///
/// Selects the adapter by `cfg.provider`; the model name, endpoint, window
/// sizes, and temperature pass through opaquely.
pub fn from_config(cfg: &ProviderConfig) -> anyhow::Result<Box<dyn Provider>> {
    let key = resolve_api_key(cfg);
    match cfg.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            cfg.model.clone(),
            key,
            cfg.base_url.clone(),
            cfg.context_window,
            cfg.max_output_tokens,
            cfg.temperature,
        ))),
        "openai" => Ok(Box::new(OpenAiCompatProvider::new(
            cfg.model.clone(),
            key,
            cfg.base_url.clone(),
            cfg.context_window,
            cfg.max_output_tokens,
            cfg.temperature,
        ))),
        // Deterministic echo provider for offline runs.
        "mock" => Ok(Box::new(ScriptedProvider::always_text("mock reply"))),
        other => bail!("unknown provider: {other}"),
    }
}

/// Explicit key wins, then the configured env var, then the provider's
/// canonical env var.
fn resolve_api_key(cfg: &ProviderConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(var) = &cfg.api_key_env {
        if let Ok(k) = std::env::var(var) {
            return Some(k);
        }
    }
    let canonical = match cfg.provider.as_str() {
        "anthropic" => "ANTHROPIC_API_KEY",
        "openai" => "OPENAI_API_KEY",
        _ => return None,
    };
    std::env::var(canonical).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
