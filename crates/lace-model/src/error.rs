// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: Apache-2.0

/// Failures raised by provider adapters.
///
/// Transport failures are the only retryable kind; semantic failures mean the
/// provider answered but the payload cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Semantic(String),

    #[error("missing API key for provider {0}")]
    MissingApiKey(String),
}

impl ProviderError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}
