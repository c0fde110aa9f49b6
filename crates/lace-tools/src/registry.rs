// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use crate::tool::{Tool, ToolAnnotations};

/// A tool schema entry — mirrors the model crate's schema shape but keeps
/// this crate independent from it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Central registry holding all available tools.
///
/// Read-mostly: registration happens at startup, lookups for the rest of the
/// process lifetime.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a pre-shared tool instance (used by tools that carry shared
    /// service handles).
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn annotations(&self, name: &str) -> Option<ToolAnnotations> {
        self.tools.get(name).map(|t| t.annotations())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for all registered tools, name-sorted for a stable request
    /// shape across runs.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Schemas restricted to a whitelist.  An empty whitelist means every
    /// registered tool; unknown names are silently skipped.
    pub fn schemas_for(&self, whitelist: &[String]) -> Vec<ToolSchema> {
        if whitelist.is_empty() {
            return self.schemas();
        }
        let mut schemas: Vec<ToolSchema> = whitelist
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// True when every named tool declares itself safe for parallel dispatch.
    /// Unknown names count as unsafe so the caller falls back to serial
    /// execution and the per-call error surfaces in order.
    pub fn all_parallel_safe<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().all(|n| {
            self.tools
                .get(n)
                .map(|t| t.annotations().parallel_safe)
                .unwrap_or(false)
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::executor::ExecContext;
    use crate::tool::{ToolCall, ToolOutput};

    struct EchoTool {
        name: &'static str,
        parallel: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations { parallel_safe: self.parallel, ..Default::default() }
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ExecContext) -> ToolOutput {
            ToolOutput::ok(format!("echo:{}", call.input))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo", parallel: false });
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "b", parallel: false });
        reg.register(EchoTool { name: "a", parallel: false });
        assert_eq!(reg.names(), vec!["a", "b"]);
    }

    #[test]
    fn schemas_include_description() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t", parallel: false });
        let schemas = reg.schemas();
        assert_eq!(schemas[0].description, "echoes its input");
    }

    #[test]
    fn schemas_for_empty_whitelist_returns_all() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a", parallel: false });
        reg.register(EchoTool { name: "b", parallel: false });
        assert_eq!(reg.schemas_for(&[]).len(), 2);
    }

    #[test]
    fn schemas_for_whitelist_filters_and_skips_unknown() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a", parallel: false });
        reg.register(EchoTool { name: "b", parallel: false });
        let got = reg.schemas_for(&["b".to_string(), "ghost".to_string()]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "b");
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t", parallel: false });
        reg.register(EchoTool { name: "t", parallel: true });
        assert_eq!(reg.names().len(), 1);
        assert!(reg.annotations("t").unwrap().parallel_safe);
    }

    #[test]
    fn all_parallel_safe_requires_every_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "p", parallel: true });
        reg.register(EchoTool { name: "s", parallel: false });
        assert!(reg.all_parallel_safe(["p"]));
        assert!(!reg.all_parallel_safe(["p", "s"]));
        assert!(!reg.all_parallel_safe(["p", "ghost"]));
    }
}
