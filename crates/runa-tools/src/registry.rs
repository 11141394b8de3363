// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::tool::{ExecContext, Tool, ToolInvocation, ToolOutcome};

/// A tool schema – mirrors the model crate's schema shape but keeps this
/// crate independent from it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// How many failures a tool accumulates before error messages start
/// suggesting alternatives.
const CHRONIC_FAILURE_THRESHOLD: u32 = 3;

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Consecutive failures per tool name, for enhanced error guidance.
    failure_counts: Mutex<HashMap<String, u32>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Produce schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Registry view for sub-agent executions: tools that could fork agents
    /// or coordinate across them are removed.
    pub fn filtered_for_subagent(&self) -> Self {
        let tools: HashMap<String, Arc<dyn Tool>> = self
            .tools
            .iter()
            .filter(|(_, t)| t.subagent_safe())
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        Self {
            tools,
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Execute one call.  Unknown tools and tool failures come back as error
    /// outcomes (never as `Err`): the loop always has something to hand the
    /// model as a tool result.
    pub async fn execute(&self, call: &ToolInvocation, ctx: &ExecContext) -> ToolOutcome {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutcome::err(format!(
                "unknown tool: {}. Available tools: {}",
                call.name,
                self.names().join(", ")
            ));
        };
        let outcome = tool.execute(call, ctx).await;
        if outcome.success {
            self.failure_counts
                .lock()
                .expect("failure counts lock")
                .remove(&call.name);
            return outcome;
        }
        let failures = {
            let mut counts = self.failure_counts.lock().expect("failure counts lock");
            let n = counts.entry(call.name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        debug!(tool = %call.name, failures, "tool execution failed");
        self.enhance_error(tool.as_ref(), outcome, failures)
    }

    /// Restate the violated parameter constraints from the tool's schema and,
    /// for chronically failing tools, suggest concrete alternatives.
    fn enhance_error(&self, tool: &dyn Tool, outcome: ToolOutcome, failures: u32) -> ToolOutcome {
        let mut message = outcome.output.clone();

        if let Some(constraints) = schema_constraints(&tool.parameters_schema()) {
            message.push_str("\n\nParameter requirements for ");
            message.push_str(tool.name());
            message.push_str(":\n");
            message.push_str(&constraints);
        }

        if failures >= CHRONIC_FAILURE_THRESHOLD {
            message.push_str(&format!(
                "\n\nThis tool has failed {failures} times in a row. \
                 Consider a different approach: request a smaller line range, \
                 use a more specific pattern, or switch to another tool that \
                 covers the same operation."
            ));
        }

        ToolOutcome {
            output: message,
            ..outcome
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the required/typed parameters of a JSON schema as a short list.
fn schema_constraints(schema: &Value) -> Option<String> {
    let props = schema.get("properties")?.as_object()?;
    if props.is_empty() {
        return None;
    }
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut lines = Vec::with_capacity(props.len());
    for (name, spec) in props {
        let ty = spec.get("type").and_then(Value::as_str).unwrap_or("any");
        let req = if required.contains(&name.as_str()) {
            " (required)"
        } else {
            ""
        };
        let mut line = format!("- {name}: {ty}{req}");
        if let Some(allowed) = spec.get("enum").and_then(Value::as_array) {
            let values: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            line.push_str(&format!(", one of {}", values.join("/")));
        }
        lines.push(line);
    }
    Some(lines.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool::{ExecContext, Tool, ToolInvocation, ToolOutcome};

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolInvocation, _ctx: &ExecContext) -> ToolOutcome {
            ToolOutcome::ok(format!("echo:{}", call.args))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "mode": { "type": "string", "enum": ["read", "write"] }
                },
                "required": ["path"]
            })
        }
        async fn execute(&self, _call: &ToolInvocation, _ctx: &ExecContext) -> ToolOutcome {
            ToolOutcome::err("file not found")
        }
    }

    struct ForkTool;

    #[async_trait]
    impl Tool for ForkTool {
        fn name(&self) -> &str {
            "spawn_agent"
        }
        fn description(&self) -> &str {
            "spawns a sub-agent"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn subagent_safe(&self) -> bool {
            false
        }
        async fn execute(&self, _call: &ToolInvocation, _ctx: &ExecContext) -> ToolOutcome {
            ToolOutcome::ok("spawned")
        }
    }

    fn call(name: &str) -> ToolInvocation {
        ToolInvocation {
            id: "call_1".into(),
            name: name.into(),
            args: json!({}),
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "zeta" });
        reg.register(EchoTool { name: "alpha" });
        let names: Vec<String> = reg.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let out = reg.execute(&call("echo"), &ExecContext::default()).await;
        assert!(out.success);
        assert!(out.output.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error_outcome() {
        let reg = ToolRegistry::new();
        let out = reg.execute(&call("missing"), &ExecContext::default()).await;
        assert!(!out.success);
        assert!(out.output.contains("unknown tool"));
    }

    #[tokio::test]
    async fn failed_execution_restates_schema_constraints() {
        let mut reg = ToolRegistry::new();
        reg.register(FailingTool);
        let out = reg.execute(&call("flaky"), &ExecContext::default()).await;
        assert!(!out.success);
        assert!(out.output.contains("file not found"));
        assert!(out.output.contains("path: string (required)"));
        assert!(out.output.contains("one of"));
    }

    #[tokio::test]
    async fn chronic_failures_suggest_alternatives() {
        let mut reg = ToolRegistry::new();
        reg.register(FailingTool);
        let ctx = ExecContext::default();
        let mut last = None;
        for _ in 0..3 {
            last = Some(reg.execute(&call("flaky"), &ctx).await);
        }
        let out = last.unwrap();
        assert!(out.output.contains("failed 3 times"));
        assert!(out.output.contains("different approach"));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let mut reg = ToolRegistry::new();
        reg.register(FailingTool);
        reg.register(EchoTool { name: "flaky2" });
        let ctx = ExecContext::default();
        for _ in 0..2 {
            reg.execute(&call("flaky"), &ctx).await;
        }
        // A success on a different tool leaves flaky's count alone; a success
        // on the same name clears it.
        reg.execute(&call("flaky2"), &ctx).await;
        assert_eq!(
            *reg.failure_counts.lock().unwrap().get("flaky").unwrap(),
            2
        );
    }

    #[test]
    fn subagent_filter_removes_unsafe_tools() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        reg.register(ForkTool);
        let filtered = reg.filtered_for_subagent();
        assert!(filtered.get("echo").is_some());
        assert!(filtered.get("spawn_agent").is_none());
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }
}
