// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Opaque identifier assigned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Per-turn execution context handed to every tool.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    /// Undo snapshot id for the current turn.  File-mutating tools deposit
    /// pre-images under this id so the turn can be rolled back.
    pub turn_snapshot_id: Option<String>,
}

/// The result of executing a tool.
///
/// `output` is what the model sees; the remaining fields feed the UI layer.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub action_description: Option<String>,
    pub expanded_content: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            action_description: None,
            expanded_content: None,
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            output: message.clone(),
            action_description: None,
            expanded_content: None,
            success: false,
            error: Some(message),
        }
    }

    pub fn with_action(mut self, description: impl Into<String>) -> Self {
        self.action_description = Some(description.into());
        self
    }
}

/// Static execution hints declared by a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolFlags {
    /// The tool interacts with the user (prompts, confirmation).
    pub is_interactive: bool,
    /// Must finish before anything else in the turn runs.
    pub requires_blocking: bool,
    /// Must not run concurrently with other serial tools.
    pub requires_serial: bool,
}

/// Execution bucket for one tool call within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Blocking,
    Serial,
    Parallel,
    /// User-collaboration tools run last so the user sees every other
    /// result before being asked anything.
    Collaboration,
}

/// Trait that every tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Execution hints; the default is a plain parallel-safe tool.
    fn flags(&self) -> ToolFlags {
        ToolFlags::default()
    }
    /// Whether this tool asks the user for input mid-turn.
    fn is_collaboration(&self) -> bool {
        false
    }
    /// Whether sub-agent contexts may use this tool.  Tools that spawn
    /// agents or coordinate across them must return false.
    fn subagent_safe(&self) -> bool {
        true
    }
    /// Execute the tool.  Failures are reported via [`ToolOutcome::err`].
    async fn execute(&self, call: &ToolInvocation, ctx: &ExecContext) -> ToolOutcome;
}

/// Classify one call into its execution bucket.
///
/// An `isInteractive` argument overrides the tool's declared default;
/// blocking beats serial beats parallel; collaboration tools form their own
/// bucket regardless of flags.
pub fn classify_call(tool: &dyn Tool, args: &Value) -> ExecutionMode {
    if tool.is_collaboration() {
        return ExecutionMode::Collaboration;
    }
    let flags = tool.flags();
    let interactive = args
        .get("isInteractive")
        .and_then(Value::as_bool)
        .unwrap_or(flags.is_interactive);
    if flags.requires_blocking || interactive {
        ExecutionMode::Blocking
    } else if flags.requires_serial {
        ExecutionMode::Serial
    } else {
        ExecutionMode::Parallel
    }
}

/// Order call indices for execution: blocking → serial → parallel →
/// collaboration.  Within each bucket the model's emission order is kept, and
/// results are still appended to the transcript in emission order regardless.
pub fn order_calls(modes: &[ExecutionMode]) -> Vec<usize> {
    let mut ordered = Vec::with_capacity(modes.len());
    for wanted in [
        ExecutionMode::Blocking,
        ExecutionMode::Serial,
        ExecutionMode::Parallel,
        ExecutionMode::Collaboration,
    ] {
        for (i, mode) in modes.iter().enumerate() {
            if *mode == wanted {
                ordered.push(i);
            }
        }
    }
    ordered
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FlaggedTool {
        flags: ToolFlags,
        collaboration: bool,
    }

    #[async_trait]
    impl Tool for FlaggedTool {
        fn name(&self) -> &str {
            "flagged"
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn flags(&self) -> ToolFlags {
            self.flags
        }
        fn is_collaboration(&self) -> bool {
            self.collaboration
        }
        async fn execute(&self, _call: &ToolInvocation, _ctx: &ExecContext) -> ToolOutcome {
            ToolOutcome::ok("ok")
        }
    }

    fn plain() -> FlaggedTool {
        FlaggedTool {
            flags: ToolFlags::default(),
            collaboration: false,
        }
    }

    #[test]
    fn default_classification_is_parallel() {
        assert_eq!(classify_call(&plain(), &json!({})), ExecutionMode::Parallel);
    }

    #[test]
    fn requires_blocking_wins() {
        let t = FlaggedTool {
            flags: ToolFlags {
                requires_blocking: true,
                requires_serial: true,
                ..Default::default()
            },
            collaboration: false,
        };
        assert_eq!(classify_call(&t, &json!({})), ExecutionMode::Blocking);
    }

    #[test]
    fn requires_serial_classifies_serial() {
        let t = FlaggedTool {
            flags: ToolFlags {
                requires_serial: true,
                ..Default::default()
            },
            collaboration: false,
        };
        assert_eq!(classify_call(&t, &json!({})), ExecutionMode::Serial);
    }

    #[test]
    fn interactive_default_makes_blocking() {
        let t = FlaggedTool {
            flags: ToolFlags {
                is_interactive: true,
                ..Default::default()
            },
            collaboration: false,
        };
        assert_eq!(classify_call(&t, &json!({})), ExecutionMode::Blocking);
    }

    #[test]
    fn is_interactive_argument_overrides_default() {
        // Tool defaults to interactive, but the call opts out.
        let t = FlaggedTool {
            flags: ToolFlags {
                is_interactive: true,
                ..Default::default()
            },
            collaboration: false,
        };
        assert_eq!(
            classify_call(&t, &json!({ "isInteractive": false })),
            ExecutionMode::Parallel
        );
        // And the inverse: a plain tool forced interactive.
        assert_eq!(
            classify_call(&plain(), &json!({ "isInteractive": true })),
            ExecutionMode::Blocking
        );
    }

    #[test]
    fn collaboration_overrides_everything() {
        let t = FlaggedTool {
            flags: ToolFlags {
                requires_blocking: true,
                ..Default::default()
            },
            collaboration: true,
        };
        assert_eq!(classify_call(&t, &json!({})), ExecutionMode::Collaboration);
    }

    #[test]
    fn order_puts_collaboration_last() {
        use ExecutionMode::*;
        let modes = vec![Collaboration, Parallel, Blocking, Serial];
        assert_eq!(order_calls(&modes), vec![2, 3, 1, 0]);
    }

    #[test]
    fn order_preserves_emission_order_within_buckets() {
        use ExecutionMode::*;
        let modes = vec![Parallel, Blocking, Parallel, Blocking];
        assert_eq!(order_calls(&modes), vec![1, 3, 0, 2]);
    }

    #[test]
    fn order_of_uniform_bucket_is_identity() {
        use ExecutionMode::*;
        let modes = vec![Parallel, Parallel, Parallel];
        assert_eq!(order_calls(&modes), vec![0, 1, 2]);
    }

    #[test]
    fn outcome_err_mirrors_message_into_output() {
        let o = ToolOutcome::err("boom");
        assert!(!o.success);
        assert_eq!(o.output, "boom");
        assert_eq!(o.error.as_deref(), Some("boom"));
    }
}
