use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Importance rank at or above which a message is pinned through trimming.
/// The first user message of a conversation always carries this rank.
pub const PINNED_IMPORTANCE: i32 = 10;

/// A single message in the conversation history.
///
/// This is the flat OpenAI-compatible shape: an assistant message may carry
/// `tool_calls`; a tool message must carry `tool_call_id`.  `importance` is
/// internal trimming metadata and is stripped from outgoing payloads by the
/// builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(
        rename = "_importance",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub importance: Option<i32>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            importance: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            importance: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            importance: None,
        }
    }

    /// An assistant turn requesting one or more tool invocations.
    /// `content` may be empty; that is valid and forwarded as-is.
    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls,
            tool_call_id: None,
            importance: None,
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(id.into()),
            importance: None,
        }
    }

    pub fn with_importance(mut self, rank: i32) -> Self {
        self.importance = Some(rank);
        self
    }

    /// Character count used by the token estimator.  Tool calls contribute
    /// their function name and argument string; ids are negligible and skipped.
    pub fn char_len(&self) -> usize {
        let call_chars: usize = self
            .tool_calls
            .iter()
            .map(|c| c.function.name.len() + c.function.arguments.len())
            .sum();
        self.content.len() + call_chars
    }
}

// ─── Tool call types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

/// Generate a client-side tool-call id in the provider's `call_<24 hex>` form.
pub fn generate_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..24])
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Request / response types ─────────────────────────────────────────────────

/// Request sent to a chat provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
    /// How many tool-call rounds have already run for the current user input.
    /// Controls the Copilot `X-Initiator` header (≤ 1 → "user", else "agent")
    /// and whether stateful markers from the response are stored.
    pub tool_call_iteration: u32,
    /// Session identifier forwarded as `copilot_thread_id` on the Copilot family.
    pub session_id: Option<String>,
    /// Billing-continuity marker (or legacy prior response id) to replay.
    pub previous_response_id: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// A single streamed event from the gateway.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// One fragment of an incrementally-assembled tool call.  `index` keys
    /// the accumulator; `id`/`name`/`arguments` may each be empty on any
    /// given fragment.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// A reasoning delta surfaced by providers that expose one
    ThinkingDelta(String),
    /// Billing-continuity marker found on a chunk or the final message
    StatefulMarker(String),
    /// Response id usable as the legacy prior-response fallback
    ResponseId(String),
    /// Rate-limit header snapshot captured from the HTTP response
    RateLimit(crate::rate::RateLimitSnapshot),
    /// Premium-quota snapshot decoded from provider headers
    Quota(crate::rate::QuotaSnapshot),
    /// Final usage statistics (non-streaming responses only)
    Usage(Usage),
    /// `choices[0].finish_reason` when the provider reports one
    FinishReason(String),
    /// The stream finished normally
    Done,
}

/// Token usage from one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
