use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Declared shape of a tool the reasoning session may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique name, e.g. "memory_recall", "send_document".
    pub name: String,
    /// Human-readable description included in the session prompt.
    pub description: String,
    /// JSON Schema of the arguments object (type/properties/required subset).
    pub parameters: Value,
    /// Denied to non-privileged origins even when allow-listed.
    #[serde(default)]
    pub privileged_only: bool,
    /// Whether results must be fed back to the session in a follow-up hop.
    #[serde(default)]
    pub needs_feedback: bool,
}

/// Outcome of the security check for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Authorization {
    Allow,
    Deny { reason: String },
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// One action-plan item on its way through authorization and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: Uuid,
    pub tool_name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            arguments,
            authorization: None,
        }
    }
}

/// Category of a structured tool error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Permission,
    NotFound,
    InvalidArguments,
    Execution,
    Timeout,
}

/// Result or structured error scoped to one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub invocation_id: Uuid,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    /// Optional structured data returned alongside the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Whether the session should see this result in a follow-up hop.
    #[serde(default)]
    pub needs_feedback: bool,
}

impl ToolOutcome {
    pub fn success(invocation: &ToolInvocation, content: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation.id,
            tool_name: invocation.tool_name.clone(),
            content: content.into(),
            is_error: false,
            error_kind: None,
            data: None,
            needs_feedback: false,
        }
    }

    pub fn error(
        invocation: &ToolInvocation,
        kind: ToolErrorKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation.id,
            tool_name: invocation.tool_name.clone(),
            content: content.into(),
            is_error: true,
            error_kind: Some(kind),
            data: None,
            needs_feedback: false,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_feedback(mut self, needs_feedback: bool) -> Self {
        self.needs_feedback = needs_feedback;
        self
    }
}
