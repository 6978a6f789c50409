//! Tools the agent may call while handling a message.
//!
//! Notes tools act on the group held by the [`InvocationContext`], never on
//! a group named in the call arguments.

use crate::error::ToolError;
use crate::session::InvocationContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Replace the notes of the current group.
pub const UPDATE_GROUP_NOTES: &str = "update_group_notes";
/// Read the notes of the current group.
pub const READ_GROUP_NOTES: &str = "read_group_notes";

/// A tool call requested by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id assigned by the agent, echoed back with the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name.
    pub name: String,
    /// JSON arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Structured result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    /// Whether the call succeeded.
    pub ok: bool,
    /// Returned text, for reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    fn done(content: Option<String>) -> Self {
        Self {
            ok: true,
            content,
            error: None,
        }
    }

    fn failed(err: &ToolError) -> Self {
        Self {
            ok: false,
            content: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct UpdateNotesArgs {
    content: String,
    #[serde(default, rename = "groupId")]
    group_id: Option<String>,
}

/// JSON schema of the tools, advertised to the agent with every request.
#[must_use]
pub fn definitions() -> Value {
    json!([
        {
            "name": UPDATE_GROUP_NOTES,
            "description": "Replace the shared notes of the group this message came from (max 100 KiB).",
            "parameters": {
                "type": "object",
                "properties": { "content": { "type": "string" } },
                "required": ["content"]
            }
        },
        {
            "name": READ_GROUP_NOTES,
            "description": "Read the shared notes of the group this message came from.",
            "parameters": { "type": "object", "properties": {} }
        }
    ])
}

/// Run one tool call inside `ctx`. Failures are reported in the outcome.
#[must_use]
pub fn dispatch(ctx: &InvocationContext, call: &ToolCall) -> ToolOutcome {
    let result = match call.name.as_str() {
        UPDATE_GROUP_NOTES => update_notes(ctx, &call.arguments).map(|()| None),
        READ_GROUP_NOTES => ctx.read_group_notes().map(Some),
        other => Err(ToolError::UnknownTool(other.to_string())),
    };
    match result {
        Ok(content) => {
            debug!(tool = %call.name, "tool call succeeded");
            ToolOutcome::done(content)
        }
        Err(e) => {
            warn!(tool = %call.name, error = %e, "tool call failed");
            ToolOutcome::failed(&e)
        }
    }
}

fn update_notes(ctx: &InvocationContext, arguments: &Value) -> Result<(), ToolError> {
    let args: UpdateNotesArgs = serde_json::from_value(arguments.clone())
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
    if let (Some(requested), Some(current)) = (&args.group_id, ctx.group()) {
        if !requested.eq_ignore_ascii_case(current.as_str()) {
            warn!(requested = %requested, current = %current, "ignoring groupId argument, writing to current group");
        }
    }
    ctx.write_group_notes(&args.content)
}
