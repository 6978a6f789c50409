//! Conversation identity and per-invocation scope.

use crate::error::ToolError;
use crate::notes::{GroupId, NotesStore};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

const KEY_PREFIX: &str = "ppclaw";

/// Identifies an independent conversation thread for the agent.
///
/// Keys are built from escaped segments (`%` → `%25`, `:` → `%3A`) so two
/// different routing tuples can never produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionKey(String);

fn segment(raw: &str) -> Cow<'_, str> {
    if raw.contains(['%', ':']) {
        Cow::Owned(raw.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(raw)
    }
}

impl SessionKey {
    /// Direct chat with one user.
    #[must_use]
    pub fn direct(sender_id: Option<&str>) -> Self {
        match sender_id {
            Some(id) => Self(format!("{KEY_PREFIX}:dm:{}", segment(id))),
            None => Self(format!("{KEY_PREFIX}:dm")),
        }
    }

    /// Shared conversation of one group.
    #[must_use]
    pub fn group(group_id: &str) -> Self {
        Self(format!("{KEY_PREFIX}:group:{}", segment(group_id)))
    }

    /// Agent-to-agent exchange, scoped to a task when one is given.
    #[must_use]
    pub fn bot(from_agent_id: &str, task_id: Option<&str>) -> Self {
        match task_id {
            Some(task) => Self(format!(
                "{KEY_PREFIX}:bot:{}:task:{}",
                segment(from_agent_id),
                segment(task)
            )),
            None => Self(format!("{KEY_PREFIX}:bot:{}", segment(from_agent_id))),
        }
    }

    /// String form handed to the agent.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing attributes attached to an agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "chatType", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionMetadata {
    /// One-to-one chat with a user.
    Direct {
        /// Sending user's id.
        sender_id: Option<String>,
        /// Sending user's display name.
        sender_name: Option<String>,
    },
    /// Group chat.
    Group {
        /// Group identifier as received.
        group_id: String,
        /// Group display name.
        group_name: Option<String>,
        /// Sender id.
        sender_id: Option<String>,
        /// Sender kind (user or agent).
        sender_type: Option<String>,
        /// Sender display name.
        sender_name: Option<String>,
        /// Whether this agent was mentioned.
        is_mentioned: bool,
        /// Group owner descriptor.
        group_owner: Option<Value>,
        /// Other agents in the group.
        group_agents: Vec<Value>,
        /// Notes stored for the group, empty when none.
        group_notes: String,
    },
    /// Agent-to-agent exchange.
    Bot {
        /// Sending agent's id.
        from_agent_id: String,
        /// Sending agent's display name.
        from_agent_name: Option<String>,
        /// Task the exchange belongs to.
        task_id: Option<String>,
    },
}

/// Scope of a single agent invocation.
///
/// Created by the router for one inbound message and dropped when that
/// message is done, so the group scope can never leak into another
/// invocation. Tools triggered during the call receive it by reference.
pub struct InvocationContext {
    group: Option<GroupId>,
    notes: Arc<dyn NotesStore>,
}

impl InvocationContext {
    /// Context with no group in scope.
    pub fn unscoped(notes: Arc<dyn NotesStore>) -> Self {
        Self { group: None, notes }
    }

    /// Context serving a message of `group`.
    pub fn for_group(group: GroupId, notes: Arc<dyn NotesStore>) -> Self {
        Self {
            group: Some(group),
            notes,
        }
    }

    /// Group currently being served, if any.
    #[must_use]
    pub fn group(&self) -> Option<&GroupId> {
        self.group.as_ref()
    }

    /// Read the notes of the group in scope.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NoGroupScope`] outside a group message.
    pub fn read_group_notes(&self) -> Result<String, ToolError> {
        let group = self.group.as_ref().ok_or(ToolError::NoGroupScope)?;
        Ok(self.notes.read(group)?)
    }

    /// Replace the notes of the group in scope.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NoGroupScope`] outside a group message, or the
    /// store's validation / I/O error.
    pub fn write_group_notes(&self, content: &str) -> Result<(), ToolError> {
        let group = self.group.as_ref().ok_or(ToolError::NoGroupScope)?;
        Ok(self.notes.write(group, content)?)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}
