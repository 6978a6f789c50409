//! JSON frames exchanged with a relay over the agent WebSocket.
//!
//! Every frame is a text message carrying a JSON object whose `type` field
//! selects the variant. Inbound frames flow relay → agent, outbound frames
//! agent → relay.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while decoding or encoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The payload is not valid JSON or does not match any known frame.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A one-to-one message from a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    /// Relay-assigned message id, echoed in `ack` and `reply`.
    pub id: String,
    /// Message text.
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Opaque attachment descriptors.
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Value>,
    /// Sending user's id.
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Sending user's display name.
    #[serde(default)]
    pub sender_name: Option<String>,
}

/// A message posted in a group the agent belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    /// Relay-assigned message id.
    pub id: String,
    /// Group identifier (UUID).
    pub group_id: String,
    /// Group display name.
    #[serde(default)]
    pub group_name: Option<String>,
    /// Message text.
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Opaque attachment descriptors.
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Value>,
    /// Sender id (user or agent).
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Whether the sender is a user or an agent.
    #[serde(default)]
    pub sender_type: Option<String>,
    /// Sender display name.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Whether this agent was mentioned.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_mentioned: bool,
    /// Group owner descriptor, passed through untouched.
    #[serde(default)]
    pub group_owner: Option<Value>,
    /// Other agents in the group, passed through untouched.
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_agents: Vec<Value>,
}

/// An agent-to-agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDm {
    /// Relay-assigned message id.
    pub id: String,
    /// Message text.
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Id of the agent that sent the message.
    pub from_agent_id: String,
    /// Display name of the sending agent.
    #[serde(default)]
    pub from_agent_name: Option<String>,
    /// Task this exchange belongs to, if any.
    #[serde(default)]
    pub task_id: Option<String>,
}

/// A frame received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Application-level keepalive; answered with `pong`.
    Ping,
    /// The user asked for a fresh conversation.
    NewSession,
    /// Direct message from a user.
    Message(DirectMessage),
    /// Group message.
    GroupMessage(GroupMessage),
    /// Agent-to-agent message.
    BotDm(BotDm),
}

impl InboundFrame {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] for invalid JSON, an unknown `type`, or
    /// a missing required field.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of the frame type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::NewSession => "new_session",
            Self::Message(_) => "message",
            Self::GroupMessage(_) => "group_message",
            Self::BotDm(_) => "bot_dm",
        }
    }
}

/// A frame sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundFrame {
    /// Answer to an inbound `ping`.
    Pong,
    /// Receipt acknowledgment for a user-facing message.
    Ack {
        /// Id of the acknowledged message.
        id: String,
    },
    /// Answer to a direct message.
    Reply {
        /// Id of the message being answered.
        reply_to: String,
        /// Reply text.
        content: String,
        /// Attachments produced by the agent; omitted on failure replies.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Vec<Value>>,
    },
    /// Answer to a group message.
    GroupReply {
        /// Id of the message being answered.
        reply_to: String,
        /// Group the reply is posted to.
        group_id: String,
        /// Reply text.
        content: String,
        /// Attachments produced by the agent; omitted on failure replies.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Vec<Value>>,
    },
    /// Answer to an agent-to-agent message.
    BotDmReply {
        /// Id of the message being answered.
        reply_to: String,
        /// Agent the reply is addressed to.
        target_agent_id: String,
        /// Task the exchange belongs to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        /// Reply text.
        content: String,
    },
}

impl OutboundFrame {
    /// Encode the frame as a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the frame type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pong => "pong",
            Self::Ack { .. } => "ack",
            Self::Reply { .. } => "reply",
            Self::GroupReply { .. } => "group_reply",
            Self::BotDmReply { .. } => "bot_dm_reply",
        }
    }
}
