//! Agent collaborator: the component that turns messages into replies.
//!
//! [`HttpAgent`] is the daemon's implementation. It forwards each request to
//! a local agent gateway over HTTP and runs the tool calls it returns.

use crate::config::AgentConfig;
use crate::error::{ConfigurationError, ProcessingError};
use crate::session::{InvocationContext, SessionKey, SessionMetadata};
use crate::tools::{self, ToolCall};
use async_trait::async_trait;
use ppclaw_common::types::CHANNEL_ID;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// One message handed to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Conversation the message belongs to.
    pub session_key: SessionKey,
    /// Channel the message arrived on.
    pub channel_id: &'static str,
    /// Relay message id.
    pub message_id: String,
    /// Message text.
    pub content: String,
    /// Attachment descriptors.
    pub attachments: Vec<Value>,
    /// Routing attributes.
    pub metadata: SessionMetadata,
}

impl AgentRequest {
    /// Builds a request on the ppclaw channel.
    #[must_use]
    pub fn new(
        session_key: SessionKey,
        message_id: String,
        content: String,
        attachments: Vec<Value>,
        metadata: SessionMetadata,
    ) -> Self {
        Self {
            session_key,
            channel_id: CHANNEL_ID,
            message_id,
            content,
            attachments,
            metadata,
        }
    }
}

/// The agent's answer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentReply {
    /// Reply text.
    pub content: String,
    /// Attachment descriptors.
    #[serde(default)]
    pub attachments: Vec<Value>,
}

/// Message-processing collaborator.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a reply for `request`. Tools run inside `ctx`.
    async fn process_message(
        &self,
        request: AgentRequest,
        ctx: &InvocationContext,
    ) -> Result<AgentReply, ProcessingError>;

    /// Drop the current conversation state.
    async fn reset_conversation(&self) -> Result<(), ProcessingError>;
}

#[derive(Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<Value>,
    #[serde(default, rename = "toolCalls")]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    error: Option<String>,
}

/// Upper bound on tool round trips for one message.
const MAX_TOOL_ROUNDS: usize = 8;

/// [`Agent`] backed by an HTTP agent gateway.
///
/// Requests are POSTed as JSON with bearer auth. The gateway answers
/// `{content, attachments, toolCalls?}` or `{error}`. When it asks for
/// tools, their outcomes are POSTed back as
/// `{type: "tool_results", sessionKey, messageId, results: [{id, name, outcome}]}`
/// and the gateway answers again in the same shape.
pub struct HttpAgent {
    http: Client,
    url: String,
    token: String,
}

impl HttpAgent {
    /// Creates an agent client from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AgentConfig) -> Result<Self, ConfigurationError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| ConfigurationError::Invalid(format!("agent http client: {e}")))?;
        Ok(Self {
            http,
            url: config.url.clone(),
            token: config.token.clone(),
        })
    }

    async fn post(&self, body: &Value) -> Result<GatewayResponse, ProcessingError> {
        let mut req = self.http.post(&self.url).json(body);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProcessingError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| ProcessingError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn process_message(
        &self,
        request: AgentRequest,
        ctx: &InvocationContext,
    ) -> Result<AgentReply, ProcessingError> {
        let session_key = request.session_key.clone();
        let message_id = request.message_id.clone();
        let mut resp = self
            .post(&json!({
                "type": "message",
                "request": request,
                "tools": tools::definitions(),
            }))
            .await?;

        for _ in 0..MAX_TOOL_ROUNDS {
            if let Some(err) = resp.error {
                return Err(ProcessingError::Agent(err));
            }
            if resp.tool_calls.is_empty() {
                return Ok(AgentReply {
                    content: resp.content,
                    attachments: resp.attachments,
                });
            }

            let results: Vec<Value> = resp
                .tool_calls
                .iter()
                .map(|call| {
                    let outcome = tools::dispatch(ctx, call);
                    debug!(tool = %call.name, ok = outcome.ok, "agent tool call handled");
                    json!({ "id": call.id, "name": call.name, "outcome": outcome })
                })
                .collect();

            resp = self
                .post(&json!({
                    "type": "tool_results",
                    "sessionKey": session_key,
                    "messageId": message_id,
                    "results": results,
                }))
                .await?;
        }

        Err(ProcessingError::Agent(format!(
            "gave up after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }

    async fn reset_conversation(&self) -> Result<(), ProcessingError> {
        let resp = self.post(&json!({ "type": "reset" })).await?;
        if let Some(err) = resp.error {
            return Err(ProcessingError::Agent(err));
        }
        info!("agent conversation reset");
        Ok(())
    }
}
