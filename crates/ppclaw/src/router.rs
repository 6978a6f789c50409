//! Inbound frame handling.
//!
//! The router turns each relay frame into an agent invocation and queues
//! the resulting frames (ack, reply) on the connection's outbound channel.

use crate::agent::{Agent, AgentRequest};
use crate::notes::{GroupId, NotesStore};
use crate::session::{InvocationContext, SessionKey, SessionMetadata};
use ppclaw_common::frame::{BotDm, DirectMessage, GroupMessage};
use ppclaw_common::{InboundFrame, OutboundFrame};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Reply content sent when the agent fails on a message.
pub const APOLOGY: &str = "Sorry, an error occurred while processing your message.";

/// Completion signal of the latest queued conversation reset.
type ResetGate = Option<watch::Receiver<bool>>;

/// Routes inbound frames to the agent.
#[derive(Clone)]
pub struct MessageRouter {
    agent: Arc<dyn Agent>,
    notes: Arc<dyn NotesStore>,
    reset_gate: Arc<Mutex<ResetGate>>,
}

impl MessageRouter {
    /// Creates a router serving `agent` with group notes from `notes`.
    pub fn new(agent: Arc<dyn Agent>, notes: Arc<dyn NotesStore>) -> Self {
        Self {
            agent,
            notes,
            reset_gate: Arc::new(Mutex::new(None)),
        }
    }

    /// Parse one text frame and handle it.
    ///
    /// Every frame runs on its own task, so replies may leave in a different
    /// order than their messages arrived. A `new_session` reset still
    /// completes before any frame that arrived after it reaches the agent.
    pub fn dispatch(&self, raw: &str, out: &mpsc::Sender<OutboundFrame>) {
        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable frame");
                return;
            }
        };

        let out = out.clone();
        match frame {
            InboundFrame::Ping => {
                tokio::spawn(async move { emit(&out, OutboundFrame::Pong).await });
            }
            InboundFrame::NewSession => {
                let (done_tx, done_rx) = watch::channel(false);
                let previous = self.replace_gate(Some(done_rx));
                let router = self.clone();
                tokio::spawn(async move {
                    wait_gate(previous).await;
                    router.handle(InboundFrame::NewSession, &out).await;
                    done_tx.send_replace(true);
                });
            }
            frame => {
                let gate = self.current_gate();
                let router = self.clone();
                tokio::spawn(async move {
                    wait_gate(gate).await;
                    router.handle(frame, &out).await;
                });
            }
        }
    }

    fn replace_gate(&self, gate: ResetGate) -> ResetGate {
        let mut current = self.reset_gate.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, gate)
    }

    fn current_gate(&self) -> ResetGate {
        self.reset_gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Handle one parsed frame to completion.
    pub async fn handle(&self, frame: InboundFrame, out: &mpsc::Sender<OutboundFrame>) {
        match frame {
            InboundFrame::Ping => emit(out, OutboundFrame::Pong).await,
            InboundFrame::NewSession => {
                info!("relay requested a new session");
                if let Err(e) = self.agent.reset_conversation().await {
                    warn!(error = %e, "failed to reset conversation");
                }
            }
            InboundFrame::Message(msg) => self.handle_direct(msg, out).await,
            InboundFrame::GroupMessage(msg) => self.handle_group(msg, out).await,
            InboundFrame::BotDm(msg) => self.handle_bot_dm(msg, out).await,
        }
    }

    async fn handle_direct(&self, msg: DirectMessage, out: &mpsc::Sender<OutboundFrame>) {
        emit(out, OutboundFrame::Ack { id: msg.id.clone() }).await;

        let request = AgentRequest::new(
            SessionKey::direct(msg.sender_id.as_deref()),
            msg.id.clone(),
            msg.content,
            msg.attachments,
            SessionMetadata::Direct {
                sender_id: msg.sender_id,
                sender_name: msg.sender_name,
            },
        );
        let ctx = InvocationContext::unscoped(Arc::clone(&self.notes));

        let reply = match self.agent.process_message(request, &ctx).await {
            Ok(reply) => OutboundFrame::Reply {
                reply_to: msg.id,
                content: reply.content,
                attachments: Some(reply.attachments),
            },
            Err(e) => {
                error!(id = %msg.id, error = %e, "agent failed on direct message");
                OutboundFrame::Reply {
                    reply_to: msg.id,
                    content: APOLOGY.to_string(),
                    attachments: None,
                }
            }
        };
        emit(out, reply).await;
    }

    async fn handle_group(&self, msg: GroupMessage, out: &mpsc::Sender<OutboundFrame>) {
        emit(out, OutboundFrame::Ack { id: msg.id.clone() }).await;

        let group = match GroupId::parse(&msg.group_id) {
            Ok(group) => Some(group),
            Err(e) => {
                warn!(group_id = %msg.group_id, error = %e, "group id rejected, notes disabled for this message");
                None
            }
        };

        let group_notes = match group {
            Some(ref group) => self.load_notes(group).await,
            None => String::new(),
        };

        let ctx = match group {
            Some(group) => InvocationContext::for_group(group, Arc::clone(&self.notes)),
            None => InvocationContext::unscoped(Arc::clone(&self.notes)),
        };

        let request = AgentRequest::new(
            SessionKey::group(&msg.group_id),
            msg.id.clone(),
            msg.content,
            msg.attachments,
            SessionMetadata::Group {
                group_id: msg.group_id.clone(),
                group_name: msg.group_name,
                sender_id: msg.sender_id,
                sender_type: msg.sender_type,
                sender_name: msg.sender_name,
                is_mentioned: msg.is_mentioned,
                group_owner: msg.group_owner,
                group_agents: msg.group_agents,
                group_notes,
            },
        );

        let result = self.agent.process_message(request, &ctx).await;
        drop(ctx);

        let reply = match result {
            Ok(reply) => OutboundFrame::GroupReply {
                reply_to: msg.id,
                group_id: msg.group_id,
                content: reply.content,
                attachments: Some(reply.attachments),
            },
            Err(e) => {
                error!(id = %msg.id, group_id = %msg.group_id, error = %e, "agent failed on group message");
                OutboundFrame::GroupReply {
                    reply_to: msg.id,
                    group_id: msg.group_id,
                    content: APOLOGY.to_string(),
                    attachments: None,
                }
            }
        };
        emit(out, reply).await;
    }

    /// Notes of `group`, empty when none or unreadable.
    async fn load_notes(&self, group: &GroupId) -> String {
        let notes = Arc::clone(&self.notes);
        let key = group.clone();
        match tokio::task::spawn_blocking(move || notes.read(&key)).await {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                warn!(group_id = %group, error = %e, "failed to load group notes");
                String::new()
            }
            Err(e) => {
                warn!(group_id = %group, error = %e, "group notes task failed");
                String::new()
            }
        }
    }

    async fn handle_bot_dm(&self, msg: BotDm, out: &mpsc::Sender<OutboundFrame>) {
        let task_id = msg.task_id.filter(|t| !t.is_empty());

        let request = AgentRequest::new(
            SessionKey::bot(&msg.from_agent_id, task_id.as_deref()),
            msg.id.clone(),
            msg.content,
            Vec::new(),
            SessionMetadata::Bot {
                from_agent_id: msg.from_agent_id.clone(),
                from_agent_name: msg.from_agent_name,
                task_id: task_id.clone(),
            },
        );
        let ctx = InvocationContext::unscoped(Arc::clone(&self.notes));

        match self.agent.process_message(request, &ctx).await {
            Ok(reply) => {
                emit(
                    out,
                    OutboundFrame::BotDmReply {
                        reply_to: msg.id,
                        target_agent_id: msg.from_agent_id,
                        task_id,
                        content: reply.content,
                    },
                )
                .await;
            }
            Err(e) => {
                error!(id = %msg.id, from = %msg.from_agent_id, error = %e, "agent failed on bot dm");
            }
        }
    }
}

/// Resolves once the reset behind `gate` is done (or its task is gone).
async fn wait_gate(gate: ResetGate) {
    if let Some(mut done) = gate {
        let _ = done.wait_for(|done| *done).await;
    }
}

async fn emit(out: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) {
    let kind = frame.kind();
    if out.send(frame).await.is_err() {
        debug!(kind, "connection gone, outbound frame dropped");
    }
}
