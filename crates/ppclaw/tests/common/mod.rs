#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use ppclaw::agent::{Agent, AgentReply, AgentRequest};
use ppclaw::backoff::ExponentialBackoff;
use ppclaw::binder::{CredentialBinder, Credentials};
use ppclaw::config::{ConfigPatch, ConfigStore};
use ppclaw::directory::RelayDirectory;
use ppclaw::error::{ConfigurationError, ProcessingError};
use ppclaw::notes::NotesStore;
use ppclaw::router::MessageRouter;
use ppclaw::selector::RelaySelector;
use ppclaw::session::InvocationContext;
use ppclaw::supervisor::{ConnectionState, ConnectionSupervisor};
use ppclaw_common::Relay;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A dead relay nobody listens on.
pub fn dead_relay(weight: f64) -> Relay {
    Relay {
        id: "dead".to_string(),
        ws: "ws://127.0.0.1:1/ws".to_string(),
        weight,
    }
}

/// Instruction for the relay side of the agent socket.
enum Script {
    Frame(String),
    Close,
}

struct RelayState {
    relays: Mutex<Vec<Relay>>,
    discovery_down: AtomicBool,
    bind_answer: Value,
    bind_tokens: Mutex<Vec<String>>,
    auth_headers: Mutex<Vec<String>>,
    received_tx: mpsc::UnboundedSender<String>,
    outgoing: Mutex<Option<mpsc::UnboundedReceiver<Script>>>,
}

/// In-process relay: discovery, bind endpoint and agent WebSocket.
pub struct FakeRelay {
    pub addr: SocketAddr,
    state: Arc<RelayState>,
    received: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<Script>,
}

impl FakeRelay {
    pub async fn start() -> Self {
        Self::start_with(json!({ "api_key": "sk-bound" }), &[]).await
    }

    /// `extra` relays are listed before this one in discovery.
    pub async fn start_with(bind_answer: Value, extra: &[Relay]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut relays = extra.to_vec();
        relays.push(Relay {
            id: "local".to_string(),
            ws: format!("ws://{addr}/ws"),
            weight: 1.0,
        });

        let (received_tx, received) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RelayState {
            relays: Mutex::new(relays),
            discovery_down: AtomicBool::new(false),
            bind_answer,
            bind_tokens: Mutex::new(Vec::new()),
            auth_headers: Mutex::new(Vec::new()),
            received_tx,
            outgoing: Mutex::new(Some(outgoing_rx)),
        });

        let app = Router::new()
            .route("/relay.json", get(discovery))
            .route("/api/agent/connect", post(bind))
            .route("/ws/agent", get(agent_socket))
            .with_state(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            received,
            outgoing,
        }
    }

    pub fn discovery_url(&self) -> String {
        format!("http://{}/relay.json", self.addr)
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.state.auth_headers.lock().unwrap().clone()
    }

    pub fn bind_tokens(&self) -> Vec<String> {
        self.state.bind_tokens.lock().unwrap().clone()
    }

    /// Push a text frame to the connected agent.
    pub fn push(&self, frame: Value) {
        self.outgoing.send(Script::Frame(frame.to_string())).unwrap();
    }

    /// Close the agent socket from the relay side.
    pub fn close_connection(&self) {
        self.outgoing.send(Script::Close).unwrap();
    }

    /// Make the discovery endpoint answer 503 from now on.
    pub fn fail_discovery(&self) {
        self.state.discovery_down.store(true, Ordering::SeqCst);
    }

    /// Next text frame sent by the agent.
    pub async fn recv(&mut self) -> Value {
        let text = tokio::time::timeout(TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("relay stopped");
        serde_json::from_str(&text).unwrap()
    }
}

async fn discovery(State(state): State<Arc<RelayState>>) -> Result<Json<Value>, StatusCode> {
    if state.discovery_down.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let relays = state.relays.lock().unwrap().clone();
    Ok(Json(json!({ "relays": relays })))
}

async fn bind(State(state): State<Arc<RelayState>>, Json(body): Json<Value>) -> Json<Value> {
    let token = body["token"].as_str().unwrap_or_default().to_string();
    state.bind_tokens.lock().unwrap().push(token);
    Json(state.bind_answer.clone())
}

async fn agent_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.auth_headers.lock().unwrap().push(auth);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut tx, mut rx) = socket.split();
    let outgoing = state.outgoing.lock().unwrap().take();
    let Some(mut outgoing) = outgoing else {
        return;
    };

    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = state.received_tx.send(text);
                }
                Some(Ok(_)) => {}
                _ => break,
            },
            out = outgoing.recv() => match out {
                Some(Script::Frame(text)) => {
                    if tx.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Script::Close) => {
                    let _ = tx.send(WsMessage::Close(None)).await;
                    break;
                }
                None => break,
            }
        }
    }

    // hand the script over to the next connection
    *state.outgoing.lock().unwrap() = Some(outgoing);
}

/// Agent that echoes content and records what it was given.
#[derive(Default)]
pub struct EchoAgent {
    pub requests: Mutex<Vec<AgentRequest>>,
}

#[async_trait]
impl Agent for EchoAgent {
    async fn process_message(
        &self,
        request: AgentRequest,
        _ctx: &InvocationContext,
    ) -> Result<AgentReply, ProcessingError> {
        let content = format!("echo: {}", request.content);
        self.requests.lock().unwrap().push(request);
        Ok(AgentReply {
            content,
            attachments: Vec::new(),
        })
    }

    async fn reset_conversation(&self) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// Config store whose disk is always full.
pub struct FailingStore;

impl ConfigStore for FailingStore {
    fn persist(&self, _patch: &ConfigPatch) -> Result<(), ConfigurationError> {
        Err(ConfigurationError::Persist("disk full".to_string()))
    }
}

/// Config store that only remembers the patches it was given.
#[derive(Default)]
pub struct RecordingStore {
    pub patches: Mutex<Vec<ConfigPatch>>,
}

impl ConfigStore for RecordingStore {
    fn persist(&self, patch: &ConfigPatch) -> Result<(), ConfigurationError> {
        self.patches.lock().unwrap().push(patch.clone());
        Ok(())
    }
}

pub struct Harness {
    pub supervisor: ConnectionSupervisor,
    pub states: watch::Receiver<ConnectionState>,
    pub shutdown: watch::Sender<bool>,
}

pub fn harness(
    discovery_url: &str,
    credentials: Credentials,
    agent: Arc<dyn Agent>,
    notes: Arc<dyn NotesStore>,
    store: Arc<dyn ConfigStore>,
) -> Harness {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let router = MessageRouter::new(agent, notes);
    let directory = Arc::new(RelayDirectory::new(discovery_url).unwrap());
    let supervisor = ConnectionSupervisor::new(
        directory,
        CredentialBinder::new(store).unwrap(),
        credentials,
        router,
        shutdown_rx,
    )
    .with_selector(RelaySelector::seeded(7))
    .with_backoff(ExponentialBackoff::new(
        Duration::from_millis(10),
        Duration::from_millis(100),
        2.0,
    ))
    .with_keepalive(Duration::from_secs(60));
    let states = supervisor.subscribe();

    Harness {
        supervisor,
        states,
        shutdown,
    }
}

pub async fn wait_for_state(states: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(TIMEOUT, states.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
        .unwrap();
}
