//! Relay connection lifecycle.
//!
//! One [`ConnectionSupervisor`] owns the single relay connection of the
//! process. It cycles through discovery, optional binding, connecting and
//! serving, and backs off between attempts:
//!
//! ```text
//! Discovering → (Binding) → Connecting → Connected ⇄ Backoff → Discovering …
//! ```
//!
//! `Terminated` is reached only through the shutdown signal or a fatal
//! credential error.

use crate::backoff::ExponentialBackoff;
use crate::binder::{BindFailure, CredentialBinder, Credentials};
use crate::directory::RelayDirectory;
use crate::error::{ConnectionError, ConnectorError};
use crate::router::MessageRouter;
use crate::selector::{FailedNodeSet, RelaySelector};
use futures_util::{SinkExt, StreamExt};
use ppclaw_common::types::AGENT_PATH;
use ppclaw_common::{OutboundFrame, Relay};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

const OUTBOUND_QUEUE: usize = 64;

/// Externally observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Fetching the relay list.
    Discovering,
    /// Exchanging a bind token for an API key.
    Binding,
    /// Opening the WebSocket to the chosen relay.
    Connecting,
    /// Connected and serving messages.
    Connected,
    /// Waiting before the next attempt.
    Backoff,
    /// Stopped; no further attempts.
    Terminated,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Shutdown,
}

/// Owns the relay connection, its failover state and its backoff timer.
pub struct ConnectionSupervisor {
    directory: Arc<RelayDirectory>,
    selector: RelaySelector,
    binder: CredentialBinder,
    credentials: Credentials,
    router: MessageRouter,
    failed: FailedNodeSet,
    backoff: ExponentialBackoff,
    keepalive: Duration,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor that stops once `shutdown` carries `true`.
    ///
    /// Defaults: entropy-seeded selector, 1s → 30s doubling backoff, 30s
    /// keepalive.
    pub fn new(
        directory: Arc<RelayDirectory>,
        binder: CredentialBinder,
        credentials: Credentials,
        router: MessageRouter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Discovering);
        Self {
            directory,
            selector: RelaySelector::new(),
            binder,
            credentials,
            router,
            failed: FailedNodeSet::new(),
            backoff: ExponentialBackoff::new(
                Duration::from_secs(1),
                Duration::from_secs(30),
                2.0,
            ),
            keepalive: Duration::from_secs(30),
            state_tx,
            shutdown,
        }
    }

    /// Replace the relay selector.
    #[must_use]
    pub fn with_selector(mut self, selector: RelaySelector) -> Self {
        self.selector = selector;
        self
    }

    /// Replace the reconnect backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the keepalive ping interval.
    #[must_use]
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown.
    ///
    /// Discovery and transport failures are retried forever with backoff.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the relay rejects the bind token.
    pub async fn run(mut self) -> Result<(), ConnectorError> {
        let result = self.run_loop().await;
        if let Err(ref e) = result {
            error!(error = %e, "fatal connector error, not retrying");
        }
        self.set_state(ConnectionState::Terminated);
        result
    }

    async fn run_loop(&mut self) -> Result<(), ConnectorError> {
        loop {
            let stop = *self.shutdown.borrow();
            if stop {
                return Ok(());
            }

            let Some(relay) = self.prepare_attempt().await else {
                if self.backoff_wait().await {
                    return Ok(());
                }
                continue;
            };

            let Some(api_key) = self.ensure_api_key(&relay).await? else {
                self.failed.mark(&relay.id);
                if self.backoff_wait().await {
                    return Ok(());
                }
                continue;
            };

            match self.connect(&relay, &api_key).await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(SessionEnd::Closed) => {
                    info!(relay = %relay.id, "relay connection closed");
                }
                Err(e) => {
                    warn!(relay = %relay.id, error = %e, "relay connection lost");
                }
            }

            self.failed.mark(&relay.id);
            if self.backoff_wait().await {
                return Ok(());
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Refresh the directory (best effort) and pick a relay.
    async fn prepare_attempt(&mut self) -> Option<Relay> {
        self.set_state(ConnectionState::Discovering);

        let relays = match self.directory.refresh().await {
            Ok(relays) => relays,
            Err(e) => {
                let cached = self.directory.snapshot();
                if cached.is_empty() {
                    warn!(error = %e, "relay discovery failed and no cached list");
                    return None;
                }
                warn!(error = %e, cached = cached.len(), "relay discovery failed, using cached list");
                cached
            }
        };

        let relay = self.selector.pick(&relays, &mut self.failed);
        if relay.is_none() {
            warn!("relay list is empty");
        }
        relay
    }

    /// API key for connecting, binding against `relay` first if needed.
    ///
    /// `Ok(None)` means the relay could not be reached for binding.
    async fn ensure_api_key(&mut self, relay: &Relay) -> Result<Option<String>, ConnectorError> {
        let bind_token = match self.credentials {
            Credentials::ApiKey(ref key) => return Ok(Some(key.clone())),
            Credentials::BindToken(ref token) => token.clone(),
        };

        self.set_state(ConnectionState::Binding);
        match self.binder.bind(relay, &bind_token).await {
            Ok(api_key) => {
                self.credentials = Credentials::ApiKey(api_key.clone());
                Ok(Some(api_key))
            }
            Err(BindFailure::Transport(e)) => {
                warn!(relay = %relay.id, error = %e, "bind endpoint unreachable");
                Ok(None)
            }
            Err(BindFailure::Fatal(e)) => Err(e),
        }
    }

    async fn connect(&mut self, relay: &Relay, api_key: &str) -> Result<SessionEnd, ConnectionError> {
        self.set_state(ConnectionState::Connecting);

        let url = format!("{}{AGENT_PATH}", relay.ws.trim_end_matches('/'));
        let mut req = url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
        req.headers_mut().insert(AUTHORIZATION, auth);

        info!(relay = %relay.id, url = %url, "connecting to relay");
        let ws = tokio::select! {
            res = tokio_tungstenite::connect_async(req) => res?.0,
            () = wait_for_shutdown(&mut self.shutdown) => return Ok(SessionEnd::Shutdown),
        };

        self.on_open(relay);
        run_session(ws, &self.router, &mut self.shutdown, self.keepalive).await
    }

    fn on_open(&mut self, relay: &Relay) {
        self.set_state(ConnectionState::Connected);
        self.backoff.reset();
        if self.failed.recover(&relay.id) {
            debug!(relay = %relay.id, "relay recovered");
        }
        info!(relay = %relay.id, "connected to relay");
    }

    /// Wait out the current backoff delay. Returns `true` on shutdown.
    async fn backoff_wait(&mut self) -> bool {
        self.set_state(ConnectionState::Backoff);
        let delay = self.backoff.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => false,
            () = wait_for_shutdown(&mut self.shutdown) => true,
        }
    }
}

/// Resolves once `shutdown` carries `true`. Never resolves if the sender
/// is gone without signalling.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

/// Serve one open connection until it closes, fails or shutdown.
///
/// All outbound frames are funnelled through one queue drained here, so
/// writes to the socket are never interleaved.
async fn run_session<S>(
    ws: WebSocketStream<S>,
    router: &MessageRouter,
    shutdown: &mut watch::Receiver<bool>,
    keepalive: Duration,
) -> Result<SessionEnd, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE);
    let mut ping_interval = tokio::time::interval_at(Instant::now() + keepalive, keepalive);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let Some(msg) = msg else {
                    return Ok(SessionEnd::Closed);
                };
                match msg? {
                    Message::Text(text) => router.dispatch(&text, &out_tx),
                    Message::Ping(data) => ws_tx.send(Message::Pong(data)).await?,
                    Message::Close(frame) => {
                        debug!(?frame, "relay sent close");
                        return Ok(SessionEnd::Closed);
                    }
                    _ => {}
                }
            }

            Some(frame) = out_rx.recv() => {
                debug!(kind = frame.kind(), "sending frame");
                ws_tx.send(Message::Text(frame.to_text()?)).await?;
            }

            _ = ping_interval.tick() => {
                ws_tx.send(Message::Ping(Vec::new())).await?;
            }

            () = wait_for_shutdown(shutdown) => {
                if let Err(e) = ws_tx.send(Message::Close(None)).await {
                    debug!(error = %e, "close frame not sent");
                }
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}
