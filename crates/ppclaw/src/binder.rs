//! First-time credential binding.
//!
//! A fresh installation only holds a one-time bind token. The token is
//! exchanged once against a relay's HTTP API for a durable API key, which is
//! then persisted in place of the token.

use crate::config::{ConfigPatch, ConfigStore};
use crate::error::{BindingError, ConfigurationError, ConnectionError, ConnectorError};
use ppclaw_common::types::{BindRequest, BIND_PATH};
use ppclaw_common::Relay;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const BIND_TIMEOUT: Duration = Duration::from_secs(15);

/// The credential the connector currently authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Durable API key, sent as a bearer token.
    ApiKey(String),
    /// One-time token still waiting to be exchanged.
    BindToken(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<REDACTED>)"),
            Self::BindToken(_) => f.write_str("BindToken(<REDACTED>)"),
        }
    }
}

impl Credentials {
    /// Pick the authoritative credential. An API key wins over a bind token;
    /// empty strings count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingCredentials`] when neither is set.
    pub fn resolve(
        api_key: Option<&str>,
        bind_token: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        let present = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(key) = present(api_key) {
            return Ok(Self::ApiKey(key));
        }
        if let Some(token) = present(bind_token) {
            return Ok(Self::BindToken(token));
        }
        Err(ConfigurationError::MissingCredentials)
    }

    /// The API key, if binding has already happened.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey(key) => Some(key),
            Self::BindToken(_) => None,
        }
    }
}

/// Derive a relay's HTTP base URL from its WebSocket URL.
///
/// `wss://` becomes `https://`, `ws://` becomes `http://`, and a trailing
/// `/ws` (with or without a final slash) is dropped.
#[must_use]
pub fn http_base(ws_url: &str) -> String {
    let swapped = if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        ws_url.to_string()
    };
    let trimmed = swapped.strip_suffix('/').unwrap_or(&swapped);
    trimmed.strip_suffix("/ws").unwrap_or(trimmed).to_string()
}

/// Exchanges a bind token for an API key and persists the result.
pub struct CredentialBinder {
    http: Client,
    store: Arc<dyn ConfigStore>,
}

impl CredentialBinder {
    /// Creates a binder that persists through `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(store: Arc<dyn ConfigStore>) -> Result<Self, ConfigurationError> {
        let http = Client::builder()
            .timeout(BIND_TIMEOUT)
            .build()
            .map_err(|e| ConfigurationError::Invalid(format!("http client: {e}")))?;
        Ok(Self { http, store })
    }

    /// Exchange `bind_token` against `relay` and persist the new key.
    ///
    /// # Errors
    ///
    /// - [`BindFailure::Fatal`] when the relay answers without an `api_key`.
    ///   A key that cannot be persisted is still returned.
    /// - [`BindFailure::Transport`] when the relay cannot be reached; the
    ///   caller may retry against another relay.
    pub async fn bind(&self, relay: &Relay, bind_token: &str) -> Result<String, BindFailure> {
        let url = format!("{}{BIND_PATH}", http_base(&relay.ws));
        info!(relay = %relay.id, "exchanging bind token for api key");

        let body = self
            .http
            .post(&url)
            .json(&BindRequest {
                token: bind_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| BindFailure::Transport(e.into()))?
            .text()
            .await
            .map_err(|e| BindFailure::Transport(e.into()))?;

        let api_key = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("api_key").and_then(|k| k.as_str()).map(str::to_string))
            .filter(|k| !k.is_empty())
            .ok_or_else(|| BindFailure::Fatal(BindingError::Rejected { body: body.clone() }.into()))?;

        // The token is spent by now; keep the key for this run even if it
        // cannot be written back.
        match self.store.persist(&ConfigPatch::bound(&api_key)) {
            Ok(()) => info!(relay = %relay.id, "bind token exchanged, api key saved"),
            Err(e) => error!(
                relay = %relay.id,
                error = %e,
                "bind token exchanged but the api key could not be saved, using it for this run only"
            ),
        }

        Ok(api_key)
    }
}

/// Outcome of a failed [`CredentialBinder::bind`].
#[derive(Debug)]
pub enum BindFailure {
    /// Relay unreachable; retry later or elsewhere.
    Transport(ConnectionError),
    /// Exchange rejected; stop.
    Fatal(ConnectorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_swaps_scheme_and_strips_ws_suffix() {
        assert_eq!(http_base("wss://hk.claw.icu/ws"), "https://hk.claw.icu");
        assert_eq!(http_base("wss://hk.claw.icu/ws/"), "https://hk.claw.icu");
        assert_eq!(http_base("ws://127.0.0.1:8080/ws"), "http://127.0.0.1:8080");
        assert_eq!(http_base("wss://relay.example"), "https://relay.example");
    }

    #[test]
    fn http_base_keeps_other_paths() {
        assert_eq!(http_base("wss://relay.example/wsx"), "https://relay.example/wsx");
        assert_eq!(http_base("wss://relay.example/v1/ws"), "https://relay.example/v1");
    }

    #[test]
    fn resolve_prefers_api_key() {
        let creds = Credentials::resolve(Some("key"), Some("tok")).unwrap();
        assert_eq!(creds, Credentials::ApiKey("key".into()));
        assert_eq!(creds.api_key(), Some("key"));
    }

    #[test]
    fn resolve_falls_back_to_bind_token() {
        let creds = Credentials::resolve(None, Some("tok")).unwrap();
        assert_eq!(creds, Credentials::BindToken("tok".into()));
        assert!(creds.api_key().is_none());
    }

    #[test]
    fn resolve_treats_blank_as_absent() {
        let creds = Credentials::resolve(Some("  "), Some("tok")).unwrap();
        assert_eq!(creds, Credentials::BindToken("tok".into()));
    }

    #[test]
    fn resolve_fails_without_credentials() {
        let err = Credentials::resolve(None, Some("")).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCredentials));
    }

    #[test]
    fn debug_redacts_secrets() {
        let shown = format!("{:?}", Credentials::ApiKey("sk-secret".into()));
        assert!(!shown.contains("sk-secret"));
    }
}
