//! Relay discovery client with last-good caching.
//!
//! [`RelayDirectory::refresh`] fetches the relay list from the discovery
//! endpoint and swaps it in as a whole. When a refresh fails the previous
//! snapshot stays authoritative and remains available through
//! [`RelayDirectory::snapshot`]. Retry policy belongs to the caller.

use crate::error::DiscoveryError;
use ppclaw_common::types::DiscoveryResponse;
use ppclaw_common::Relay;
use reqwest::Client;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable, shared view of the relay list.
pub type Snapshot = Arc<[Relay]>;

/// Cached relay directory backed by an HTTP discovery endpoint.
pub struct RelayDirectory {
    http: Client,
    url: String,
    snapshot: RwLock<Snapshot>,
}

impl RelayDirectory {
    /// Creates a directory for `url` with an empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, DiscoveryError> {
        let http = Client::builder().timeout(DISCOVERY_TIMEOUT).build()?;
        Ok(Self::with_client(http, url))
    }

    /// Creates a directory that uses an existing HTTP client.
    pub fn with_client(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            snapshot: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Discovery endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the relay list and replace the cached snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the endpoint is unreachable, answers
    /// with a non-success status, or returns a payload without a relay
    /// list. The cached snapshot is left untouched in that case.
    pub async fn refresh(&self) -> Result<Snapshot, DiscoveryError> {
        let resp = self.http.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let relays: Snapshot = parse_discovery(&body)?.into();

        debug!(count = relays.len(), "relay directory refreshed");
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("relay directory lock poisoned in refresh(), replacing snapshot");
                poisoned.into_inner()
            }
        };
        *guard = relays.clone();
        Ok(relays)
    }

    /// Last successfully fetched relay list (empty before the first success).
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("relay directory lock poisoned in snapshot(), using recovered data");
                poisoned.into_inner().clone()
            }
        }
    }
}

/// Decode a discovery body, dropping entries that cannot be selected.
///
/// # Errors
///
/// Returns [`DiscoveryError::Malformed`] when the body is not JSON or has
/// no `relays` list.
pub fn parse_discovery(body: &str) -> Result<Vec<Relay>, DiscoveryError> {
    let parsed: DiscoveryResponse =
        serde_json::from_str(body).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

    Ok(parsed
        .relays
        .into_iter()
        .filter(|relay| match relay.check() {
            Ok(()) => true,
            Err(reason) => {
                warn!(relay = %relay.id, reason, "skipping unusable relay entry");
                false
            }
        })
        .collect())
}
