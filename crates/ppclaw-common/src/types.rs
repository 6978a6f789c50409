//! Relay directory types and protocol constants.

use serde::{Deserialize, Serialize};

/// Discovery endpoint used when no override is configured.
pub const DEFAULT_DISCOVERY_URL: &str = "https://api.claw.icu/relay.json";

/// Path appended to a relay's WebSocket URL to reach the agent endpoint.
pub const AGENT_PATH: &str = "/agent";

/// Path, relative to a relay's HTTP base, of the bind-token exchange.
pub const BIND_PATH: &str = "/api/agent/connect";

/// Channel identifier reported to the agent for every inbound message.
pub const CHANNEL_ID: &str = "ppclaw";

/// A relay node advertised by the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relay {
    /// Stable relay identifier, used to track failures.
    pub id: String,
    /// WebSocket base URL (`ws://` or `wss://`).
    pub ws: String,
    /// Relative selection weight; must be positive.
    pub weight: f64,
}

impl Relay {
    /// Checks that the entry can take part in selection.
    ///
    /// # Errors
    ///
    /// Returns a short reason when the id is empty, the URL is not a
    /// WebSocket URL, or the weight is not a positive finite number.
    pub fn check(&self) -> Result<(), &'static str> {
        if self.id.is_empty() {
            return Err("empty relay id");
        }
        if !(self.ws.starts_with("ws://") || self.ws.starts_with("wss://")) {
            return Err("relay URL must start with ws:// or wss://");
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err("relay weight must be a positive number");
        }
        Ok(())
    }
}

/// Body returned by the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Advertised relays, in the order the endpoint lists them.
    pub relays: Vec<Relay>,
}

/// Request body of the bind-token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRequest {
    /// One-time bootstrap token.
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(id: &str, ws: &str, weight: f64) -> Relay {
        Relay {
            id: id.to_string(),
            ws: ws.to_string(),
            weight,
        }
    }

    #[test]
    fn check_accepts_ws_and_wss() {
        assert!(relay("a", "ws://127.0.0.1:9000", 1.0).check().is_ok());
        assert!(relay("b", "wss://relay.example/ws", 0.5).check().is_ok());
    }

    #[test]
    fn check_rejects_http_scheme() {
        assert!(relay("a", "https://relay.example", 1.0).check().is_err());
    }

    #[test]
    fn check_rejects_non_positive_weight() {
        assert!(relay("a", "ws://x", 0.0).check().is_err());
        assert!(relay("a", "ws://x", -2.0).check().is_err());
        assert!(relay("a", "ws://x", f64::NAN).check().is_err());
    }

    #[test]
    fn check_rejects_empty_id() {
        assert!(relay("", "ws://x", 1.0).check().is_err());
    }

    #[test]
    fn discovery_response_parses_wire_shape() {
        let body = r#"{"relays":[{"id":"hk-1","ws":"wss://hk.claw.icu/ws","weight":3}]}"#;
        let parsed: DiscoveryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.relays, vec![relay("hk-1", "wss://hk.claw.icu/ws", 3.0)]);
    }
}
