//! ppclaw connector: keeps an agent attached to a relay and routes the
//! relay's messages to it.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Agent collaborator contract and its HTTP gateway implementation.
pub mod agent;
/// Exponential backoff for reconnection.
pub mod backoff;
/// One-time bind token exchange.
pub mod binder;
/// CLI parsing, layered configuration and config persistence.
pub mod config;
/// Relay discovery with last-good caching.
pub mod directory;
/// Error taxonomy.
pub mod error;
/// Per-group notes storage.
pub mod notes;
/// Inbound frame routing.
pub mod router;
/// Weighted relay selection with failover.
pub mod selector;
/// Session keys, metadata and the per-invocation scope.
pub mod session;
/// Relay connection lifecycle.
pub mod supervisor;
/// Agent tools over group notes.
pub mod tools;
