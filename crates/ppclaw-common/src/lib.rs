//! Wire types shared across the ppclaw connector.
//!
//! This crate provides:
//! - Relay directory entries and the discovery payload ([`types`])
//! - JSON frames exchanged with a relay over WebSocket ([`frame`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod types;

pub use frame::{FrameError, InboundFrame, OutboundFrame};
pub use types::Relay;
