//! tabtrack Protocol - Records exchanged with the outside world
//!
//! This crate provides:
//! - `state` - the persisted tracker state (history + current session)
//! - `message` - newline-delimited JSON messages between the browser
//!   adapter and the daemon
//! - `parse` - line parsing with version checks
//! - `version` - format versioning shared by both

pub mod message;
pub mod parse;
pub mod state;
pub mod version;

pub use message::{InboundKind, InboundMessage, OutboundMessage};
pub use parse::{parse_inbound, ProtocolError};
pub use state::PersistedState;
pub use version::{ProtocolVersion, VersionError};
