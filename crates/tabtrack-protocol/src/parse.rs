//! Parsing adapter lines and protocol errors.

use thiserror::Error;

use crate::message::InboundMessage;
use crate::version::VersionError;

/// Errors raised while decoding protocol records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line held only whitespace.
    #[error("empty message")]
    Empty,

    /// The record is not valid JSON or has the wrong shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The record was written by an incompatible version.
    #[error(transparent)]
    Version(#[from] VersionError),
}

impl ProtocolError {
    /// Creates a malformed-record error from any error type.
    pub fn malformed<E: std::fmt::Display>(err: E) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Parses one line from the adapter.
pub fn parse_inbound(line: &str) -> Result<InboundMessage, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let message: InboundMessage = serde_json::from_str(line).map_err(ProtocolError::malformed)?;
    message.protocol_version.ensure_supported()?;
    Ok(message)
}
