//! Persisted tracker state.
//!
//! The external store keeps one document: the closed-session history and the
//! session that was active when it was written, using the session record
//! shape from `tabtrack-core`.

use serde::{Deserialize, Serialize};

use tabtrack_core::{BrowsingSession, SessionId, Timestamp};

use crate::parse::ProtocolError;
use crate::version::ProtocolVersion;

/// Snapshot of everything the tracker persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub saved_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session: Option<BrowsingSession>,
    /// Closed sessions, oldest first.
    #[serde(default)]
    pub history: Vec<BrowsingSession>,
}

impl PersistedState {
    /// Creates a state document at the current format version.
    pub fn new(
        saved_at: Timestamp,
        current_session: Option<BrowsingSession>,
        history: Vec<BrowsingSession>,
    ) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            saved_at,
            current_session,
            history,
        }
    }

    /// Id of the persisted active session, if any.
    pub fn current_session_id(&self) -> Option<&SessionId> {
        self.current_session.as_ref().map(|s| &s.id)
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string_pretty(self).map_err(ProtocolError::malformed)
    }

    /// Parses a JSON document, rejecting unsupported format versions.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let state: Self = serde_json::from_str(s).map_err(ProtocolError::malformed)?;
        state.version.ensure_supported()?;
        Ok(state)
    }
}
