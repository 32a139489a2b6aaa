//! Client interface for the tracker actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()` in this module
//! - Channel errors are mapped to `TrackerError::ChannelClosed`
//! - Queries degrade to empty values when the actor is gone

use tokio::sync::{broadcast, mpsc, oneshot};

use tabtrack_core::{
    BrowsingEvent, BrowsingSession, EndReason, IdleReason, IdleState, ProductivityMetrics,
    SessionBoundary, SessionId, SessionStats, Timestamp, TrackingConfig,
};

use super::commands::{ActivityUpdate, TrackerCommand, TrackerError};

/// Cheap-to-clone handle to the tracker actor.
///
/// ```ignore
/// let tracker = spawn_tracker(config, None)?;
/// let mut events = tracker.subscribe();
/// tracker.initialize().await?;
/// tracker.update_activity(ActivityUpdate::domain("docs.rs")).await?;
/// ```
#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<TrackerCommand>,
    event_sender: broadcast::Sender<BrowsingEvent>,
}

impl TrackerHandle {
    pub fn new(
        sender: mpsc::Sender<TrackerCommand>,
        event_sender: broadcast::Sender<BrowsingEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a request and waits for the reply.
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> TrackerCommand,
    ) -> Result<T, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;
        rx.await.map_err(|_| TrackerError::ChannelClosed)
    }

    /// Restores persisted state and opens a session if none was active.
    ///
    /// Returns the id of the active session. Safe to call more than once.
    pub async fn initialize(&self) -> Result<Option<SessionId>, TrackerError> {
        self.request(|respond_to| TrackerCommand::Initialize { respond_to })
            .await?
    }

    /// Starts a user session, ending the current one first.
    ///
    /// # Errors
    ///
    /// - `TrackerError::NotInitialized` before `initialize`
    /// - `TrackerError::TrackingDisabled` while tracking is off
    pub async fn start_session(
        &self,
        tag: Option<String>,
        purpose: Option<String>,
        parent_session_id: Option<SessionId>,
    ) -> Result<SessionId, TrackerError> {
        self.request(|respond_to| TrackerCommand::StartSession {
            tag,
            purpose,
            parent_session_id,
            respond_to,
        })
        .await?
    }

    /// Ends the current session as a user action. Idempotent: returns
    /// `None` if nothing was active.
    pub async fn end_session(&self) -> Result<Option<ProductivityMetrics>, TrackerError> {
        self.end_session_with(EndReason::UserInitiated).await
    }

    /// Ends the current session with an explicit reason.
    pub async fn end_session_with(
        &self,
        reason: EndReason,
    ) -> Result<Option<ProductivityMetrics>, TrackerError> {
        self.request(|respond_to| TrackerCommand::EndSession { reason, respond_to })
            .await?
    }

    /// Records activity. Only fails if the actor is gone.
    pub async fn update_activity(&self, update: ActivityUpdate) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::UpdateActivity { update, respond_to })
            .await
    }

    /// Forces the idle state, e.g. from a native idle API.
    pub async fn set_idle(
        &self,
        is_idle: bool,
        reason: Option<IdleReason>,
        timestamp: Option<Timestamp>,
    ) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::SetIdle {
            is_idle,
            reason,
            timestamp,
            respond_to,
        })
        .await
    }

    /// Applies an externally produced boundary. Returns false if it was stale.
    pub async fn process_boundary(&self, boundary: SessionBoundary) -> Result<bool, TrackerError> {
        self.request(|respond_to| TrackerCommand::ProcessBoundary {
            boundary,
            respond_to,
        })
        .await?
    }

    /// Tags the current session. Returns false if there is none or the tag
    /// was already present.
    pub async fn tag_session(&self, tag: impl Into<String>) -> Result<bool, TrackerError> {
        let tag = tag.into();
        self.request(|respond_to| TrackerCommand::TagSession { tag, respond_to })
            .await?
    }

    /// Replaces the tracking config.
    ///
    /// # Errors
    ///
    /// - `TrackerError::InvalidConfig` if validation fails; the old config stays
    pub async fn update_config(&self, config: TrackingConfig) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::UpdateConfig {
            config: Box::new(config),
            respond_to,
        })
        .await?
    }

    /// Returns the active session, or `None` if there is none or the actor is gone.
    pub async fn current_session(&self) -> Option<BrowsingSession> {
        self.request(|respond_to| TrackerCommand::GetCurrentSession { respond_to })
            .await
            .ok()
            .flatten()
    }

    /// Closed sessions ordered by start time.
    pub async fn session_history(&self) -> Vec<BrowsingSession> {
        self.request(|respond_to| TrackerCommand::GetSessionHistory { respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn session_stats(&self) -> SessionStats {
        self.request(|respond_to| TrackerCommand::GetSessionStats { respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn idle_state(&self) -> IdleState {
        self.request(|respond_to| TrackerCommand::GetIdleState { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Writes a final snapshot and stops the actor.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::Shutdown { respond_to })
            .await
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<BrowsingEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true if the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (tx, _rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(10);
        let handle = TrackerHandle::new(tx, event_tx);
        let handle2 = handle.clone();
        drop(handle2);
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_closed_channel_maps_to_error() {
        let (tx, rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(10);
        let handle = TrackerHandle::new(tx, event_tx);
        drop(rx);

        assert!(matches!(
            handle.initialize().await,
            Err(TrackerError::ChannelClosed)
        ));
        assert!(matches!(
            handle.update_activity(ActivityUpdate::heartbeat()).await,
            Err(TrackerError::ChannelClosed)
        ));
        assert!(handle.current_session().await.is_none());
        assert!(handle.session_history().await.is_empty());
        assert_eq!(handle.session_stats().await, SessionStats::default());
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let (tx, _rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(10);
        let handle = TrackerHandle::new(tx, event_tx.clone());

        let mut events = handle.subscribe();
        let event = BrowsingEvent::new(
            None,
            5,
            tabtrack_core::EventPayload::IdleStart {
                reason: IdleReason::SystemIdle,
            },
        );
        event_tx.send(event.clone()).unwrap();
        assert_eq!(events.recv().await.unwrap(), event);
    }
}
