//! Tracker actor - owns all session state and processes commands.
//!
//! The actor is the single owner of the current session, the closed-session
//! history, the idle detector, and the boundary policy. Commands are handled
//! one at a time, so a boundary decision, the end of the old session, and the
//! start of its successor are never interleaved with other work.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - Reply send failures are ignored (the caller went away)
//! - The only assertion guards use before `initialize`, in debug builds

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

use tabtrack_core::{
    BoundaryDecision, BoundaryPolicy, BoundaryType, BrowsingEvent, BrowsingSession, CreatedBy,
    EndReason, EventPayload, IdleDetector, IdleReason, IdleTransition, ProductivityMetrics,
    SessionBoundary, SessionId, SessionStats, Timestamp, TrackingConfig,
};
use tabtrack_protocol::PersistedState;

use super::commands::{ActivityUpdate, TimerKind, TrackerCommand, TrackerError};
use crate::clock::Clock;
use crate::store::{spawn_persister, Persister, SessionStore};
use crate::timer::Timer;

/// Grace period before an automatically ended session gets a successor.
pub const AUTO_RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
}

// ============================================================================
// Timer Slots
// ============================================================================

struct ArmedTimer {
    ticket: u64,
    _timer: Timer,
}

/// One slot per timer kind. Re-arming replaces (and aborts) the old timer.
///
/// Every arming gets a fresh ticket; a `TimerFired` whose ticket is not the
/// slot's current one was cancelled or superseded and is ignored.
#[derive(Default)]
struct TimerSlots {
    next_ticket: u64,
    idle_countdown: Option<ArmedTimer>,
    idle_timeout: Option<ArmedTimer>,
    auto_restart: Option<ArmedTimer>,
}

impl TimerSlots {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<ArmedTimer> {
        match kind {
            TimerKind::IdleCountdown => &mut self.idle_countdown,
            TimerKind::IdleTimeout => &mut self.idle_timeout,
            TimerKind::AutoRestart => &mut self.auto_restart,
        }
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration, target: &mpsc::WeakSender<TrackerCommand>) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let timer = Timer::after(
            delay,
            target.clone(),
            TrackerCommand::TimerFired { kind, ticket },
        );
        trace!(timer = %kind, ticket, delay_ms = delay.as_millis() as u64, "Timer armed");
        *self.slot(kind) = Some(ArmedTimer {
            ticket,
            _timer: timer,
        });
    }

    fn cancel(&mut self, kind: TimerKind) {
        if self.slot(kind).take().is_some() {
            trace!(timer = %kind, "Timer cancelled");
        }
    }

    /// Clears the slot if `ticket` is its current arming.
    fn claim(&mut self, kind: TimerKind, ticket: u64) -> bool {
        let slot = self.slot(kind);
        if slot.as_ref().is_some_and(|armed| armed.ticket == ticket) {
            *slot = None;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    fn is_armed(&mut self, kind: TimerKind) -> bool {
        self.slot(kind).is_some()
    }
}

// ============================================================================
// Tracker Actor
// ============================================================================

/// The tracker actor.
///
/// Created by [`spawn_tracker`](super::spawn_tracker); drive it with
/// [`run`](Self::run) on its own task.
pub struct TrackerActor {
    receiver: mpsc::Receiver<TrackerCommand>,

    /// Weak handle to our own command channel, for timers.
    scheduler: mpsc::WeakSender<TrackerCommand>,

    event_publisher: broadcast::Sender<BrowsingEvent>,

    clock: Clock,
    config: TrackingConfig,
    phase: Phase,

    current: Option<BrowsingSession>,
    history: HashMap<SessionId, BrowsingSession>,
    /// Most recently closed session; the only valid predecessor for a start boundary.
    last_closed: Option<SessionId>,

    idle: IdleDetector,
    policy: BoundaryPolicy,
    timers: TimerSlots,

    store: Option<Arc<dyn SessionStore>>,
    persister: Option<Persister>,
}

impl TrackerActor {
    /// Creates an actor. `config` must already be validated.
    pub fn new(
        receiver: mpsc::Receiver<TrackerCommand>,
        scheduler: mpsc::WeakSender<TrackerCommand>,
        event_publisher: broadcast::Sender<BrowsingEvent>,
        config: TrackingConfig,
        store: Option<Arc<dyn SessionStore>>,
        clock: Clock,
    ) -> Self {
        Self {
            receiver,
            scheduler,
            event_publisher,
            clock,
            idle: IdleDetector::new(config.idle_threshold),
            policy: BoundaryPolicy::from_config(&config),
            config,
            phase: Phase::Uninitialized,
            current: None,
            history: HashMap::new(),
            last_closed: None,
            timers: TimerSlots::default(),
            store,
            persister: None,
        }
    }

    /// Runs the actor until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Tracker actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if self.handle_command(cmd).await.is_break() {
                break;
            }
        }

        self.flush().await;
        info!(history = self.history.len(), "Tracker actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: TrackerCommand) -> ControlFlow<()> {
        match cmd {
            TrackerCommand::Initialize { respond_to } => {
                let result = self.handle_initialize().await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::StartSession {
                tag,
                purpose,
                parent_session_id,
                respond_to,
            } => {
                let result = self.handle_start_session(tag, purpose, parent_session_id);
                let _ = respond_to.send(result);
            }
            TrackerCommand::EndSession { reason, respond_to } => {
                let result = self.handle_end_session(reason);
                let _ = respond_to.send(result);
            }
            TrackerCommand::UpdateActivity { update, respond_to } => {
                self.handle_update_activity(update);
                let _ = respond_to.send(());
            }
            TrackerCommand::SetIdle {
                is_idle,
                reason,
                timestamp,
                respond_to,
            } => {
                self.handle_set_idle(is_idle, reason, timestamp);
                let _ = respond_to.send(());
            }
            TrackerCommand::ProcessBoundary {
                boundary,
                respond_to,
            } => {
                let result = self.ensure_running().map(|()| self.apply_boundary(boundary));
                let _ = respond_to.send(result);
            }
            TrackerCommand::TagSession { tag, respond_to } => {
                let result = self.handle_tag_session(tag);
                let _ = respond_to.send(result);
            }
            TrackerCommand::UpdateConfig { config, respond_to } => {
                let result = self.handle_update_config(*config);
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetCurrentSession { respond_to } => {
                let _ = respond_to.send(self.current.clone());
            }
            TrackerCommand::GetSessionHistory { respond_to } => {
                let _ = respond_to.send(self.sorted_history());
            }
            TrackerCommand::GetSessionStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
            TrackerCommand::GetIdleState { respond_to } => {
                let _ = respond_to.send(self.idle.state());
            }
            TrackerCommand::TimerFired { kind, ticket } => {
                self.handle_timer(kind, ticket);
            }
            TrackerCommand::Shutdown { respond_to } => {
                self.flush().await;
                let _ = respond_to.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn handle_initialize(&mut self) -> Result<Option<SessionId>, TrackerError> {
        if self.phase == Phase::Running {
            debug!("Tracker already initialized");
            return Ok(self.current_id());
        }

        if let Some(store) = self.store.clone() {
            match store.load().await {
                Ok(Some(state)) => self.restore(state),
                Ok(None) => debug!("No persisted tracker state"),
                Err(e) => warn!(error = %e, "Ignoring unreadable tracker state"),
            }
            self.persister = Some(spawn_persister(store));
        }

        self.phase = Phase::Running;
        let now = self.clock.now();

        if self.config.enable_session_tracking {
            // Startup counts as a sign of life for the idle countdown.
            self.idle.on_activity(now);
            self.rearm_idle_countdown();
            if self.current.is_none() {
                self.open_session(CreatedBy::Automatic, now, None, None, None);
            }
        } else if self.current.is_some() {
            self.close_current(EndReason::TrackingDisabled, now);
        }

        self.persist();
        info!(
            session_id = ?self.current_id().map(|id| id.short().to_string()),
            history = self.history.len(),
            "Tracker initialized"
        );
        Ok(self.current_id())
    }

    fn restore(&mut self, state: PersistedState) {
        for mut session in state.history {
            session.is_active = false;
            if session.end_time.is_none() {
                session.end_time = Some(session.last_activity.max(session.start_time));
            }
            self.history.insert(session.id.clone(), session);
        }
        self.last_closed = self
            .history
            .values()
            .max_by_key(|s| s.end_time)
            .map(|s| s.id.clone());

        if let Some(mut session) = state.current_session {
            session.is_active = true;
            session.end_time = None;
            session.metadata.end_reason = None;
            info!(session_id = %session.id, "Resumed persisted session");
            self.current = Some(session);
        }
    }

    fn handle_start_session(
        &mut self,
        tag: Option<String>,
        purpose: Option<String>,
        parent_session_id: Option<SessionId>,
    ) -> Result<SessionId, TrackerError> {
        self.ensure_running()?;
        if !self.config.enable_session_tracking {
            return Err(TrackerError::TrackingDisabled);
        }

        let now = self.clock.now();
        self.close_current(EndReason::UserInitiated, now);
        Ok(self.open_session(CreatedBy::User, now, tag, purpose, parent_session_id))
    }

    fn handle_end_session(
        &mut self,
        reason: EndReason,
    ) -> Result<Option<ProductivityMetrics>, TrackerError> {
        self.ensure_running()?;

        let metrics = self.close_current(reason, self.clock.now());
        if metrics.is_none() {
            debug!(reason = %reason, "End requested with no active session");
        }
        if reason == EndReason::UserInitiated {
            self.timers.cancel(TimerKind::IdleTimeout);
            self.timers.cancel(TimerKind::AutoRestart);
        }
        Ok(metrics)
    }

    fn handle_tag_session(&mut self, tag: String) -> Result<bool, TrackerError> {
        self.ensure_running()?;

        let Some(session) = self.current.as_mut() else {
            debug!("Tag requested with no active session");
            return Ok(false);
        };
        let added = session.add_tag(tag);
        if added {
            debug!(session_id = %session.id, tags = ?session.tags, "Session tagged");
            self.persist();
        }
        Ok(added)
    }

    fn handle_update_config(&mut self, config: TrackingConfig) -> Result<(), TrackerError> {
        config.validate()?;

        let was_enabled = self.config.enable_session_tracking;
        self.idle.set_threshold(config.idle_threshold);
        self.policy.reconfigure(&config);
        self.config = config;

        info!(
            enabled = self.config.enable_session_tracking,
            idle_threshold_ms = self.config.idle_threshold,
            gap_threshold_ms = self.config.session_gap_threshold,
            domain_change = self.config.domain_change_session_boundary,
            "Tracking config updated"
        );

        if self.phase != Phase::Running {
            return Ok(());
        }

        let now = self.clock.now();
        match (was_enabled, self.config.enable_session_tracking) {
            (true, false) => {
                self.close_current(EndReason::TrackingDisabled, now);
                self.timers.cancel(TimerKind::AutoRestart);
                self.timers.cancel(TimerKind::IdleTimeout);
            }
            (false, true) => {
                if let Some(transition) = self.idle.on_activity(now) {
                    self.apply_idle_transition(transition);
                }
                if self.current.is_none() {
                    self.open_session(CreatedBy::Automatic, now, None, None, None);
                }
            }
            _ => {}
        }

        self.rearm_idle_countdown();
        self.rearm_idle_timeout();
        Ok(())
    }

    /// Starts a new session and makes it current.
    ///
    /// Callers must have closed the previous session first.
    fn open_session(
        &mut self,
        created_by: CreatedBy,
        at: Timestamp,
        tag: Option<String>,
        purpose: Option<String>,
        parent_session_id: Option<SessionId>,
    ) -> SessionId {
        debug_assert!(self.current.is_none(), "previous session still active");

        let mut session = BrowsingSession::new(created_by, at);
        if let Some(tag) = tag {
            session.add_tag(tag);
        }
        session.metadata.purpose = purpose.filter(|p| !p.trim().is_empty());

        if let Some(parent_id) = parent_session_id {
            match self.history.get_mut(&parent_id) {
                Some(parent) => {
                    parent.metadata.child_session_ids.push(session.id.clone());
                    session.metadata.parent_session_id = Some(parent_id);
                }
                None => debug!(parent = %parent_id, "Parent session not in history, not linked"),
            }
        }

        self.timers.cancel(TimerKind::AutoRestart);

        let id = session.id.clone();
        info!(
            session_id = %id,
            created_by = %created_by,
            tags = ?session.tags,
            "Session started"
        );
        self.emit(
            Some(id.clone()),
            at,
            EventPayload::SessionStarted {
                created_by,
                purpose: session.metadata.purpose.clone(),
                parent_session_id: session.metadata.parent_session_id.clone(),
                tags: session.tags.clone(),
            },
        );
        self.current = Some(session);
        self.persist();
        id
    }

    /// Closes the current session, if any, and moves it to history.
    ///
    /// Non-user reasons arm the automatic restart timer.
    fn close_current(&mut self, reason: EndReason, at: Timestamp) -> Option<ProductivityMetrics> {
        let mut session = self.current.take()?;

        let idle = self.idle.state();
        if let Some(idle_start) = idle.idle_start.filter(|_| idle.is_idle) {
            session.add_idle_interval(idle_start, at);
        }
        session.close(reason, at);

        let ended_at = session.end_time.unwrap_or(at);
        let metrics = ProductivityMetrics::calculate(&session, ended_at);
        let id = session.id.clone();

        info!(
            session_id = %id,
            reason = %reason,
            total_ms = metrics.total_time,
            active_ms = metrics.active_time,
            idle_ms = metrics.idle_time,
            focus_score = metrics.focus_score,
            "Session ended"
        );

        self.timers.cancel(TimerKind::IdleTimeout);
        self.emit(
            Some(id.clone()),
            ended_at,
            EventPayload::SessionEnded {
                reason,
                session: Box::new(session.clone()),
                metrics: metrics.clone(),
            },
        );
        self.history.insert(id.clone(), session);
        self.last_closed = Some(id);

        if reason.restarts_automatically() && self.config.enable_session_tracking {
            self.timers
                .arm(TimerKind::AutoRestart, AUTO_RESTART_DELAY, &self.scheduler);
        } else {
            self.timers.cancel(TimerKind::AutoRestart);
        }

        self.persist();
        Some(metrics)
    }

    // ========================================================================
    // Activity and Idle
    // ========================================================================

    fn handle_update_activity(&mut self, update: ActivityUpdate) {
        if self.phase != Phase::Running {
            warn!("Activity received before initialize, ignoring");
            return;
        }
        if !self.config.enable_session_tracking {
            return;
        }

        let signal = update.into_signal(self.clock.now());
        let at = signal.timestamp;

        let transition = self.idle.on_activity(at);
        let idle_since = match transition {
            Some(IdleTransition::Ended { started_at, .. }) => Some(started_at),
            _ => None,
        };
        if let Some(transition) = transition {
            self.apply_idle_transition(transition);
        }

        // Boundaries are judged against the session as it was before this signal.
        let decisions = match self.current.as_ref() {
            Some(session) => self.policy.evaluate(session, &signal),
            None => Vec::new(),
        };
        for decision in decisions {
            self.apply_decision(decision);
        }

        match self.current.as_mut() {
            Some(session) => {
                let domain = signal.effective_domain();
                session.record_activity(
                    at,
                    idle_since,
                    signal.tab_id,
                    signal.window_id,
                    domain.as_deref(),
                );
                trace!(
                    session_id = %session.id,
                    domain = ?domain,
                    events = session.event_count,
                    "Activity recorded"
                );
            }
            None => debug!("Activity with no active session"),
        }

        self.rearm_idle_countdown();
    }

    fn handle_set_idle(
        &mut self,
        is_idle: bool,
        reason: Option<IdleReason>,
        timestamp: Option<Timestamp>,
    ) {
        if self.phase != Phase::Running {
            warn!("Idle state received before initialize, ignoring");
            return;
        }
        let at = timestamp.unwrap_or_else(|| self.clock.now());
        match self.idle.set_idle(is_idle, reason, at) {
            Some(transition) => self.apply_idle_transition(transition),
            None => trace!(is_idle, "Idle state unchanged"),
        }
    }

    fn apply_idle_transition(&mut self, transition: IdleTransition) {
        match transition {
            IdleTransition::Started { at, reason } => {
                info!(at, reason = %reason, "User went idle");
                self.timers.cancel(TimerKind::IdleCountdown);
                self.emit(self.current_id(), at, EventPayload::IdleStart { reason });
                self.rearm_idle_timeout();
            }
            IdleTransition::Ended {
                started_at,
                at,
                duration,
                reason,
            } => {
                info!(duration_ms = duration, reason = %reason, "User returned from idle");
                self.timers.cancel(TimerKind::IdleTimeout);
                if let Some(session) = self.current.as_mut() {
                    session.add_idle_interval(started_at, at);
                }
                self.emit(
                    self.current_id(),
                    at,
                    EventPayload::IdleEnd { reason, duration },
                );
                self.rearm_idle_countdown();
            }
        }
    }

    fn rearm_idle_countdown(&mut self) {
        match self.idle.countdown_deadline() {
            Some(deadline) if self.config.enable_session_tracking => {
                let delay = self.clock.until(deadline);
                self.timers
                    .arm(TimerKind::IdleCountdown, delay, &self.scheduler);
            }
            _ => self.timers.cancel(TimerKind::IdleCountdown),
        }
    }

    /// Arms the idle timeout one threshold after idle began, if a session
    /// is open and idle detection is on.
    fn rearm_idle_timeout(&mut self) {
        let state = self.idle.state();
        match state.idle_start.filter(|_| state.is_idle) {
            Some(idle_start) if self.current.is_some() && self.idle.is_enabled() => {
                let deadline = idle_start.saturating_add(self.idle.threshold_ms());
                let delay = self.clock.until(deadline);
                self.timers.arm(TimerKind::IdleTimeout, delay, &self.scheduler);
            }
            _ => self.timers.cancel(TimerKind::IdleTimeout),
        }
    }

    // ========================================================================
    // Boundaries and Timers
    // ========================================================================

    fn apply_decision(&mut self, decision: BoundaryDecision) {
        let BoundaryDecision { end, start } = decision;
        if self.apply_boundary(end) {
            self.apply_boundary(start);
        }
    }

    /// Applies one boundary. Returns false for stale or unknown boundaries.
    fn apply_boundary(&mut self, boundary: SessionBoundary) -> bool {
        match boundary.boundary_type {
            BoundaryType::End => {
                if self.current_id().as_ref() != Some(&boundary.session_id) {
                    debug!(session_id = %boundary.session_id, "Ignoring stale end boundary");
                    return false;
                }
                let (reason, at) = (boundary.reason, boundary.timestamp);
                info!(
                    session_id = %boundary.session_id,
                    reason = %reason,
                    significance = ?boundary.metadata.significance,
                    gap_ms = ?boundary.metadata.gap_ms,
                    "Session boundary detected"
                );
                self.emit(
                    Some(boundary.session_id.clone()),
                    at,
                    EventPayload::BoundaryDetected { boundary },
                );
                self.close_current(reason, at);
                true
            }
            BoundaryType::Start => {
                let follows_last = self.last_closed.as_ref() == Some(&boundary.session_id);
                if self.current.is_some() || !follows_last {
                    debug!(after = %boundary.session_id, "Ignoring stale start boundary");
                    return false;
                }
                if !self.config.enable_session_tracking {
                    return false;
                }
                self.open_session(CreatedBy::Automatic, boundary.timestamp, None, None, None);
                true
            }
        }
    }

    fn handle_timer(&mut self, kind: TimerKind, ticket: u64) {
        if !self.timers.claim(kind, ticket) {
            trace!(timer = %kind, ticket, "Ignoring superseded timer");
            return;
        }

        let now = self.clock.now();
        match kind {
            TimerKind::IdleCountdown => match self.idle.on_countdown_elapsed(now) {
                Some(transition) => self.apply_idle_transition(transition),
                None => self.rearm_idle_countdown(),
            },
            TimerKind::IdleTimeout => {
                if self.idle.is_idle() {
                    self.close_current(EndReason::IdleTimeout, now);
                }
            }
            TimerKind::AutoRestart => {
                if self.config.enable_session_tracking && self.current.is_none() {
                    self.open_session(CreatedBy::Automatic, now, None, None, None);
                } else {
                    debug!("Automatic restart no longer needed");
                }
            }
        }
    }

    // ========================================================================
    // Queries and Persistence
    // ========================================================================

    fn ensure_running(&self) -> Result<(), TrackerError> {
        debug_assert!(
            self.phase == Phase::Running,
            "tracker used before initialize"
        );
        if self.phase == Phase::Running {
            Ok(())
        } else {
            Err(TrackerError::NotInitialized)
        }
    }

    fn current_id(&self) -> Option<SessionId> {
        self.current.as_ref().map(|s| s.id.clone())
    }

    fn sorted_history(&self) -> Vec<BrowsingSession> {
        let mut sessions: Vec<_> = self.history.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        sessions
    }

    fn stats(&self) -> SessionStats {
        let now = self.clock.now();
        let idle = self.idle.state();

        let mut total_active: u64 = 0;
        let mut total_idle: u64 = 0;
        let mut focus_sum = 0.0;
        for session in self.history.values() {
            total_active = total_active.saturating_add(session.active_time);
            total_idle = total_idle.saturating_add(session.idle_time);
            focus_sum += ProductivityMetrics::calculate(session, now).focus_score;
        }

        let mut stats = SessionStats {
            total_sessions: self.history.len(),
            is_idle: idle.is_idle,
            ..SessionStats::default()
        };

        if let Some(session) = &self.current {
            // Idle time of an ongoing idle interval is not on the session yet.
            let live_idle = idle
                .idle_start
                .filter(|_| idle.is_idle)
                .map_or(0, |start| now.saturating_sub(start.max(session.start_time)));
            total_active = total_active.saturating_add(session.active_time);
            total_idle = total_idle
                .saturating_add(session.idle_time)
                .saturating_add(live_idle);
            stats.current_session_id = Some(session.id.clone());
            stats.current_session_duration = session.total_time(now);
        }

        stats.total_active_time = total_active;
        stats.total_idle_time = total_idle;
        if !self.history.is_empty() {
            stats.average_focus_score = focus_sum / self.history.len() as f64;
        }
        stats
    }

    fn snapshot(&self) -> PersistedState {
        PersistedState::new(self.clock.now(), self.current.clone(), self.sorted_history())
    }

    fn persist(&self) {
        if let Some(persister) = &self.persister {
            persister.publish(self.snapshot());
        }
    }

    /// Writes a final snapshot and stops the writer.
    async fn flush(&mut self) {
        let state = self.snapshot();
        if let Some(persister) = self.persister.take() {
            persister.finish(state).await;
            debug!("Final tracker state written");
        }
    }

    fn emit(&self, session_id: Option<SessionId>, timestamp: Timestamp, payload: EventPayload) {
        let event = BrowsingEvent::new(session_id, timestamp, payload);
        trace!(event = %event.event_type(), "Publishing event");
        // No subscribers is fine.
        let _ = self.event_publisher.send(event);
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    #[cfg(test)]
    fn is_armed(&mut self, kind: TimerKind) -> bool {
        self.timers.is_armed(kind)
    }
}
