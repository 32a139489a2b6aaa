//! Integration tests for the tracker actor.
//!
//! These drive the tracker through `spawn_tracker_with()` and the
//! `TrackerHandle`, on a paused tokio clock so timer behavior is exact.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use tabtrack_core::{
    BrowsingEvent, CreatedBy, EndReason, EventPayload, EventType, IdleReason, TrackingConfig,
};
use tabtrackd::{
    spawn_tracker_with, ActivityUpdate, Clock, JsonFileStore, MemoryStore, SessionStore,
    TrackerError, TrackerHandle, TrackerOptions,
};
use tokio::sync::broadcast;
use tokio::time::sleep;

// ============================================================================
// Test Helpers
// ============================================================================

fn spawn(config: TrackingConfig) -> TrackerHandle {
    spawn_tracker_with(TrackerOptions::new(config).with_clock(Clock::starting_at(0)))
        .expect("config should be valid")
}

fn drain(rx: &mut broadcast::Receiver<BrowsingEvent>) -> Vec<BrowsingEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count(events: &[BrowsingEvent], kind: EventType) -> usize {
    events.iter().filter(|e| e.event_type() == kind).count()
}

fn ended_reasons(events: &[BrowsingEvent]) -> Vec<EndReason> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::SessionEnded { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Idle Detection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_start_fires_once_after_threshold() {
    let tracker = spawn(TrackingConfig {
        idle_threshold: 60_000,
        ..TrackingConfig::default()
    });
    tracker.initialize().await.unwrap();
    let mut events = tracker.subscribe();

    tracker
        .update_activity(ActivityUpdate::heartbeat())
        .await
        .unwrap();
    sleep(Duration::from_millis(60_001)).await;

    let events = drain(&mut events);
    assert_eq!(count(&events, EventType::IdleStart), 1);
    let idle = events
        .iter()
        .find(|e| e.event_type() == EventType::IdleStart)
        .unwrap();
    assert!(matches!(
        idle.payload,
        EventPayload::IdleStart {
            reason: IdleReason::UserInactive
        }
    ));
    assert!(tracker.idle_state().await.is_idle);
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_closes_session_and_restarts() {
    let tracker = spawn(TrackingConfig {
        idle_threshold: 60_000,
        ..TrackingConfig::default()
    });
    let first = tracker.initialize().await.unwrap().unwrap();
    let mut events = tracker.subscribe();

    // idle at 60s, timeout at 120s, successor at 121s
    sleep(Duration::from_millis(121_500)).await;

    let events = drain(&mut events);
    assert_eq!(ended_reasons(&events), vec![EndReason::IdleTimeout]);
    assert_eq!(count(&events, EventType::SessionStarted), 1);

    let history = tracker.session_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first);
    assert_eq!(history[0].idle_time, 60_000);

    let current = tracker.current_session().await.unwrap();
    assert_eq!(current.start_time, 121_000);
}

// ============================================================================
// Boundaries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_navigation_gap_fires_once_when_mean_crosses() {
    let tracker = spawn(TrackingConfig {
        idle_threshold: 0,
        session_gap_threshold: 300_000,
        domain_change_session_boundary: false,
        ..TrackingConfig::default()
    });
    tracker.initialize().await.unwrap();
    let mut events = tracker.subscribe();

    let mut at = 0;
    tracker
        .update_activity(ActivityUpdate::domain("docs.rs").at(at))
        .await
        .unwrap();

    for gap in [310_000, 320_000, 330_000, 340_000, 900_000] {
        at += gap;
        tracker
            .update_activity(ActivityUpdate::domain("docs.rs").at(at))
            .await
            .unwrap();
    }
    assert!(ended_reasons(&drain(&mut events)).is_empty());

    // mean of six gaps is 533_333 > 450_000
    at += 1_000_000;
    tracker
        .update_activity(ActivityUpdate::domain("docs.rs").at(at))
        .await
        .unwrap();

    let events = drain(&mut events);
    assert_eq!(ended_reasons(&events), vec![EndReason::NavigationGap]);
    assert_eq!(count(&events, EventType::BoundaryDetected), 1);
    assert_eq!(count(&events, EventType::SessionStarted), 1);
}

#[tokio::test(start_paused = true)]
async fn test_related_domains_do_not_split() {
    let tracker = spawn(TrackingConfig {
        work_domains: vec!["work.com".into()],
        social_domains: vec!["social.com".into()],
        ..TrackingConfig::default()
    });
    tracker.initialize().await.unwrap();
    let mut events = tracker.subscribe();

    for domain in ["mail.x.com", "docs.x.com"] {
        tracker
            .update_activity(ActivityUpdate::domain(domain))
            .await
            .unwrap();
    }
    assert!(drain(&mut events).is_empty());

    for domain in ["app.work.com", "feed.social.com"] {
        tracker
            .update_activity(ActivityUpdate::domain(domain))
            .await
            .unwrap();
    }
    // docs.x.com -> app.work.com is unclassified (0.5), work -> social is 0.8
    assert_eq!(
        ended_reasons(&drain(&mut events)),
        vec![EndReason::DomainChange]
    );
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_automatic_end_schedules_exactly_one_successor() {
    let tracker = spawn(TrackingConfig::default());
    tracker.initialize().await.unwrap();
    let mut events = tracker.subscribe();

    tracker
        .end_session_with(EndReason::NavigationGap)
        .await
        .unwrap();

    sleep(Duration::from_millis(999)).await;
    assert!(tracker.current_session().await.is_none());

    sleep(Duration::from_millis(5_000)).await;
    let events = drain(&mut events);
    assert_eq!(count(&events, EventType::SessionStarted), 1);

    let current = tracker.current_session().await.unwrap();
    assert_eq!(current.metadata.created_by, CreatedBy::Automatic);
    assert_eq!(current.start_time, 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_user_end_is_final_and_idempotent() {
    let tracker = spawn(TrackingConfig::default());
    tracker.initialize().await.unwrap();
    let mut events = tracker.subscribe();

    let metrics = tracker.end_session().await.unwrap();
    assert!(metrics.is_some());
    assert!(tracker.end_session().await.unwrap().is_none());

    sleep(Duration::from_secs(10)).await;
    let events = drain(&mut events);
    assert_eq!(ended_reasons(&events), vec![EndReason::UserInitiated]);
    assert_eq!(count(&events, EventType::SessionStarted), 0);
    assert!(tracker.current_session().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_active_session() {
    let tracker = spawn(TrackingConfig::default());
    tracker.initialize().await.unwrap();
    let mut events = tracker.subscribe();

    for tag in ["a", "b", "c"] {
        tracker
            .start_session(Some(tag.to_string()), None, None)
            .await
            .unwrap();
    }

    let history = tracker.session_history().await;
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|s| !s.is_active && s.end_time.is_some()));
    let current = tracker.current_session().await.unwrap();
    assert_eq!(current.tags, vec!["c".to_string()]);

    // Every start is preceded by the end of its predecessor.
    let kinds: Vec<EventType> = drain(&mut events).iter().map(|e| e.event_type()).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::SessionEnded,
            EventType::SessionStarted,
            EventType::SessionEnded,
            EventType::SessionStarted,
            EventType::SessionEnded,
            EventType::SessionStarted,
        ]
    );

    let stats = tracker.session_stats().await;
    assert_eq!(stats.total_sessions, 3);
    assert_eq!(stats.current_session_id, Some(current.id));
}

#[tokio::test(start_paused = true)]
async fn test_tracking_disabled_rejects_start() {
    let tracker = spawn(TrackingConfig {
        enable_session_tracking: false,
        ..TrackingConfig::default()
    });
    assert_eq!(tracker.initialize().await.unwrap(), None);

    let err = tracker.start_session(None, None, None).await.unwrap_err();
    assert!(matches!(err, TrackerError::TrackingDisabled));

    tracker
        .update_config(TrackingConfig::default())
        .await
        .unwrap();
    assert!(tracker.current_session().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_tagging_current_session() {
    let tracker = spawn(TrackingConfig::default());
    tracker.initialize().await.unwrap();

    assert!(tracker.tag_session("research").await.unwrap());
    assert!(!tracker.tag_session("research").await.unwrap());
    assert!(!tracker.tag_session("   ").await.unwrap());

    let current = tracker.current_session().await.unwrap();
    assert_eq!(current.tags, vec!["research".to_string()]);
}

#[tokio::test]
async fn test_invalid_config_rejected_at_spawn() {
    let result = spawn_tracker_with(TrackerOptions::new(TrackingConfig {
        unclassified_domain_significance: f64::NAN,
        ..TrackingConfig::default()
    }));
    assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store: Arc<dyn SessionStore> = Arc::new(JsonFileStore::new(&path));
    let tracker = spawn_tracker_with(
        TrackerOptions::new(TrackingConfig::default())
            .with_store(store.clone())
            .with_clock(Clock::starting_at(0)),
    )
    .unwrap();
    let first = tracker.initialize().await.unwrap().unwrap();
    let second = tracker
        .start_session(Some("deep-work".into()), None, Some(first.clone()))
        .await
        .unwrap();
    tracker
        .update_activity(ActivityUpdate::domain("docs.rs").at(10))
        .await
        .unwrap();
    tracker.shutdown().await.unwrap();
    assert!(path.exists());

    let restarted = spawn_tracker_with(
        TrackerOptions::new(TrackingConfig::default())
            .with_store(store)
            .with_clock(Clock::starting_at(50)),
    )
    .unwrap();
    assert_eq!(restarted.initialize().await.unwrap(), Some(second.clone()));

    let current = restarted.current_session().await.unwrap();
    assert_eq!(current.tags, vec!["deep-work".to_string()]);
    assert!(current.domains.contains("docs.rs"));
    assert_eq!(current.metadata.parent_session_id, Some(first.clone()));

    let history = restarted.session_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first);
    assert_eq!(history[0].metadata.child_session_ids, vec![second]);
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_state_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "garbage").unwrap();

    let tracker = spawn_tracker_with(
        TrackerOptions::new(TrackingConfig::default())
            .with_store(Arc::new(JsonFileStore::new(&path)))
            .with_clock(Clock::starting_at(0)),
    )
    .unwrap();

    assert!(tracker.initialize().await.unwrap().is_some());
    assert!(tracker.session_history().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_saves_on_session_changes() {
    let store = Arc::new(MemoryStore::new());
    let tracker = spawn_tracker_with(
        TrackerOptions::new(TrackingConfig::default())
            .with_store(store.clone())
            .with_clock(Clock::starting_at(0)),
    )
    .unwrap();
    tracker.initialize().await.unwrap();
    tracker.end_session().await.unwrap();
    tracker.shutdown().await.unwrap();

    let saved = store.snapshot().await.unwrap();
    assert!(saved.current_session.is_none());
    assert_eq!(saved.history.len(), 1);
}
