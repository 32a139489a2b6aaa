//! tabtrack Core - Session boundary detection and productivity tracking
//!
//! This crate holds the synchronous, I/O-free half of the tracker:
//! - `session` - the `BrowsingSession` entity and its identifiers
//! - `event` - activity signals in, lifecycle events and boundaries out
//! - `idle` - idle detector state machine (timers live in the daemon)
//! - `boundary` - navigation-gap and domain-change heuristics
//! - `productivity` - focus score and per-session metrics
//! - `config` - `TrackingConfig` and its validation
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod boundary;
pub mod config;
pub mod domain;
pub mod event;
pub mod idle;
pub mod productivity;
pub mod session;

// Re-exports for convenience
pub use boundary::{BoundaryDecision, BoundaryPolicy, GapWindow, GAP_WINDOW_CAPACITY};
pub use config::{ConfigError, TrackingConfig};
pub use domain::{host_from_url, is_related, root_domain, DomainCategory, DomainClassifier};
pub use event::{
    ActivitySignal, BoundaryMetadata, BoundaryType, BrowsingEvent, EventPayload, EventType,
    SessionBoundary,
};
pub use idle::{IdleDetector, IdleReason, IdleState, IdleTransition};
pub use productivity::ProductivityMetrics;
pub use session::{
    BrowsingSession, CreatedBy, EndReason, SessionId, SessionMetadata, SessionStats, TabId,
    Timestamp, WindowId, MAX_ACTIVE_GAP_MS,
};
