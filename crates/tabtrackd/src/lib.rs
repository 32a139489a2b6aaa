//! tabtrack daemon - session lifecycle, timers, and persistence.
//!
//! - `tracker` - actor that owns sessions and turns activity into lifecycle events
//! - `store` - session persistence (`SessionStore`, JSON file and in-memory)
//! - `ingest` - newline-delimited JSON loop between the browser adapter and the tracker
//! - `clock` / `timer` - monotonic epoch-ms clock and cancellable one-shot timers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         tabtrackd                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  stdin ──▶ ┌──────────────┐  commands   ┌────────────────┐   │
//! │            │ run_ingest   │────────────▶│ TrackerActor   │   │
//! │  stdout ◀─ │              │◀────────────│ (state owner)  │   │
//! │            └──────────────┘   events    └───────┬────────┘   │
//! │                                                 │ snapshots  │
//! │                                                 ▼            │
//! │                                         ┌────────────────┐   │
//! │                                         │ SessionStore   │   │
//! │                                         └────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code avoids `.unwrap()`, `.expect()`, `panic!()`; fallible
//! operations return `Result` and channel closure is handled gracefully.
//! The one exception is a debug assertion against using the tracker before
//! `initialize`.

pub mod clock;
pub mod ingest;
pub mod store;
pub mod timer;
pub mod tracker;

pub use clock::Clock;
pub use ingest::{run_ingest, IngestError, IngestSummary};
pub use store::{JsonFileStore, MemoryStore, SessionStore, StoreError};
pub use tracker::{
    spawn_tracker, spawn_tracker_with, ActivityUpdate, TrackerError, TrackerHandle, TrackerOptions,
};
