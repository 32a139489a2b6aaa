//! Session lifecycle manager using the actor pattern.
//!
//! The tracker owns every piece of mutable tracking state. Adapters talk to
//! it through a [`TrackerHandle`]; lifecycle events fan out on a broadcast
//! channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  TrackerCommand  ┌─────────────────┐  BrowsingEvent  ┌──────────────┐
//! │  Adapter/ingest │─────────────────▶│  TrackerActor   │────────────────▶│ Subscribers  │
//! └─────────────────┘   (mpsc)         └───────┬─────────┘   (broadcast)   └──────────────┘
//!                                        ▲     │ PersistedState (watch)
//!                          TimerFired    │     ▼
//!                        ┌───────────────┴─┐ ┌─────────────────┐
//!                        │  Timer tasks    │ │  Writer task    │──▶ SessionStore
//!                        └─────────────────┘ └─────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use tabtrack_core::TrackingConfig;

use crate::clock::Clock;
use crate::store::SessionStore;

mod actor;
mod commands;
mod handle;

pub use actor::{TrackerActor, AUTO_RESTART_DELAY};
pub use commands::{ActivityUpdate, TimerKind, TrackerCommand, TrackerError};
pub use handle::TrackerHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Everything needed to start a tracker.
pub struct TrackerOptions {
    pub config: TrackingConfig,
    /// Where state is loaded from and saved to; `None` keeps it in memory only.
    pub store: Option<Arc<dyn SessionStore>>,
    pub clock: Clock,
}

impl TrackerOptions {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            store: None,
            clock: Clock::system(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// Spawns the tracker actor with the system clock.
///
/// The tracker starts uninitialized; call [`TrackerHandle::initialize`].
///
/// # Errors
///
/// - `TrackerError::InvalidConfig` if `config` fails validation
pub fn spawn_tracker(
    config: TrackingConfig,
    store: Option<Arc<dyn SessionStore>>,
) -> Result<TrackerHandle, TrackerError> {
    spawn_tracker_with(TrackerOptions {
        store,
        ..TrackerOptions::new(config)
    })
}

/// Spawns the tracker actor from explicit options.
///
/// Must be called from within a tokio runtime.
pub fn spawn_tracker_with(options: TrackerOptions) -> Result<TrackerHandle, TrackerError> {
    options.config.validate()?;

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = TrackerActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        event_tx.clone(),
        options.config,
        options.store,
        options.clock,
    );
    tokio::spawn(actor.run());

    Ok(TrackerHandle::new(cmd_tx, event_tx))
}
