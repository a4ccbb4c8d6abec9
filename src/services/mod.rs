//! Service layer for the gradebook
//!
//! Services sit between callers (the CLI, a web layer) and the repository
//! functions in `db`. They own configuration defaults and emit events after
//! successful writes.
//!
//! ```text
//! Callers
//!     ↓
//! GradebookService
//!     ↓
//! Repository layer (db/*.rs) + analytics
//!     ↓
//! SQLite
//! ```

pub mod events;
pub mod gradebook_service;

pub use events::{spawn_logging_listener, EventBus, EventListener, GradebookEvent, LoggingEventListener};
pub use gradebook_service::GradebookService;

use std::sync::Arc;

use crate::config::Config;
use crate::db::GradebookDb;

/// Service container with a shared database and event bus
pub struct Services {
    pub gradebook: Arc<GradebookService>,
    pub events: Arc<EventBus>,
}

impl Services {
    pub fn new(db: Arc<GradebookDb>, config: Config) -> Self {
        let events = Arc::new(EventBus::with_capacity(config.event_bus_capacity));

        Self {
            gradebook: Arc::new(GradebookService::new(db, events.clone(), config)),
            events,
        }
    }
}
