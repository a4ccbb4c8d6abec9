//! Event system for gradebook writes
//!
//! Services publish an event after each successful write. Subscribers use
//! them for audit logging and for invalidating views built on the cache.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::db::UpsertOutcome;

/// Events emitted by the gradebook service
#[derive(Debug, Clone, PartialEq)]
pub enum GradebookEvent {
    GradeRecorded {
        user_id: i64,
        course_id: String,
        grade: f64,
        outcome: UpsertOutcome,
    },
    HistoryAppended {
        user_id: i64,
        course_id: String,
        grade: f64,
        proforma_grade: f64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &GradebookEvent);
}

/// Broadcast bus for gradebook events
pub struct EventBus {
    sender: broadcast::Sender<GradebookEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: GradebookEvent) {
        trace!(event = ?event, "Emitting gradebook event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GradebookEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every write at debug level
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &GradebookEvent) {
        match event {
            GradebookEvent::GradeRecorded {
                user_id,
                course_id,
                grade,
                outcome,
            } => {
                debug!(user_id, course_id = %course_id, grade, outcome = ?outcome, "Grade recorded");
            }
            GradebookEvent::HistoryAppended {
                user_id,
                course_id,
                grade,
                proforma_grade,
            } => {
                debug!(
                    user_id,
                    course_id = %course_id,
                    grade,
                    proforma_grade,
                    "Grade history appended"
                );
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
