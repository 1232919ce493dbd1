//! Notification sinks

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use super::types::EngineEvent;

/// Errors a sink may report; the dispatcher logs them and carries on
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Receiver of loop events
///
/// Sinks get a shared reference to each event and never see engine-owned
/// collections directly.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Deliver one event
    async fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError>;

    /// Called once when the channel closes
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EngineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        debug!("MemorySink::new: called");
        Self::default()
    }

    /// Copy of the events received so far
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| SinkError::Rejected("memory sink lock poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}

/// Sink that writes a one-line summary of each event to the tracing log
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError> {
        match event {
            EngineEvent::StatusChanged { instance_id, from, to } => {
                info!(%instance_id, %from, %to, "status changed");
            }
            EngineEvent::ReflectionRecorded {
                instance_id, attempt, ..
            } => {
                info!(%instance_id, attempt, "reflection recorded");
            }
            EngineEvent::AttemptClosed { instance_id, attempt } => {
                info!(%instance_id, attempt = attempt.attempt_number, success = attempt.success, cost = attempt.total_cost, "attempt closed");
            }
            EngineEvent::RunCompleted {
                instance_id,
                success,
                attempts,
                total_cost,
                terminal_reason,
            } => {
                info!(%instance_id, success, attempts, total_cost, %terminal_reason, "run completed");
            }
            EngineEvent::CycleCompleted { instance_id, cycle } => {
                info!(%instance_id, cycle = cycle.cycle_number, success_rate = cycle.success_rate, "cycle completed");
            }
            other => {
                debug!(instance_id = other.instance_id(), event_type = other.event_type(), "event");
            }
        }
        Ok(())
    }
}
