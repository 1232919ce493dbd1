//! Event Bus - bounded, non-blocking event delivery
//!
//! Loops emit through an [`EventEmitter`]; the single [`EventDispatcher`]
//! drains the channel and fans events out to the registered sinks. Emitting
//! never waits: when the channel is full the event is dropped and counted.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sink::NotificationSink;
use super::types::EngineEvent;
use crate::domain::{Action, AgentStatus, Attempt, ImprovementCycle, TerminalReason, ValidationResult};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Producer side of the event channel
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus and its dispatcher
    pub fn channel(capacity: usize) -> (EventBus, EventDispatcher) {
        let capacity = capacity.max(1);
        debug!(capacity, "EventBus::channel: creating event bus");
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (
            EventBus {
                tx,
                dropped: Arc::clone(&dropped),
            },
            EventDispatcher {
                rx,
                sinks: Vec::new(),
            },
        )
    }

    /// Create a bus with default capacity
    pub fn with_default_capacity() -> (EventBus, EventDispatcher) {
        Self::channel(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit without blocking; drops the event when the channel is full or closed
    pub fn emit(&self, event: EngineEvent) {
        try_emit(&self.tx, &self.dropped, event);
    }

    /// Create an emitter handle for a specific loop instance
    pub fn emitter_for(&self, instance_id: impl Into<String>) -> EventEmitter {
        let instance_id = instance_id.into();
        debug!(%instance_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: Some(self.tx.clone()),
            dropped: Arc::clone(&self.dropped),
            instance_id,
        }
    }

    /// Number of events dropped because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn try_emit(tx: &mpsc::Sender<EngineEvent>, dropped: &AtomicU64, event: EngineEvent) {
    let event_type = event.event_type();
    if let Err(e) = tx.try_send(event) {
        dropped.fetch_add(1, Ordering::Relaxed);
        match e {
            mpsc::error::TrySendError::Full(_) => debug!(event_type, "emit: channel full, event dropped"),
            mpsc::error::TrySendError::Closed(_) => debug!(event_type, "emit: channel closed, event dropped"),
        }
    }
}

/// Handle for a loop instance to emit events without owning the bus
///
/// Cheap to clone. An emitter built with [`EventEmitter::disabled`] discards
/// everything, for loops run without notification.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::Sender<EngineEvent>>,
    dropped: Arc<AtomicU64>,
    instance_id: String,
}

impl EventEmitter {
    /// Emitter that goes nowhere
    pub fn disabled(instance_id: impl Into<String>) -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
            instance_id: instance_id.into(),
        }
    }

    /// Get the instance ID this emitter is bound to
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Same channel, different instance
    pub fn for_instance(&self, instance_id: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
            instance_id: instance_id.into(),
        }
    }

    /// Emit a raw event
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            try_emit(tx, &self.dropped, event);
        }
    }

    // === Convenience methods ===

    pub fn status_changed(&self, from: AgentStatus, to: AgentStatus) {
        self.emit(EngineEvent::StatusChanged {
            instance_id: self.instance_id.clone(),
            from,
            to,
        });
    }

    pub fn action_recorded(&self, attempt: u32, action: &Action) {
        self.emit(EngineEvent::ActionRecorded {
            instance_id: self.instance_id.clone(),
            attempt,
            action: action.clone(),
        });
    }

    pub fn reflection_recorded(&self, attempt: u32, reflection: &str) {
        self.emit(EngineEvent::ReflectionRecorded {
            instance_id: self.instance_id.clone(),
            attempt,
            reflection: reflection.to_string(),
        });
    }

    pub fn attempt_closed(&self, attempt: &Attempt) {
        self.emit(EngineEvent::AttemptClosed {
            instance_id: self.instance_id.clone(),
            attempt: attempt.clone(),
        });
    }

    pub fn escalation_requested(&self, attempts: u32) {
        self.emit(EngineEvent::EscalationRequested {
            instance_id: self.instance_id.clone(),
            attempts,
        });
    }

    pub fn run_completed(&self, success: bool, attempts: u32, total_cost: f64, terminal_reason: TerminalReason) {
        self.emit(EngineEvent::RunCompleted {
            instance_id: self.instance_id.clone(),
            success,
            attempts,
            total_cost,
            terminal_reason,
        });
    }

    pub fn validation_attempt(&self, result: &ValidationResult) {
        self.emit(EngineEvent::ValidationAttempt {
            instance_id: self.instance_id.clone(),
            result: result.clone(),
        });
    }

    pub fn cycle_completed(&self, cycle: &ImprovementCycle) {
        self.emit(EngineEvent::CycleCompleted {
            instance_id: self.instance_id.clone(),
            cycle: cycle.clone(),
        });
    }
}

/// Counters reported when the dispatcher shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
    pub panicked: u64,
}

/// Single consumer of the event channel
///
/// Owns every sink. A sink that errors or panics is logged and the
/// dispatcher moves on; nothing propagates back to the loops.
pub struct EventDispatcher {
    rx: mpsc::Receiver<EngineEvent>,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl EventDispatcher {
    /// Register a sink
    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        debug!(sink = sink.name(), "EventDispatcher::add_sink: called");
        self.sinks.push(sink);
    }

    /// Builder-style add_sink
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.add_sink(sink);
        self
    }

    /// Drain events until every bus and emitter has been dropped
    pub async fn run(mut self) -> DispatchStats {
        debug!(sink_count = self.sinks.len(), "EventDispatcher::run: starting");
        let mut stats = DispatchStats::default();

        while let Some(event) = self.rx.recv().await {
            for sink in &self.sinks {
                match AssertUnwindSafe(sink.deliver(&event)).catch_unwind().await {
                    Ok(Ok(())) => stats.delivered += 1,
                    Ok(Err(e)) => {
                        stats.failed += 1;
                        warn!(sink = sink.name(), event_type = event.event_type(), error = %e, "EventDispatcher: sink failed");
                    }
                    Err(_) => {
                        stats.panicked += 1;
                        warn!(sink = sink.name(), event_type = event.event_type(), "EventDispatcher: sink panicked");
                    }
                }
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.flush().await {
                warn!(sink = sink.name(), error = %e, "EventDispatcher: flush failed");
            }
        }

        debug!(?stats, "EventDispatcher::run: channel closed, shutting down");
        stats
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<DispatchStats> {
        tokio::spawn(self.run())
    }
}
