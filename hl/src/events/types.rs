//! Event types emitted by the loops
//!
//! These events represent all observable activity of a loop instance:
//! - Status transitions of a retry engine
//! - Actions recorded against the current attempt
//! - Reflections, closed attempts and run completion
//! - Validation executions and improvement cycles

use serde::{Deserialize, Serialize};

use crate::domain::{Action, AgentStatus, Attempt, ImprovementCycle, TerminalReason, ValidationResult};

/// Core event enum
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Retry engine status transition
    StatusChanged {
        instance_id: String,
        from: AgentStatus,
        to: AgentStatus,
    },
    /// An action was recorded against the current attempt
    ActionRecorded {
        instance_id: String,
        attempt: u32,
        action: Action,
    },
    /// A reflection was produced after a failed attempt
    ReflectionRecorded {
        instance_id: String,
        attempt: u32,
        reflection: String,
    },
    /// An attempt was closed
    AttemptClosed { instance_id: String, attempt: Attempt },
    /// Attempts ran out and the human gate was consulted
    EscalationRequested { instance_id: String, attempts: u32 },
    /// A run finished
    RunCompleted {
        instance_id: String,
        success: bool,
        attempts: u32,
        total_cost: f64,
        terminal_reason: TerminalReason,
    },
    /// One validation execution finished
    ValidationAttempt {
        instance_id: String,
        result: ValidationResult,
    },
    /// One improvement cycle finished
    CycleCompleted {
        instance_id: String,
        cycle: ImprovementCycle,
    },
}

impl EngineEvent {
    /// Get the instance ID for this event
    pub fn instance_id(&self) -> &str {
        match self {
            EngineEvent::StatusChanged { instance_id, .. }
            | EngineEvent::ActionRecorded { instance_id, .. }
            | EngineEvent::ReflectionRecorded { instance_id, .. }
            | EngineEvent::AttemptClosed { instance_id, .. }
            | EngineEvent::EscalationRequested { instance_id, .. }
            | EngineEvent::RunCompleted { instance_id, .. }
            | EngineEvent::ValidationAttempt { instance_id, .. }
            | EngineEvent::CycleCompleted { instance_id, .. } => instance_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::StatusChanged { .. } => "StatusChanged",
            EngineEvent::ActionRecorded { .. } => "ActionRecorded",
            EngineEvent::ReflectionRecorded { .. } => "ReflectionRecorded",
            EngineEvent::AttemptClosed { .. } => "AttemptClosed",
            EngineEvent::EscalationRequested { .. } => "EscalationRequested",
            EngineEvent::RunCompleted { .. } => "RunCompleted",
            EngineEvent::ValidationAttempt { .. } => "ValidationAttempt",
            EngineEvent::CycleCompleted { .. } => "CycleCompleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_instance_id() {
        let event = EngineEvent::StatusChanged {
            instance_id: "run-1".to_string(),
            from: AgentStatus::Idle,
            to: AgentStatus::Working,
        };
        assert_eq!(event.instance_id(), "run-1");
        assert_eq!(event.event_type(), "StatusChanged");
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::RunCompleted {
            instance_id: "run-1".to_string(),
            success: false,
            attempts: 3,
            total_cost: 0.5,
            terminal_reason: TerminalReason::Exhausted,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("RunCompleted"));
        assert!(json.contains("exhausted"));

        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.instance_id(), "run-1");
    }
}
