//! Attempt and Action records
//!
//! An attempt is opened at the start of a round, collects actions while the
//! owning loop works, and is closed exactly once. Closing consumes the
//! [`OpenAttempt`] so a closed [`Attempt`] can no longer be mutated by the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Usage reported by one external call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Resource identifier used for pricing (e.g. a model id)
    pub resource_id: String,
    pub input_units: u64,
    pub output_units: u64,
}

impl Usage {
    pub fn new(resource_id: impl Into<String>, input_units: u64, output_units: u64) -> Self {
        Self {
            resource_id: resource_id.into(),
            input_units,
            output_units,
        }
    }

    pub fn total_units(&self) -> u64 {
        self.input_units.saturating_add(self.output_units)
    }
}

/// Immutable record of one externally caused side effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub description: String,
    pub result: String,
    pub success: bool,
    pub cost: f64,
    pub usage_units: u64,
}

impl Action {
    /// Create an action with no cost attached
    pub fn new(
        action_type: impl Into<String>,
        description: impl Into<String>,
        result: impl Into<String>,
        success: bool,
    ) -> Self {
        let action_type = action_type.into();
        debug!(%action_type, success, "Action::new: called");
        Self {
            timestamp: Utc::now(),
            action_type,
            description: description.into(),
            result: result.into(),
            success,
            cost: 0.0,
            usage_units: 0,
        }
    }

    /// Builder: attach cost and usage units
    pub fn with_cost(mut self, cost: f64, usage_units: u64) -> Self {
        self.cost = if cost.is_finite() && cost > 0.0 { cost } else { 0.0 };
        self.usage_units = usage_units;
        self
    }
}

/// Status of a retry engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Reflecting,
    WaitingHuman,
    Success,
    Failed,
}

impl AgentStatus {
    /// Terminal statuses end a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Success | AgentStatus::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Reflecting => "reflecting",
            AgentStatus::WaitingHuman => "waiting_human",
            AgentStatus::Success => "success",
            AgentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// An attempt still owned by its loop
#[derive(Debug)]
pub struct OpenAttempt {
    attempt_number: u32,
    strategy: String,
    actions: Vec<Action>,
}

impl OpenAttempt {
    /// Open a new attempt; attempt numbers start at 1
    pub fn open(attempt_number: u32, strategy: impl Into<String>) -> Self {
        debug!(attempt_number, "OpenAttempt::open: called");
        Self {
            attempt_number: attempt_number.max(1),
            strategy: strategy.into(),
            actions: Vec::new(),
        }
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn set_strategy(&mut self, strategy: impl Into<String>) {
        self.strategy = strategy.into();
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn record(&mut self, action: Action) {
        debug!(attempt_number = self.attempt_number, action_type = %action.action_type, "OpenAttempt::record: called");
        self.actions.push(action);
    }

    /// Cost accumulated so far
    pub fn cost_so_far(&self) -> f64 {
        self.actions.iter().map(|a| a.cost).sum()
    }

    /// Close the attempt; total cost is the sum of action costs
    pub fn close(self, outcome: impl Into<String>, success: bool) -> Attempt {
        debug!(attempt_number = self.attempt_number, success, "OpenAttempt::close: called");
        let total_cost = self.cost_so_far();
        Attempt {
            attempt_number: self.attempt_number,
            actions: self.actions,
            strategy: self.strategy,
            outcome: outcome.into(),
            success,
            total_cost,
        }
    }
}

/// A closed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_number: u32,
    pub actions: Vec<Action>,
    pub strategy: String,
    pub outcome: String,
    pub success: bool,
    pub total_cost: f64,
}

impl Attempt {
    /// Short summary for prompts and logs
    pub fn summary(&self) -> String {
        format!(
            "attempt {} [{}] strategy: {} | outcome: {}",
            self.attempt_number,
            if self.success { "ok" } else { "failed" },
            self.strategy,
            self.outcome
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_sums_action_costs() {
        let mut open = OpenAttempt::open(1, "baseline");
        open.record(Action::new("execute", "run", "ok", true).with_cost(0.25, 100));
        open.record(Action::new("reflect", "why", "text", true).with_cost(0.5, 50));
        let attempt = open.close("done", true);

        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.actions.len(), 2);
        assert!((attempt.total_cost - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_attempt_number_starts_at_one() {
        assert_eq!(OpenAttempt::open(0, "x").attempt_number(), 1);
    }

    #[test]
    fn test_negative_cost_is_clamped() {
        let action = Action::new("x", "y", "z", true).with_cost(-3.0, 1);
        assert_eq!(action.cost, 0.0);
    }

    #[test]
    fn test_status_display_and_terminal() {
        assert_eq!(AgentStatus::WaitingHuman.to_string(), "waiting_human");
        assert!(AgentStatus::Failed.is_terminal());
        assert!(!AgentStatus::Reflecting.is_terminal());
    }

    #[test]
    fn test_attempt_serde_shape() {
        let attempt = OpenAttempt::open(2, "retry").close("boom", false);
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["attempt_number"], 2);
        assert_eq!(json["success"], false);
        assert!(json["actions"].is_array());
    }
}
