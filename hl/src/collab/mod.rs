//! External collaborators
//!
//! The loops decide how many times to try, what to feed back and when to
//! stop. Everything that actually produces, runs, repairs or judges an
//! artifact sits behind one of these traits. Every call is async and the
//! loops wrap each one in a timeout.
//!
//! | Trait                  | Used by                  | Required |
//! |------------------------|--------------------------|----------|
//! | [`AttemptExecutor`]    | RetryEngine              | yes      |
//! | [`StrategyPlanner`]    | RetryEngine              | yes      |
//! | [`ReflectionProvider`] | RetryEngine              | yes      |
//! | [`HumanEscalationGate`]| RetryEngine              | no       |
//! | [`ArtifactExecutor`]   | ValidationLoop, tracker  | yes      |
//! | [`RepairRequester`]    | ValidationLoop           | yes      |
//! | [`SemanticVerifier`]   | ValidationLoop           | no       |
//! | [`ImprovementAnalyzer`]| ImprovementCycleTracker  | yes      |
//! | [`ImprovementApplier`] | ImprovementCycleTracker  | yes      |
//! | [`ArtifactGenerator`]  | GenerateAndValidate      | yes      |
//! | [`KnowledgeStore`]     | ValidationLoop, tracker  | no       |

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{Action, Artifact, Attempt, FailureClass, Task, Usage};

mod error;
#[cfg(test)]
pub mod mock;

pub use error::CollaboratorError;

/// A produced value plus the usage it cost
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    pub usage: Option<Usage>,
}

impl<T> Generated<T> {
    pub fn new(value: T, usage: Option<Usage>) -> Self {
        Self { value, usage }
    }

    /// A value that cost nothing
    pub fn free(value: T) -> Self {
        Self { value, usage: None }
    }
}

// === RetryEngine collaborators ===

/// One externally caused step inside an attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub action_type: String,
    pub description: String,
    pub result: String,
    pub success: bool,
    pub usage: Option<Usage>,
    /// Cost the executor already recorded in the ledger itself
    pub recorded_cost: f64,
}

impl ActionReport {
    pub fn new(
        action_type: impl Into<String>,
        description: impl Into<String>,
        result: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            description: description.into(),
            result: result.into(),
            success,
            usage: None,
            recorded_cost: 0.0,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_recorded_cost(mut self, cost: f64) -> Self {
        self.recorded_cost = cost.max(0.0);
        self
    }
}

/// What one attempt produced
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttemptReport {
    pub success: bool,
    pub outcome: String,
    pub actions: Vec<ActionReport>,
    /// Result payload handed back to the caller on success
    pub output: Option<Value>,
}

impl AttemptReport {
    pub fn success(outcome: impl Into<String>) -> Self {
        Self {
            success: true,
            outcome: outcome.into(),
            ..Default::default()
        }
    }

    pub fn failure(outcome: impl Into<String>) -> Self {
        Self {
            success: false,
            outcome: outcome.into(),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: ActionReport) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

/// Runs one attempt of a task with a given strategy
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    async fn execute(&self, task: &Task, strategy: &str, attempt: u32) -> Result<AttemptReport, CollaboratorError>;
}

/// Proposes the strategy for the next attempt from the full history
#[async_trait]
pub trait StrategyPlanner: Send + Sync {
    async fn suggest(&self, task: &Task, history: &[Attempt]) -> Result<Generated<String>, CollaboratorError>;
}

/// Explains a failed attempt
#[async_trait]
pub trait ReflectionProvider: Send + Sync {
    async fn reflect(&self, failed_outcome: &str, actions: &[Action]) -> Result<Generated<String>, CollaboratorError>;
}

/// Human decision after attempts run out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationDecision {
    pub continue_run: bool,
    pub hints: Map<String, Value>,
}

impl EscalationDecision {
    pub fn decline() -> Self {
        Self::default()
    }

    pub fn continue_with(hints: Map<String, Value>) -> Self {
        Self {
            continue_run: true,
            hints,
        }
    }
}

/// Asks a human whether to keep going
#[async_trait]
pub trait HumanEscalationGate: Send + Sync {
    async fn escalate(
        &self,
        task: &Task,
        last_reflection: Option<&str>,
        history: &[Attempt],
    ) -> Result<EscalationDecision, CollaboratorError>;
}

// === ValidationLoop collaborators ===

/// What the harness reports for one execution
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionReport {
    pub declared_success: bool,
    pub output: Value,
    pub error_text: Option<String>,
    /// Harness-specific error type, e.g. "TimeoutError"
    pub error_classification: Option<String>,
    pub snapshot_ref: Option<String>,
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn succeeded(output: Value) -> Self {
        Self {
            declared_success: true,
            output,
            ..Default::default()
        }
    }

    pub fn failed(error_text: impl Into<String>) -> Self {
        Self {
            declared_success: false,
            output: Value::Null,
            error_text: Some(error_text.into()),
            ..Default::default()
        }
    }

    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.error_classification = Some(classification.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot_ref: impl Into<String>) -> Self {
        self.snapshot_ref = Some(snapshot_ref.into());
        self
    }
}

/// Executes an artifact against a test input
#[async_trait]
pub trait ArtifactExecutor: Send + Sync {
    async fn execute(&self, artifact: &Artifact, input: &Value) -> Result<ExecutionReport, CollaboratorError>;
}

/// Classified failure handed to the repair requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub classification: FailureClass,
    pub error_text: String,
    /// Harness-specific error type, when one was reported
    pub error_type: Option<String>,
    pub issues: Vec<String>,
    pub snapshot_ref: Option<String>,
    pub output: Value,
}

/// Everything the repair requester needs
#[derive(Debug, Clone, PartialEq)]
pub struct RepairRequest {
    pub attempt: u32,
    pub artifact: Artifact,
    pub diagnostics: Diagnostics,
    /// Fixes already tried; the requester should not repeat them
    pub prior_fixes: Vec<String>,
    pub domain_context: Option<Value>,
}

/// Result of a repair request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepairOutcome {
    pub success: bool,
    pub change_descriptions: Vec<String>,
    pub reasoning: String,
    pub new_artifact: Option<Artifact>,
    pub usage: Option<Usage>,
}

impl RepairOutcome {
    pub fn fixed(new_artifact: Artifact, changes: Vec<String>) -> Self {
        Self {
            success: true,
            change_descriptions: changes,
            reasoning: String::new(),
            new_artifact: Some(new_artifact),
            usage: None,
        }
    }

    pub fn no_fix(reasoning: impl Into<String>) -> Self {
        Self {
            success: false,
            reasoning: reasoning.into(),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// A usable artifact came back
    pub fn has_artifact(&self) -> bool {
        self.success && self.new_artifact.is_some()
    }
}

/// Produces a repaired artifact from diagnostics
#[async_trait]
pub trait RepairRequester: Send + Sync {
    async fn repair(&self, request: &RepairRequest) -> Result<RepairOutcome, CollaboratorError>;
}

/// Secondary judgement on a shape-valid output
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Verdict {
    pub acceptable: bool,
    pub issues: Vec<String>,
    pub usage: Option<Usage>,
}

impl Verdict {
    pub fn accept() -> Self {
        Self {
            acceptable: true,
            ..Default::default()
        }
    }

    pub fn object(issues: Vec<String>) -> Self {
        Self {
            acceptable: false,
            issues,
            usage: None,
        }
    }
}

/// Checks output beyond shape, e.g. against a visual snapshot
#[async_trait]
pub trait SemanticVerifier: Send + Sync {
    async fn verify(
        &self,
        artifact: &Artifact,
        output: &Value,
        snapshot_ref: Option<&str>,
    ) -> Result<Verdict, CollaboratorError>;
}

/// Write-only store for successful artifacts
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn record(&self, specification: &Value, artifact: &Artifact, confidence: f64) -> Result<(), CollaboratorError>;
}

/// Produces a first candidate artifact
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, task: &Task, strategy: &str) -> Result<Generated<Artifact>, CollaboratorError>;
}

// === ImprovementCycleTracker collaborators ===

/// One failing test case handed to analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSample {
    pub case_id: String,
    pub input: Value,
    pub error_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_ref: Option<String>,
}

/// A ranked improvement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub description: String,
    /// In [0, 1]
    pub confidence: f64,
    /// Opaque change payload for the applier
    #[serde(default)]
    pub change: Value,
}

impl Suggestion {
    pub fn new(description: impl Into<String>, confidence: f64) -> Self {
        Self {
            description: description.into(),
            confidence,
            change: Value::Null,
        }
    }
}

/// Turns failures into ranked suggestions
#[async_trait]
pub trait ImprovementAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        artifact: &Artifact,
        failures: &[FailureSample],
    ) -> Result<Generated<Vec<Suggestion>>, CollaboratorError>;
}

/// Applies selected suggestions; None means nothing usable was produced
#[async_trait]
pub trait ImprovementApplier: Send + Sync {
    async fn apply(
        &self,
        artifact: &Artifact,
        suggestions: &[Suggestion],
    ) -> Result<Generated<Option<Artifact>>, CollaboratorError>;
}
