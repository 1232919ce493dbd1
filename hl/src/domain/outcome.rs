//! Terminal reasons, failure taxonomy and per-round result records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a run, validation or improvement loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Success,
    Exhausted,
    CostCeiling,
    Degrading,
    EscalationDeclined,
    Cancelled,
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminalReason::Success => "success",
            TerminalReason::Exhausted => "exhausted",
            TerminalReason::CostCeiling => "cost_ceiling",
            TerminalReason::Degrading => "degrading",
            TerminalReason::EscalationDeclined => "escalation_declined",
            TerminalReason::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Failure taxonomy carried on results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Harness or collaborator failure; retried within budget
    TransientExecution,
    /// Artifact failed the structural check; terminal for a repair round
    StructuralArtifact,
    /// Output did not match the expected shape; triggers repair
    SchemaMismatch,
    /// Repair returned nothing usable; terminal
    RepairUnproductive,
    /// Attempts, cycles or cost ran out
    ResourceExhausted,
    /// Notification sink failure; logged only
    Callback,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::TransientExecution => "transient_execution",
            FailureKind::StructuralArtifact => "structural_artifact",
            FailureKind::SchemaMismatch => "schema_mismatch",
            FailureKind::RepairUnproductive => "repair_unproductive",
            FailureKind::ResourceExhausted => "resource_exhausted",
            FailureKind::Callback => "callback",
        };
        write!(f, "{}", s)
    }
}

/// Classification of one failed validation execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Harness reported an error
    Execution,
    /// Harness did not finish in time
    Timeout,
    /// Output missing fields or wrongly typed
    SchemaMismatch,
    /// Secondary verifier objected to an otherwise valid output
    VerifierObjection,
    /// Artifact is not well formed
    Structural,
}

impl FailureClass {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureClass::Execution | FailureClass::Timeout => FailureKind::TransientExecution,
            FailureClass::SchemaMismatch | FailureClass::VerifierObjection => FailureKind::SchemaMismatch,
            FailureClass::Structural => FailureKind::StructuralArtifact,
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::Execution => "execution",
            FailureClass::Timeout => "timeout",
            FailureClass::SchemaMismatch => "schema_mismatch",
            FailureClass::VerifierObjection => "verifier_objection",
            FailureClass::Structural => "structural",
        };
        write!(f, "{}", s)
    }
}

/// Result of one validation execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub attempt: u32,
    pub success: bool,
    pub error_text: Option<String>,
    pub error_classification: Option<FailureClass>,
    pub snapshot_ref: Option<String>,
    pub duration_ms: u64,
    /// Individual problems (schema errors, verifier issues)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    /// Non-fatal observations such as null required fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Outcome of one test case in an improvement cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub case_id: String,
    pub passed: bool,
    pub error_text: Option<String>,
    /// Visual or state snapshot captured by the harness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_ref: Option<String>,
    pub duration_ms: u64,
}

/// One completed improvement cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementCycle {
    pub cycle_number: u32,
    pub test_results: Vec<TestCaseResult>,
    pub improvements_made: Vec<String>,
    pub success_rate: f64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}
