//! Domain types for healloop
//!
//! Records produced by the loops: attempts and their actions, validation
//! results, improvement cycles, and the terminal reasons that end a run.

mod attempt;
mod outcome;
mod task;

pub use attempt::{Action, AgentStatus, Attempt, OpenAttempt, Usage};
pub use outcome::{
    FailureClass, FailureKind, ImprovementCycle, TerminalReason, TestCaseResult, ValidationResult,
};
pub use task::{Artifact, ArtifactManifest, Task};
