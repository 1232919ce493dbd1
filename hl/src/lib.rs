//! healloop - adaptive retry-and-repair control loops
//!
//! healloop drives an unreliable producer of artifacts (typically an LLM
//! writing code) toward a validated result. It decides how many times to
//! try, what feedback to give back, and when to stop, while accounting for
//! every priced call.
//!
//! # Core Concepts
//!
//! - **Bounded attempts**: every loop has an attempt, cycle or cost limit
//! - **Structured feedback**: failures are classified before repair is asked for
//! - **Check before run**: repaired artifacts are structurally checked first
//! - **No raised failures**: runs end in a result with a terminal reason
//!
//! # Modules
//!
//! - [`r#loop`] - RetryEngine, ValidationLoop, ImprovementCycleTracker
//! - [`collab`] - Collaborator traits the loops call out to
//! - [`cost`] - Price table and the shared cost ledger
//! - [`events`] - Bounded event channel, sinks and the session log
//! - [`domain`] - Attempts, actions, artifacts and result records
//! - [`llm`] - LLM client and the LLM-backed planner and reflector
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod collab;
pub mod config;
pub mod cost;
pub mod domain;
pub mod events;
pub mod llm;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use collab::CollaboratorError;
pub use config::{Config, LlmConfig};
pub use cost::{CostLedger, Price, PriceTable, Pricing};
pub use domain::{
    Action, AgentStatus, Artifact, ArtifactManifest, Attempt, FailureClass, FailureKind, ImprovementCycle, Task,
    TerminalReason, Usage, ValidationResult,
};
pub use events::{EngineEvent, EventBus, EventDispatcher, EventEmitter, NotificationSink, SessionRecorder};
pub use llm::{AnthropicClient, LlmClient, LlmError, LlmReflector, LlmStrategyPlanner, create_client};
pub use r#loop::{
    BuildError, ExpectedShape, GenerateAndValidate, ImprovementCycleTracker, ImprovementReport, RetryEngine, RunResult,
    TestCase, ValidationLoop, ValidationOutcome,
};
