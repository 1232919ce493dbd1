//! The three control loops
//!
//! ```text
//!   RetryEngine ── attempt ──► AttemptExecutor
//!        │                         │ (GenerateAndValidate)
//!        │                         ▼
//!        │                   ArtifactGenerator ──► ValidationLoop ──► repair ──┐
//!        │                                              ▲                     │
//!        │                                              └─────────────────────┘
//!        ▼
//!   ImprovementCycleTracker ── cycle ──► test suite ──► analyze ──► apply
//!
//!   every priced call ──► CostLedger        every transition ──► EventEmitter
//! ```
//!
//! Each loop instance runs one task sequentially. Many instances can run at
//! once; the [`CostLedger`](crate::cost::CostLedger) is the only state they
//! share. Every external call goes through [`guard::guarded`] so it has a
//! timeout and stops at cancellation.

mod config;
mod confidence;
mod engine;
mod error;
mod guard;
mod improvement;
mod pipeline;
pub mod schema;
pub mod structure;
mod validation;

pub use config::{BASELINE_STRATEGY, ImprovementConfig, RetryConfig, ValidationConfig};
pub use confidence::confidence_score;
pub use engine::{EngineStats, RetryEngine, RetryEngineBuilder, RunResult};
pub use error::BuildError;
pub use guard::{CallOutcome, guarded, pause};
pub use improvement::{
    CycleSummary, ImprovementCycleTracker, ImprovementCycleTrackerBuilder, ImprovementReport, QualityMetrics,
    TestCase, Trend, suite_confidence,
};
pub use pipeline::GenerateAndValidate;
pub use schema::{ExpectedShape, FieldType, ShapeReport};
pub use structure::{AllOf, DelimiterBalanceCheck, NonEmptyCheck, StructuralCheck};
pub use validation::{ValidationLoop, ValidationLoopBuilder, ValidationOutcome};
