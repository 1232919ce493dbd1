//! ValidationLoop - execute, diagnose, repair, re-execute
//!
//! ```text
//!   artifact ──► structural check ──► execute ──► shape ──► verifier ──► success
//!                     │                  │          │          │
//!                     └──────────────────┴──────────┴──────────┘
//!                                        ▼
//!                                   diagnostics
//!                                        │
//!                                        ▼
//!                        repair ──► structural check ──► next attempt
//! ```
//!
//! A repaired artifact is only accepted after it passes the structural
//! check. A repair that is missing, blank or malformed ends the loop; one
//! that changes nothing counts toward `max-unproductive-repairs`.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::{
    ArtifactExecutor, Diagnostics, KnowledgeStore, RepairOutcome, RepairRequest, RepairRequester,
    SemanticVerifier,
};
use crate::cost::CostLedger;
use crate::domain::{Artifact, FailureClass, FailureKind, TerminalReason, Usage, ValidationResult};
use crate::events::EventEmitter;

use super::config::ValidationConfig;
use super::confidence::confidence_score;
use super::error::BuildError;
use super::guard::{CallOutcome, guarded};
use super::schema::ExpectedShape;
use super::structure::{AllOf, StructuralCheck};

/// Result of [`ValidationLoop::run`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub success: bool,
    /// Last accepted artifact; never a rejected repair
    pub artifact: Artifact,
    pub history: Vec<ValidationResult>,
    pub terminal_reason: TerminalReason,
    /// Why the loop failed; None on success or cancellation
    pub failure_kind: Option<FailureKind>,
    /// Repairs that were accepted
    pub repairs: u32,
    /// Only set on success
    pub confidence: Option<f64>,
    /// Spend on repair and verifier calls
    pub total_cost: f64,
    /// De-duplicated descriptions of every fix tried
    pub prior_fixes: Vec<String>,
}

impl ValidationOutcome {
    pub fn attempts(&self) -> u32 {
        self.history.len() as u32
    }
}

/// One judged execution
struct Judged {
    result: ValidationResult,
    diagnostics: Option<Diagnostics>,
}

enum Repaired {
    Accepted(Artifact),
    Unproductive(String),
    Terminal(FailureKind, String),
    Cancelled,
}

/// Per-run mutable state
struct RunState {
    current: Artifact,
    history: Vec<ValidationResult>,
    prior_fixes: Vec<String>,
    repairs: u32,
    unproductive: u32,
    structural_failed: bool,
    spent: f64,
}

impl RunState {
    fn remember_fixes(&mut self, changes: &[String]) {
        for change in changes {
            if !self.prior_fixes.contains(change) {
                self.prior_fixes.push(change.clone());
            }
        }
    }
}

/// Builder for [`ValidationLoop`]
#[derive(Default)]
pub struct ValidationLoopBuilder {
    config: ValidationConfig,
    name: Option<String>,
    executor: Option<Arc<dyn ArtifactExecutor>>,
    repairer: Option<Arc<dyn RepairRequester>>,
    verifier: Option<Arc<dyn SemanticVerifier>>,
    store: Option<Arc<dyn KnowledgeStore>>,
    structure: Option<Arc<dyn StructuralCheck>>,
    ledger: Option<Arc<CostLedger>>,
    events: Option<EventEmitter>,
    cancel: Option<CancellationToken>,
}

impl ValidationLoopBuilder {
    pub fn config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Caller id used in the cost ledger
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ArtifactExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn repairer(mut self, repairer: Arc<dyn RepairRequester>) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn SemanticVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn store(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn structure(mut self, structure: Arc<dyn StructuralCheck>) -> Self {
        self.structure = Some(structure);
        self
    }

    pub fn ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<ValidationLoop, BuildError> {
        debug!("ValidationLoopBuilder::build: called");
        self.config.validate()?;
        let executor = self.executor.ok_or(BuildError::MissingCollaborator("executor"))?;
        let repairer = self.repairer.ok_or(BuildError::MissingCollaborator("repairer"))?;

        Ok(ValidationLoop {
            config: self.config,
            name: self.name.unwrap_or_else(|| "validator".to_string()),
            executor,
            repairer,
            verifier: self.verifier,
            store: self.store,
            structure: self.structure.unwrap_or_else(|| Arc::new(AllOf::standard())),
            ledger: self.ledger.unwrap_or_default(),
            events: self
                .events
                .unwrap_or_else(|| EventEmitter::disabled(uuid::Uuid::now_v7().to_string())),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// Self-healing validation of one artifact against one test input
///
/// Holds no per-run state, so one loop can serve many runs.
pub struct ValidationLoop {
    config: ValidationConfig,
    name: String,
    executor: Arc<dyn ArtifactExecutor>,
    repairer: Arc<dyn RepairRequester>,
    verifier: Option<Arc<dyn SemanticVerifier>>,
    store: Option<Arc<dyn KnowledgeStore>>,
    structure: Arc<dyn StructuralCheck>,
    ledger: Arc<CostLedger>,
    events: EventEmitter,
    cancel: CancellationToken,
}

impl ValidationLoop {
    pub fn builder() -> ValidationLoopBuilder {
        ValidationLoopBuilder::default()
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    fn price(&self, usage: Option<&Usage>) -> f64 {
        usage
            .map(|u| {
                self.ledger
                    .record_usage(&u.resource_id, u.input_units, u.output_units, &self.name)
            })
            .unwrap_or(0.0)
    }

    /// Validate `artifact`, repairing it until it passes or a stop condition hits
    pub async fn run(
        &self,
        artifact: Artifact,
        input: &Value,
        shape: &ExpectedShape,
        domain_context: Option<&Value>,
    ) -> ValidationOutcome {
        debug!(name = %self.name, entry_point = %artifact.manifest.entry_point, max_attempts = self.config.max_attempts, "run: called");

        let mut state = RunState {
            current: artifact,
            history: Vec::new(),
            prior_fixes: Vec::new(),
            repairs: 0,
            unproductive: 0,
            structural_failed: false,
            spent: 0.0,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if self.cancel.is_cancelled() {
                return self.finish(state, TerminalReason::Cancelled, None);
            }
            if let Some(max_cost) = self.config.max_cost
                && state.spent >= max_cost
            {
                warn!(name = %self.name, spent = state.spent, max_cost, "run: cost ceiling reached");
                return self.finish(state, TerminalReason::CostCeiling, Some(FailureKind::ResourceExhausted));
            }

            let judged = if attempt == 1
                && let Err(problems) = self.structure.check(&state.current)
            {
                info!(name = %self.name, problems = problems.len(), "Initial artifact failed structural check");
                state.structural_failed = true;
                structural_failure(attempt, problems)
            } else {
                match self.execute(attempt, &state.current, input, shape, &mut state.spent).await {
                    Some(judged) => judged,
                    None => return self.finish(state, TerminalReason::Cancelled, None),
                }
            };

            self.events.validation_attempt(&judged.result);
            state.history.push(judged.result);

            let Some(diagnostics) = judged.diagnostics else {
                info!(name = %self.name, attempt, repairs = state.repairs, "Validation succeeded");
                return self.succeed(state, input, shape, domain_context).await;
            };

            debug!(name = %self.name, attempt, classification = ?diagnostics.classification, "run: attempt failed");
            if attempt >= self.config.max_attempts {
                info!(name = %self.name, attempt, "Validation attempts exhausted");
                return self.finish(state, TerminalReason::Exhausted, Some(FailureKind::ResourceExhausted));
            }

            match self.repair(attempt, &mut state, diagnostics, domain_context).await {
                Repaired::Accepted(next) => {
                    state.current = next;
                    state.repairs += 1;
                    state.unproductive = 0;
                }
                Repaired::Unproductive(reason) => {
                    state.unproductive += 1;
                    warn!(name = %self.name, attempt, unproductive = state.unproductive, %reason, "run: unproductive repair");
                    if state.unproductive >= self.config.max_unproductive_repairs {
                        info!(name = %self.name, attempt, "Aborting after {} unproductive repairs", state.unproductive);
                        return self.finish(state, TerminalReason::Exhausted, Some(FailureKind::RepairUnproductive));
                    }
                }
                Repaired::Terminal(kind, reason) => {
                    info!(name = %self.name, attempt, ?kind, %reason, "Repair rejected");
                    return self.finish(state, TerminalReason::Exhausted, Some(kind));
                }
                Repaired::Cancelled => return self.finish(state, TerminalReason::Cancelled, None),
            }
        }
    }

    /// Execute and judge; None means cancelled
    async fn execute(
        &self,
        attempt: u32,
        artifact: &Artifact,
        input: &Value,
        shape: &ExpectedShape,
        spent: &mut f64,
    ) -> Option<Judged> {
        debug!(name = %self.name, attempt, "execute: called");
        let started = Instant::now();
        let executor = Arc::clone(&self.executor);

        let report = match guarded(
            &self.cancel,
            self.config.execution_timeout(),
            executor.execute(artifact, input),
        )
        .await
        {
            CallOutcome::Done(Ok(report)) => report,
            CallOutcome::Done(Err(e)) => {
                warn!(name = %self.name, attempt, error = %e, "execute: harness failed");
                return Some(failure(
                    attempt,
                    FailureClass::Execution,
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                ));
            }
            CallOutcome::TimedOut(limit) => {
                warn!(name = %self.name, attempt, ?limit, "execute: harness timed out");
                return Some(failure(
                    attempt,
                    FailureClass::Timeout,
                    format!("Execution timed out after {:?}", limit),
                    started.elapsed().as_millis() as u64,
                ));
            }
            CallOutcome::Cancelled => return None,
        };

        let duration_ms = if report.duration.is_zero() {
            started.elapsed().as_millis() as u64
        } else {
            report.duration.as_millis() as u64
        };
        let mut result = ValidationResult {
            attempt,
            success: false,
            error_text: None,
            error_classification: None,
            snapshot_ref: report.snapshot_ref.clone(),
            duration_ms,
            issues: Vec::new(),
            warnings: Vec::new(),
        };

        let diagnose = |result: &mut ValidationResult, class: FailureClass, text: String, issues: Vec<String>| {
            result.error_classification = Some(class);
            result.error_text = Some(text.clone());
            result.issues = issues.clone();
            Diagnostics {
                classification: class,
                error_text: text,
                error_type: report.error_classification.clone(),
                issues,
                snapshot_ref: report.snapshot_ref.clone(),
                output: report.output.clone(),
            }
        };

        if !report.declared_success {
            let class = if report
                .error_classification
                .as_deref()
                .is_some_and(|c| c.to_ascii_lowercase().contains("timeout"))
            {
                FailureClass::Timeout
            } else {
                FailureClass::Execution
            };
            let text = report
                .error_text
                .clone()
                .unwrap_or_else(|| "Execution reported failure".to_string());
            let diagnostics = diagnose(&mut result, class, text, Vec::new());
            return Some(Judged {
                result,
                diagnostics: Some(diagnostics),
            });
        }

        let shape_report = shape.check(&report.output);
        result.warnings = shape_report.warnings.clone();
        if !shape_report.is_valid() {
            let text = format!("Output does not match expected shape: {}", shape_report.errors.join("; "));
            let diagnostics = diagnose(&mut result, FailureClass::SchemaMismatch, text, shape_report.errors);
            return Some(Judged {
                result,
                diagnostics: Some(diagnostics),
            });
        }

        if let Some(verifier) = self.verifier.clone() {
            match guarded(
                &self.cancel,
                self.config.call_timeout(),
                verifier.verify(artifact, &report.output, report.snapshot_ref.as_deref()),
            )
            .await
            {
                CallOutcome::Done(Ok(verdict)) => {
                    *spent += self.price(verdict.usage.as_ref());
                    if !verdict.acceptable {
                        let text = format!("Verifier objected: {}", verdict.issues.join("; "));
                        let diagnostics = diagnose(&mut result, FailureClass::VerifierObjection, text, verdict.issues);
                        return Some(Judged {
                            result,
                            diagnostics: Some(diagnostics),
                        });
                    }
                }
                CallOutcome::Done(Err(e)) => {
                    warn!(name = %self.name, attempt, error = %e, "execute: verifier failed, accepting shape-valid output");
                }
                CallOutcome::TimedOut(limit) => {
                    warn!(name = %self.name, attempt, ?limit, "execute: verifier timed out, accepting shape-valid output");
                }
                CallOutcome::Cancelled => return None,
            }
        }

        result.success = true;
        Some(Judged {
            result,
            diagnostics: None,
        })
    }

    async fn repair(
        &self,
        attempt: u32,
        state: &mut RunState,
        diagnostics: Diagnostics,
        domain_context: Option<&Value>,
    ) -> Repaired {
        debug!(name = %self.name, attempt, prior_fixes = state.prior_fixes.len(), "repair: called");
        let request = RepairRequest {
            attempt,
            artifact: state.current.clone(),
            diagnostics,
            prior_fixes: state.prior_fixes.clone(),
            domain_context: domain_context.cloned(),
        };
        let repairer = Arc::clone(&self.repairer);

        let outcome: RepairOutcome =
            match guarded(&self.cancel, self.config.call_timeout(), repairer.repair(&request)).await {
                CallOutcome::Done(Ok(outcome)) => outcome,
                CallOutcome::Done(Err(e)) if e.is_no_fix() => {
                    return Repaired::Terminal(FailureKind::RepairUnproductive, e.to_string());
                }
                CallOutcome::Done(Err(e)) => return Repaired::Unproductive(format!("repair failed: {}", e)),
                CallOutcome::TimedOut(limit) => return Repaired::Unproductive(format!("repair timed out after {:?}", limit)),
                CallOutcome::Cancelled => return Repaired::Cancelled,
            };

        state.spent += self.price(outcome.usage.as_ref());
        state.remember_fixes(&outcome.change_descriptions);

        let Some(candidate) = outcome.new_artifact.filter(|_| outcome.success) else {
            let reason = if outcome.reasoning.is_empty() {
                "no fix found".to_string()
            } else {
                format!("no fix found: {}", outcome.reasoning)
            };
            return Repaired::Terminal(FailureKind::RepairUnproductive, reason);
        };

        if candidate.is_blank() {
            return Repaired::Terminal(FailureKind::RepairUnproductive, "repair produced an empty artifact".to_string());
        }
        if let Err(problems) = self.structure.check(&candidate) {
            state.structural_failed = true;
            return Repaired::Terminal(
                FailureKind::StructuralArtifact,
                format!("repaired artifact is malformed: {}", problems.join("; ")),
            );
        }
        if candidate == state.current {
            return Repaired::Unproductive("repair is identical to the current artifact".to_string());
        }

        debug!(name = %self.name, attempt, changes = outcome.change_descriptions.len(), "repair: accepted");
        Repaired::Accepted(candidate)
    }

    async fn succeed(
        &self,
        state: RunState,
        input: &Value,
        shape: &ExpectedShape,
        domain_context: Option<&Value>,
    ) -> ValidationOutcome {
        let confidence = confidence_score(self.config.baseline_confidence, state.repairs, state.structural_failed);

        if let Some(store) = self.store.clone() {
            let specification = json!({
                "input": input,
                "expected": shape,
                "domain_context": domain_context,
            });
            match guarded(
                &self.cancel,
                self.config.call_timeout(),
                store.record(&specification, &state.current, confidence),
            )
            .await
            {
                CallOutcome::Done(Ok(())) => debug!(name = %self.name, confidence, "succeed: recorded to knowledge store"),
                CallOutcome::Done(Err(e)) => warn!(name = %self.name, error = %e, "succeed: knowledge store failed"),
                CallOutcome::TimedOut(limit) => warn!(name = %self.name, ?limit, "succeed: knowledge store timed out"),
                CallOutcome::Cancelled => debug!(name = %self.name, "succeed: cancelled before store completed"),
            }
        }

        let mut outcome = self.finish(state, TerminalReason::Success, None);
        outcome.confidence = Some(confidence);
        outcome
    }

    fn finish(&self, state: RunState, reason: TerminalReason, failure_kind: Option<FailureKind>) -> ValidationOutcome {
        debug!(name = %self.name, %reason, ?failure_kind, attempts = state.history.len(), "finish: called");
        ValidationOutcome {
            success: reason == TerminalReason::Success,
            artifact: state.current,
            history: state.history,
            terminal_reason: reason,
            failure_kind,
            repairs: state.repairs,
            confidence: None,
            total_cost: state.spent,
            prior_fixes: state.prior_fixes,
        }
    }
}

fn structural_failure(attempt: u32, problems: Vec<String>) -> Judged {
    let text = format!("Artifact is malformed: {}", problems.join("; "));
    Judged {
        result: ValidationResult {
            attempt,
            success: false,
            error_text: Some(text.clone()),
            error_classification: Some(FailureClass::Structural),
            snapshot_ref: None,
            duration_ms: 0,
            issues: problems.clone(),
            warnings: Vec::new(),
        },
        diagnostics: Some(Diagnostics {
            classification: FailureClass::Structural,
            error_text: text,
            error_type: None,
            issues: problems,
            snapshot_ref: None,
            output: Value::Null,
        }),
    }
}

fn failure(attempt: u32, class: FailureClass, text: String, duration_ms: u64) -> Judged {
    Judged {
        result: ValidationResult {
            attempt,
            success: false,
            error_text: Some(text.clone()),
            error_classification: Some(class),
            snapshot_ref: None,
            duration_ms,
            issues: Vec::new(),
            warnings: Vec::new(),
        },
        diagnostics: Some(Diagnostics {
            classification: class,
            error_text: text,
            error_type: None,
            issues: Vec::new(),
            snapshot_ref: None,
            output: Value::Null,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::ExecutionReport;
    use crate::collab::Verdict;
    use crate::collab::mock::{MockHarness, MockRepairer, MockStore, MockVerifier};
    use crate::r#loop::schema::FieldType;
    use std::time::Duration;

    fn shape() -> ExpectedShape {
        ExpectedShape::new().field("title", FieldType::String)
    }

    fn good() -> ExecutionReport {
        ExecutionReport::succeeded(json!({"title": "ok"}))
    }

    fn artifact(content: &str) -> Artifact {
        Artifact::new("Scraper.run", content)
    }

    fn build(harness: Arc<MockHarness>, repairer: Arc<MockRepairer>, max_attempts: u32) -> ValidationLoop {
        ValidationLoop::builder()
            .config(ValidationConfig {
                max_attempts,
                ..Default::default()
            })
            .executor(harness)
            .repairer(repairer)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_repairer() {
        let result = ValidationLoop::builder().executor(Arc::new(MockHarness::new(vec![]))).build();
        assert!(matches!(result, Err(BuildError::MissingCollaborator("repairer"))));
    }

    #[tokio::test]
    async fn test_first_try_success_has_max_confidence() {
        let harness = Arc::new(MockHarness::new(vec![Ok(good())]));
        let repairer = Arc::new(MockRepairer::new(vec![]));
        let store = Arc::new(MockStore::new());
        let vloop = ValidationLoop::builder()
            .executor(harness.clone())
            .repairer(repairer.clone())
            .store(store.clone())
            .build()
            .unwrap();

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.repairs, 0);
        assert_eq!(outcome.confidence, Some(confidence_score(0.8, 0, false)));
        assert_eq!(repairer.call_count(), 0);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_repair_then_success() {
        let harness = Arc::new(MockHarness::new(vec![
            Ok(ExecutionReport::failed("selector not found")),
            Ok(good()),
        ]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run(fixed)"),
            vec!["use data-testid selector".to_string()],
        ))]));
        let vloop = build(harness.clone(), repairer.clone(), 3);

        let outcome = vloop
            .run(artifact("run()"), &json!({}), &shape(), Some(&json!({"site": "shop"})))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.repairs, 1);
        assert_eq!(outcome.artifact.content, "run(fixed)");
        assert!(outcome.confidence.unwrap() < confidence_score(0.8, 0, false));

        let request = &repairer.requests()[0];
        assert_eq!(request.diagnostics.classification, FailureClass::Execution);
        assert_eq!(request.domain_context, Some(json!({"site": "shop"})));
        assert_eq!(harness.executed()[1].content, "run(fixed)");
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_classified() {
        let harness = Arc::new(MockHarness::new(vec![
            Ok(ExecutionReport::succeeded(json!({"title": 5}))),
            Ok(good()),
        ]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run(str)"),
            vec!["cast title".to_string()],
        ))]));
        let vloop = build(harness, repairer.clone(), 3);

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(outcome.success);
        assert_eq!(outcome.history[0].error_classification, Some(FailureClass::SchemaMismatch));
        assert_eq!(repairer.requests()[0].diagnostics.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_classification() {
        let harness = Arc::new(MockHarness::new(vec![Ok(
            ExecutionReport::failed("waited 30s").with_classification("TimeoutError"),
        )]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::no_fix("stumped"))]));
        let vloop = build(harness, repairer, 3);

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert_eq!(outcome.history[0].error_classification, Some(FailureClass::Timeout));
        assert_eq!(outcome.failure_kind, Some(FailureKind::RepairUnproductive));
    }

    #[tokio::test]
    async fn test_malformed_repair_is_never_executed() {
        let harness = Arc::new(MockHarness::new(vec![Ok(ExecutionReport::failed("boom"))]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run(\"unclosed)"),
            vec!["quote".to_string()],
        ))]));
        let vloop = build(harness.clone(), repairer, 3);

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure_kind, Some(FailureKind::StructuralArtifact));
        assert_eq!(harness.call_count(), 1);
        assert_eq!(outcome.artifact.content, "run()");
    }

    #[tokio::test]
    async fn test_identical_repairs_abort_early() {
        let harness = Arc::new(MockHarness::new(vec![Ok(ExecutionReport::failed("boom"))]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run()"),
            vec!["nothing".to_string()],
        ))]));
        let vloop = build(harness.clone(), repairer.clone(), 5);

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure_kind, Some(FailureKind::RepairUnproductive));
        assert_eq!(repairer.call_count(), 2);
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.prior_fixes, vec!["nothing"]);
    }

    #[tokio::test]
    async fn test_blank_repair_is_terminal() {
        let harness = Arc::new(MockHarness::new(vec![Ok(ExecutionReport::failed("boom"))]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(artifact("  "), vec![]))]));
        let vloop = build(harness.clone(), repairer, 3);

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert_eq!(outcome.failure_kind, Some(FailureKind::RepairUnproductive));
        assert_eq!(harness.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let harness = Arc::new(MockHarness::new(vec![Ok(ExecutionReport::failed("boom"))]));
        let repairer = Arc::new(MockRepairer::new(vec![
            Ok(RepairOutcome::fixed(artifact("run(1)"), vec!["a".to_string()])),
            Ok(RepairOutcome::fixed(artifact("run(2)"), vec!["a".to_string(), "b".to_string()])),
        ]));
        let vloop = build(harness.clone(), repairer.clone(), 3);

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.terminal_reason, TerminalReason::Exhausted);
        assert_eq!(outcome.failure_kind, Some(FailureKind::ResourceExhausted));
        assert_eq!(harness.call_count(), 3);
        assert_eq!(outcome.prior_fixes, vec!["a", "b"]);
        // second request sees the first fix
        assert_eq!(repairer.requests()[1].prior_fixes, vec!["a"]);
    }

    #[tokio::test]
    async fn test_initial_structural_failure_is_repaired() {
        let harness = Arc::new(MockHarness::new(vec![Ok(good())]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run()"),
            vec!["close paren".to_string()],
        ))]));
        let vloop = build(harness.clone(), repairer.clone(), 3);

        let outcome = vloop.run(artifact("run("), &json!({}), &shape(), None).await;

        assert!(outcome.success);
        assert_eq!(outcome.history[0].error_classification, Some(FailureClass::Structural));
        assert_eq!(harness.call_count(), 1);
        assert_eq!(outcome.confidence, Some(confidence_score(0.8, 1, true)));
    }

    #[tokio::test]
    async fn test_verifier_objection_triggers_repair() {
        let harness = Arc::new(MockHarness::new(vec![Ok(good().with_snapshot("shot-1.png"))]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run(v2)"),
            vec!["wait for render".to_string()],
        ))]));
        let verifier = Arc::new(MockVerifier::new(vec![
            Verdict::object(vec!["price missing from page".to_string()]),
            Verdict::accept(),
        ]));
        let vloop = ValidationLoop::builder()
            .executor(harness)
            .repairer(repairer.clone())
            .verifier(verifier.clone())
            .build()
            .unwrap();

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(outcome.success);
        assert_eq!(verifier.call_count(), 2);
        let diagnostics = &repairer.requests()[0].diagnostics;
        assert_eq!(diagnostics.classification, FailureClass::VerifierObjection);
        assert_eq!(diagnostics.snapshot_ref.as_deref(), Some("shot-1.png"));
    }

    #[tokio::test]
    async fn test_harness_timeout_is_a_failure() {
        let harness = Arc::new(MockHarness::new(vec![Ok(good())]).with_delay(Duration::from_millis(200)));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::no_fix("none"))]));
        let vloop = ValidationLoop::builder()
            .config(ValidationConfig {
                execution_timeout_ms: 10,
                ..Default::default()
            })
            .executor(harness)
            .repairer(repairer)
            .build()
            .unwrap();

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.history[0].error_classification, Some(FailureClass::Timeout));
    }

    #[tokio::test]
    async fn test_null_in_typed_field_needs_repair() {
        let harness = Arc::new(MockHarness::new(vec![
            Ok(ExecutionReport::succeeded(json!({"title": null}))),
            Ok(good()),
        ]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run(title)"),
            vec!["read title text".to_string()],
        ))]));
        let vloop = build(harness.clone(), repairer.clone(), 3);

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.repairs, 1);
        assert_eq!(outcome.history[0].error_classification, Some(FailureClass::SchemaMismatch));
        assert!(outcome.confidence.unwrap() < confidence_score(0.8, 0, false));
        assert_eq!(
            repairer.requests()[0].diagnostics.issues,
            vec!["Field title has type null, expected string"]
        );
    }

    #[tokio::test]
    async fn test_null_in_untyped_field_is_warning_only() {
        let harness = Arc::new(MockHarness::new(vec![Ok(ExecutionReport::succeeded(
            json!({"title": "ok", "notes": null}),
        ))]));
        let vloop = build(harness, Arc::new(MockRepairer::new(vec![])), 3);
        let shape = shape().require("notes");

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape, None).await;

        assert!(outcome.success);
        assert_eq!(outcome.history[0].warnings, vec!["Field is null: notes"]);
        assert_eq!(outcome.confidence, Some(confidence_score(0.8, 0, false)));
    }

    #[tokio::test]
    async fn test_cost_ceiling_stops_before_next_execution() {
        let harness = Arc::new(MockHarness::new(vec![Ok(ExecutionReport::failed("boom")), Ok(good())]));
        // $0.001 input + $0.005 output on haiku
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            artifact("run(1)"),
            vec!["retry selector".to_string()],
        )
        .with_usage(Usage::new("claude-haiku-4-5", 1000, 1000)))]));
        let ledger = Arc::new(CostLedger::default());
        let vloop = ValidationLoop::builder()
            .config(ValidationConfig {
                max_attempts: 5,
                max_cost: Some(0.002),
                ..Default::default()
            })
            .executor(harness.clone())
            .repairer(repairer.clone())
            .ledger(ledger.clone())
            .build()
            .unwrap();

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.terminal_reason, TerminalReason::CostCeiling);
        assert_eq!(outcome.failure_kind, Some(FailureKind::ResourceExhausted));
        assert_eq!(harness.call_count(), 1);
        assert_eq!(repairer.call_count(), 1);
        assert_eq!(outcome.repairs, 1);
        assert!((outcome.total_cost - 0.006).abs() < 1e-9);
        assert!((ledger.total_cost() - 0.006).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_stops_without_another_execution() {
        let cancel = CancellationToken::new();
        let harness = Arc::new(
            MockHarness::new(vec![Ok(ExecutionReport::failed("boom"))]).cancel_after(2, cancel.clone()),
        );
        let repairer = Arc::new(MockRepairer::new(vec![
            Ok(RepairOutcome::fixed(artifact("run(1)"), vec!["a".to_string()])),
            Ok(RepairOutcome::fixed(artifact("run(2)"), vec!["b".to_string()])),
        ]));
        let vloop = ValidationLoop::builder()
            .config(ValidationConfig {
                max_attempts: 5,
                ..Default::default()
            })
            .executor(harness.clone())
            .repairer(repairer.clone())
            .cancel(cancel)
            .build()
            .unwrap();

        let outcome = vloop.run(artifact("run()"), &json!({}), &shape(), None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.terminal_reason, TerminalReason::Cancelled);
        assert_eq!(outcome.failure_kind, None);
        assert_eq!(harness.call_count(), 2);
        assert_eq!(repairer.call_count(), 1);
        // the late second result is discarded
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.artifact.content, "run(1)");
    }
}
