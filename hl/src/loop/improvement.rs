//! ImprovementCycleTracker - test suite runs across evolving artifact versions
//!
//! Each cycle runs every test case against the current artifact, then sends
//! a sample of the failures to the analyzer and applies the best-ranked
//! suggestions. After each cycle the stop conditions are checked in order:
//!
//! 1. success rate reached the target
//! 2. cumulative cost reached the ceiling
//! 3. success rate non-increasing over the last `degrade-window` cycles
//! 4. `max-cycles` reached
//!
//! Whatever the reason, the returned artifact is the version with the best
//! recorded success rate.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::{ArtifactExecutor, FailureSample, ImprovementAnalyzer, ImprovementApplier, KnowledgeStore, Suggestion};
use crate::cost::CostLedger;
use crate::domain::{Artifact, ImprovementCycle, TerminalReason, TestCaseResult, Usage};
use crate::events::EventEmitter;

use super::config::ImprovementConfig;
use super::error::BuildError;
use super::guard::{CallOutcome, guarded};
use super::schema::ExpectedShape;

/// One test case in the suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input: Value,
    #[serde(default)]
    pub expected: ExpectedShape,
    /// 1 is highest; cases run in priority order
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

impl TestCase {
    pub fn new(id: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            input,
            expected: ExpectedShape::default(),
            priority: default_priority(),
        }
    }

    pub fn with_expected(mut self, expected: ExpectedShape) -> Self {
        self.expected = expected;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Direction of the success rate between the last two cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
    InsufficientData,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trend::Improving => "improving",
            Trend::Degrading => "degrading",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        };
        write!(f, "{}", s)
    }
}

/// Cycle history; the only place trends are read from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    cycles: Vec<ImprovementCycle>,
    best_success_rate: f64,
    total_cost: f64,
}

impl QualityMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cycle(&mut self, cycle: ImprovementCycle) {
        self.total_cost += cycle.cost;
        if cycle.success_rate > self.best_success_rate {
            self.best_success_rate = cycle.success_rate;
        }
        self.cycles.push(cycle);
    }

    pub fn cycles(&self) -> &[ImprovementCycle] {
        &self.cycles
    }

    pub fn best_success_rate(&self) -> f64 {
        self.best_success_rate
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn latest_success_rate(&self) -> Option<f64> {
        self.cycles.last().map(|c| c.success_rate)
    }

    pub fn trend(&self) -> Trend {
        match self.cycles.as_slice() {
            [.., previous, recent] => {
                if recent.success_rate > previous.success_rate {
                    Trend::Improving
                } else if recent.success_rate < previous.success_rate {
                    Trend::Degrading
                } else {
                    Trend::Stable
                }
            }
            _ => Trend::InsufficientData,
        }
    }

    /// True when the last `window` rates never increase; flat counts
    pub fn is_degrading(&self, window: usize) -> bool {
        if window < 2 || self.cycles.len() < window {
            return false;
        }
        self.cycles[self.cycles.len() - window..]
            .windows(2)
            .all(|pair| pair[1].success_rate <= pair[0].success_rate)
    }
}

/// Per-cycle line of an [`ImprovementReport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: u32,
    pub success_rate: f64,
    pub tests_passed: usize,
    pub tests_total: usize,
    pub improvements_applied: usize,
    pub cost: f64,
}

/// Result of [`ImprovementCycleTracker::run`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementReport {
    /// Best rate reached the target
    pub final_success: bool,
    pub terminal_reason: TerminalReason,
    /// Version with the best recorded success rate
    pub best_artifact: Artifact,
    /// Cycle that produced the best rate
    pub best_cycle: Option<u32>,
    pub metrics: QualityMetrics,
}

impl ImprovementReport {
    pub fn cycle_count(&self) -> u32 {
        self.metrics.cycles().len() as u32
    }

    pub fn best_success_rate(&self) -> f64 {
        self.metrics.best_success_rate()
    }

    pub fn total_cost(&self) -> f64 {
        self.metrics.total_cost()
    }

    pub fn trend(&self) -> Trend {
        self.metrics.trend()
    }

    pub fn summaries(&self) -> Vec<CycleSummary> {
        self.metrics
            .cycles()
            .iter()
            .map(|c| CycleSummary {
                cycle: c.cycle_number,
                success_rate: c.success_rate,
                tests_passed: c.test_results.iter().filter(|r| r.passed).count(),
                tests_total: c.test_results.len(),
                improvements_applied: c.improvements_made.len(),
                cost: c.cost,
            })
            .collect()
    }

    /// Flat summary for dashboards and logs
    pub fn to_json(&self) -> Value {
        json!({
            "final_success": self.final_success,
            "terminal_reason": self.terminal_reason,
            "total_cycles": self.cycle_count(),
            "best_success_rate": self.best_success_rate(),
            "final_success_rate": self.metrics.latest_success_rate().unwrap_or(0.0),
            "total_cost": self.total_cost(),
            "trend": self.trend(),
            "cycles": self.summaries(),
        })
    }
}

/// Knowledge-store confidence for a suite that hit its target
pub fn suite_confidence(success_rate: f64, cycles_needed: u32) -> f64 {
    let decay = 1.0 - 0.1 * cycles_needed.saturating_sub(1) as f64;
    (success_rate * decay.max(0.7)).clamp(0.0, 1.0)
}

/// Builder for [`ImprovementCycleTracker`]
#[derive(Default)]
pub struct ImprovementCycleTrackerBuilder {
    config: ImprovementConfig,
    name: Option<String>,
    executor: Option<Arc<dyn ArtifactExecutor>>,
    analyzer: Option<Arc<dyn ImprovementAnalyzer>>,
    applier: Option<Arc<dyn ImprovementApplier>>,
    store: Option<Arc<dyn KnowledgeStore>>,
    ledger: Option<Arc<CostLedger>>,
    events: Option<EventEmitter>,
    cancel: Option<CancellationToken>,
}

impl ImprovementCycleTrackerBuilder {
    pub fn config(mut self, config: ImprovementConfig) -> Self {
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

    pub fn analyzer(mut self, analyzer: Arc<dyn ImprovementAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn applier(mut self, applier: Arc<dyn ImprovementApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn store(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.store = Some(store);
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

    pub fn build(self) -> Result<ImprovementCycleTracker, BuildError> {
        debug!("ImprovementCycleTrackerBuilder::build: called");
        self.config.validate()?;
        let executor = self.executor.ok_or(BuildError::MissingCollaborator("executor"))?;
        let analyzer = self.analyzer.ok_or(BuildError::MissingCollaborator("analyzer"))?;
        let applier = self.applier.ok_or(BuildError::MissingCollaborator("applier"))?;

        Ok(ImprovementCycleTracker {
            config: self.config,
            name: self.name.unwrap_or_else(|| "improver".to_string()),
            executor,
            analyzer,
            applier,
            store: self.store,
            ledger: self.ledger.unwrap_or_default(),
            events: self
                .events
                .unwrap_or_else(|| EventEmitter::disabled(uuid::Uuid::now_v7().to_string())),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// Drives improvement cycles for one artifact
pub struct ImprovementCycleTracker {
    config: ImprovementConfig,
    name: String,
    executor: Arc<dyn ArtifactExecutor>,
    analyzer: Arc<dyn ImprovementAnalyzer>,
    applier: Arc<dyn ImprovementApplier>,
    store: Option<Arc<dyn KnowledgeStore>>,
    ledger: Arc<CostLedger>,
    events: EventEmitter,
    cancel: CancellationToken,
}

/// Best version seen so far
struct Best {
    artifact: Artifact,
    rate: f64,
    cycle: Option<u32>,
}

impl ImprovementCycleTracker {
    pub fn builder() -> ImprovementCycleTrackerBuilder {
        ImprovementCycleTrackerBuilder::default()
    }

    fn price(&self, usage: Option<&Usage>) -> f64 {
        usage
            .map(|u| {
                self.ledger
                    .record_usage(&u.resource_id, u.input_units, u.output_units, &self.name)
            })
            .unwrap_or(0.0)
    }

    /// Run cycles until a stop condition hits
    pub async fn run(&self, artifact: Artifact, cases: &[TestCase]) -> ImprovementReport {
        debug!(name = %self.name, cases = cases.len(), max_cycles = self.config.max_cycles, "run: called");
        info!(
            "Improving {} with {} test cases (target {:.0}%, max {} cycles, max ${:.2})",
            artifact.manifest.entry_point,
            cases.len(),
            self.config.target_success_rate * 100.0,
            self.config.max_cycles,
            self.config.max_cost
        );

        let mut ordered: Vec<&TestCase> = cases.iter().collect();
        ordered.sort_by_key(|c| c.priority);

        let mut metrics = QualityMetrics::new();
        let mut best = Best {
            artifact: artifact.clone(),
            rate: f64::NEG_INFINITY,
            cycle: None,
        };
        let mut current = artifact;

        for cycle_number in 1..=self.config.max_cycles {
            if self.cancel.is_cancelled() {
                return self.finish(TerminalReason::Cancelled, best, metrics);
            }
            info!("{} cycle {}/{}", self.name, cycle_number, self.config.max_cycles);

            let Some(results) = self.run_cases(&current, &ordered).await else {
                return self.finish(TerminalReason::Cancelled, best, metrics);
            };

            let passed = results.iter().filter(|r| r.passed).count();
            let success_rate = if results.is_empty() {
                0.0
            } else {
                passed as f64 / results.len() as f64
            };
            info!(
                "{} cycle {}: {}/{} passed ({:.0}%)",
                self.name,
                cycle_number,
                passed,
                results.len(),
                success_rate * 100.0
            );

            if success_rate > best.rate {
                best = Best {
                    artifact: current.clone(),
                    rate: success_rate,
                    cycle: Some(cycle_number),
                };
            }

            if success_rate >= self.config.target_success_rate {
                self.record_cycle(&mut metrics, cycle_number, results, Vec::new(), success_rate, 0.0);
                self.store_success(&current, cases, success_rate, cycle_number).await;
                return self.finish(TerminalReason::Success, best, metrics);
            }

            let failures: Vec<FailureSample> = ordered
                .iter()
                .zip(&results)
                .filter(|(_, r)| !r.passed)
                .take(self.config.max_failures_analyzed)
                .map(|(case, r)| FailureSample {
                    case_id: case.id.clone(),
                    input: case.input.clone(),
                    error_text: r.error_text.clone().unwrap_or_default(),
                    snapshot_ref: r.snapshot_ref.clone(),
                })
                .collect();

            let mut cycle_cost = 0.0;
            let suggestions = match self.analyze(&current, &failures, &mut cycle_cost).await {
                CallOutcome::Done(s) => s,
                CallOutcome::TimedOut(_) => Vec::new(),
                CallOutcome::Cancelled => return self.finish(TerminalReason::Cancelled, best, metrics),
            };

            let improvements_made: Vec<String> = match self.apply(&current, &suggestions, &mut cycle_cost).await {
                CallOutcome::Done(Some(next)) => {
                    current = next;
                    suggestions.iter().map(|s| s.description.clone()).collect()
                }
                CallOutcome::Done(None) | CallOutcome::TimedOut(_) => Vec::new(),
                CallOutcome::Cancelled => return self.finish(TerminalReason::Cancelled, best, metrics),
            };

            self.record_cycle(
                &mut metrics,
                cycle_number,
                results,
                improvements_made,
                success_rate,
                cycle_cost,
            );

            if metrics.total_cost() >= self.config.max_cost {
                warn!(name = %self.name, total_cost = metrics.total_cost(), max_cost = self.config.max_cost, "run: cost ceiling reached");
                return self.finish(TerminalReason::CostCeiling, best, metrics);
            }
            if metrics.is_degrading(self.config.degrade_window) {
                info!(name = %self.name, cycle_number, "Success rate is not improving, stopping");
                return self.finish(TerminalReason::Degrading, best, metrics);
            }
        }

        self.finish(TerminalReason::Exhausted, best, metrics)
    }

    /// Run every case against `artifact`; None means cancelled
    async fn run_cases(&self, artifact: &Artifact, cases: &[&TestCase]) -> Option<Vec<TestCaseResult>> {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            debug!(name = %self.name, case_id = %case.id, "run_cases: running case");
            let started = Instant::now();
            let executor = Arc::clone(&self.executor);

            let (error_text, snapshot_ref) = match guarded(
                &self.cancel,
                self.config.execution_timeout(),
                executor.execute(artifact, &case.input),
            )
            .await
            {
                CallOutcome::Done(Ok(report)) if report.declared_success => {
                    let shape = case.expected.check(&report.output);
                    let error_text = (!shape.is_valid()).then(|| shape.errors.join("; "));
                    (error_text, report.snapshot_ref)
                }
                CallOutcome::Done(Ok(report)) => (
                    Some(
                        report
                            .error_text
                            .unwrap_or_else(|| "Execution reported failure".to_string()),
                    ),
                    report.snapshot_ref,
                ),
                CallOutcome::Done(Err(e)) => (Some(e.to_string()), None),
                CallOutcome::TimedOut(limit) => (Some(format!("Execution timed out after {:?}", limit)), None),
                CallOutcome::Cancelled => return None,
            };

            results.push(TestCaseResult {
                case_id: case.id.clone(),
                passed: error_text.is_none(),
                error_text,
                snapshot_ref,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
        Some(results)
    }

    /// Ask for suggestions and keep the best-ranked ones
    async fn analyze(
        &self,
        artifact: &Artifact,
        failures: &[FailureSample],
        cycle_cost: &mut f64,
    ) -> CallOutcome<Vec<Suggestion>> {
        if failures.is_empty() {
            return CallOutcome::Done(Vec::new());
        }
        debug!(name = %self.name, failures = failures.len(), "analyze: called");
        let analyzer = Arc::clone(&self.analyzer);

        match guarded(
            &self.cancel,
            self.config.call_timeout(),
            analyzer.analyze(artifact, failures),
        )
        .await
        {
            CallOutcome::Done(Ok(generated)) => {
                *cycle_cost += self.price(generated.usage.as_ref());
                let mut suggestions: Vec<Suggestion> = generated
                    .value
                    .into_iter()
                    .filter(|s| s.confidence >= self.config.min_suggestion_confidence)
                    .collect();
                suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                suggestions.truncate(self.config.max_improvements_per_cycle);
                debug!(name = %self.name, kept = suggestions.len(), "analyze: suggestions selected");
                CallOutcome::Done(suggestions)
            }
            CallOutcome::Done(Err(e)) => {
                warn!(name = %self.name, error = %e, "analyze: analyzer failed, no improvements this cycle");
                CallOutcome::Done(Vec::new())
            }
            CallOutcome::TimedOut(limit) => {
                warn!(name = %self.name, ?limit, "analyze: analyzer timed out, no improvements this cycle");
                CallOutcome::TimedOut(limit)
            }
            CallOutcome::Cancelled => CallOutcome::Cancelled,
        }
    }

    /// Apply suggestions; Done(None) means the artifact stays as it is
    async fn apply(
        &self,
        artifact: &Artifact,
        suggestions: &[Suggestion],
        cycle_cost: &mut f64,
    ) -> CallOutcome<Option<Artifact>> {
        if suggestions.is_empty() {
            return CallOutcome::Done(None);
        }
        debug!(name = %self.name, suggestions = suggestions.len(), "apply: called");
        let applier = Arc::clone(&self.applier);

        match guarded(
            &self.cancel,
            self.config.call_timeout(),
            applier.apply(artifact, suggestions),
        )
        .await
        {
            CallOutcome::Done(Ok(generated)) => {
                *cycle_cost += self.price(generated.usage.as_ref());
                match generated.value {
                    Some(next) if !next.is_blank() && next != *artifact => CallOutcome::Done(Some(next)),
                    _ => {
                        info!(name = %self.name, "No usable changes produced");
                        CallOutcome::Done(None)
                    }
                }
            }
            CallOutcome::Done(Err(e)) => {
                warn!(name = %self.name, error = %e, "apply: applier failed, artifact unchanged");
                CallOutcome::Done(None)
            }
            CallOutcome::TimedOut(limit) => {
                warn!(name = %self.name, ?limit, "apply: applier timed out, artifact unchanged");
                CallOutcome::TimedOut(limit)
            }
            CallOutcome::Cancelled => CallOutcome::Cancelled,
        }
    }

    fn record_cycle(
        &self,
        metrics: &mut QualityMetrics,
        cycle_number: u32,
        test_results: Vec<TestCaseResult>,
        improvements_made: Vec<String>,
        success_rate: f64,
        cost: f64,
    ) {
        let cycle = ImprovementCycle {
            cycle_number,
            test_results,
            improvements_made,
            success_rate,
            cost,
            timestamp: Utc::now(),
        };
        self.events.cycle_completed(&cycle);
        metrics.add_cycle(cycle);
    }

    async fn store_success(&self, artifact: &Artifact, cases: &[TestCase], success_rate: f64, cycles_needed: u32) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let confidence = suite_confidence(success_rate, cycles_needed);
        let specification = json!({ "test_cases": cases });
        match guarded(
            &self.cancel,
            self.config.call_timeout(),
            store.record(&specification, artifact, confidence),
        )
        .await
        {
            CallOutcome::Done(Ok(())) => debug!(name = %self.name, confidence, "store_success: recorded"),
            CallOutcome::Done(Err(e)) => warn!(name = %self.name, error = %e, "store_success: knowledge store failed"),
            CallOutcome::TimedOut(limit) => warn!(name = %self.name, ?limit, "store_success: knowledge store timed out"),
            CallOutcome::Cancelled => {}
        }
    }

    fn finish(&self, reason: TerminalReason, best: Best, metrics: QualityMetrics) -> ImprovementReport {
        let final_success = metrics.best_success_rate() >= self.config.target_success_rate && !metrics.cycles().is_empty();
        info!(
            "{} finished: reason={} cycles={} best={:.0}% cost=${:.4}",
            self.name,
            reason,
            metrics.cycles().len(),
            metrics.best_success_rate() * 100.0,
            metrics.total_cost()
        );
        ImprovementReport {
            final_success,
            terminal_reason: reason,
            best_artifact: best.artifact,
            best_cycle: best.cycle,
            metrics,
        }
    }
}
