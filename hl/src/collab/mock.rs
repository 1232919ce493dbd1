//! Scripted collaborators for unit tests
//!
//! Each mock replays a script, one entry per call. Once the script runs out
//! the last entry repeats.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::debug;

use super::*;

fn scripted<T: Clone>(script: &[T], idx: usize) -> Option<T> {
    script.get(idx).or(script.last()).cloned()
}

async fn maybe_sleep(delay: Option<Duration>) {
    if let Some(d) = delay {
        tokio::time::sleep(d).await;
    }
}

/// Scripted attempt executor; `Err(msg)` entries become collaborator errors
pub struct MockExecutor {
    script: Vec<Result<AttemptReport, String>>,
    call_count: AtomicUsize,
    delay: Option<Duration>,
    strategies: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new(script: Vec<Result<AttemptReport, String>>) -> Self {
        debug!(script_len = script.len(), "MockExecutor::new: called");
        Self {
            script,
            call_count: AtomicUsize::new(0),
            delay: None,
            strategies: Mutex::new(Vec::new()),
        }
    }

    /// Fail `failures` times, then succeed
    pub fn failing_then_success(failures: usize) -> Self {
        let mut script: Vec<_> = (0..failures)
            .map(|i| Ok(AttemptReport::failure(format!("failure {}", i + 1))))
            .collect();
        script.push(Ok(AttemptReport::success("done")));
        Self::new(script)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn strategies(&self) -> Vec<String> {
        self.strategies.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttemptExecutor for MockExecutor {
    async fn execute(&self, _task: &Task, strategy: &str, attempt: u32) -> Result<AttemptReport, CollaboratorError> {
        debug!(attempt, "MockExecutor::execute: called");
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.strategies.lock().unwrap().push(strategy.to_string());
        maybe_sleep(self.delay).await;
        match scripted(&self.script, idx) {
            Some(Ok(report)) => Ok(report),
            Some(Err(msg)) => Err(CollaboratorError::Failed(msg)),
            None => Err(CollaboratorError::failed("empty script")),
        }
    }
}

/// Planner that returns "strategy N" and remembers history lengths
#[derive(Default)]
pub struct MockPlanner {
    call_count: AtomicUsize,
    history_lens: Mutex<Vec<usize>>,
    fail: bool,
    usage: Option<Usage>,
}

impl MockPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn history_lens(&self) -> Vec<usize> {
        self.history_lens.lock().unwrap().clone()
    }
}

#[async_trait]
impl StrategyPlanner for MockPlanner {
    async fn suggest(&self, _task: &Task, history: &[Attempt]) -> Result<Generated<String>, CollaboratorError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.history_lens.lock().unwrap().push(history.len());
        if self.fail {
            return Err(CollaboratorError::failed("planner down"));
        }
        Ok(Generated::new(format!("strategy {}", n), self.usage.clone()))
    }
}

/// Reflector that returns "reflection N"
#[derive(Default)]
pub struct MockReflector {
    call_count: AtomicUsize,
    fail: bool,
    usage: Option<Usage>,
}

impl MockReflector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReflectionProvider for MockReflector {
    async fn reflect(&self, _failed_outcome: &str, _actions: &[Action]) -> Result<Generated<String>, CollaboratorError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(CollaboratorError::failed("reflector down"));
        }
        Ok(Generated::new(format!("reflection {}", n), self.usage.clone()))
    }
}

/// Gate replaying decisions; declines once the script is exhausted
pub struct MockGate {
    decisions: Vec<EscalationDecision>,
    call_count: AtomicUsize,
}

impl MockGate {
    pub fn new(decisions: Vec<EscalationDecision>) -> Self {
        Self {
            decisions,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HumanEscalationGate for MockGate {
    async fn escalate(
        &self,
        _task: &Task,
        _last_reflection: Option<&str>,
        _history: &[Attempt],
    ) -> Result<EscalationDecision, CollaboratorError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.decisions.get(idx).cloned().unwrap_or_default())
    }
}

/// Scripted harness that also records every artifact it ran
pub struct MockHarness {
    script: Vec<Result<ExecutionReport, String>>,
    call_count: AtomicUsize,
    delay: Option<Duration>,
    executed: Mutex<Vec<Artifact>>,
    cancel_after: Option<(usize, tokio_util::sync::CancellationToken)>,
}

impl MockHarness {
    pub fn new(script: Vec<Result<ExecutionReport, String>>) -> Self {
        Self {
            script,
            call_count: AtomicUsize::new(0),
            delay: None,
            executed: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancel `token` once `calls` executions have returned
    pub fn cancel_after(mut self, calls: usize, token: tokio_util::sync::CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<Artifact> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactExecutor for MockHarness {
    async fn execute(&self, artifact: &Artifact, _input: &Value) -> Result<ExecutionReport, CollaboratorError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(artifact.clone());
        maybe_sleep(self.delay).await;
        if let Some((calls, token)) = &self.cancel_after
            && idx + 1 >= *calls
        {
            token.cancel();
        }
        match scripted(&self.script, idx) {
            Some(Ok(report)) => Ok(report),
            Some(Err(msg)) => Err(CollaboratorError::Failed(msg)),
            None => Err(CollaboratorError::failed("empty script")),
        }
    }
}

/// Scripted repair requester that records every request
pub struct MockRepairer {
    script: Vec<Result<RepairOutcome, String>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<RepairRequest>>,
}

impl MockRepairer {
    pub fn new(script: Vec<Result<RepairOutcome, String>>) -> Self {
        Self {
            script,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RepairRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepairRequester for MockRepairer {
    async fn repair(&self, request: &RepairRequest) -> Result<RepairOutcome, CollaboratorError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match scripted(&self.script, idx) {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(msg)) => Err(CollaboratorError::Failed(msg)),
            None => Err(CollaboratorError::NoFix("empty script".to_string())),
        }
    }
}

/// Verifier replaying verdicts
pub struct MockVerifier {
    verdicts: Vec<Verdict>,
    call_count: AtomicUsize,
}

impl MockVerifier {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticVerifier for MockVerifier {
    async fn verify(
        &self,
        _artifact: &Artifact,
        _output: &Value,
        _snapshot_ref: Option<&str>,
    ) -> Result<Verdict, CollaboratorError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(scripted(&self.verdicts, idx).unwrap_or_else(Verdict::accept))
    }
}

/// Knowledge store that keeps what it is given
#[derive(Default)]
pub struct MockStore {
    records: Mutex<Vec<(Artifact, f64)>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Artifact, f64)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeStore for MockStore {
    async fn record(&self, _specification: &Value, artifact: &Artifact, confidence: f64) -> Result<(), CollaboratorError> {
        self.records.lock().unwrap().push((artifact.clone(), confidence));
        Ok(())
    }
}

/// Generator returning a fixed artifact
pub struct MockGenerator {
    artifact: Artifact,
    call_count: AtomicUsize,
}

impl MockGenerator {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactGenerator for MockGenerator {
    async fn generate(&self, _task: &Task, _strategy: &str) -> Result<Generated<Artifact>, CollaboratorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(Generated::new(self.artifact.clone(), Some(Usage::new("claude-haiku-4-5", 1000, 1000))))
    }
}

/// Analyzer returning a fixed suggestion list
pub struct MockAnalyzer {
    suggestions: Vec<Suggestion>,
    call_count: AtomicUsize,
    failures_seen: Mutex<Vec<Vec<FailureSample>>>,
}

impl MockAnalyzer {
    pub fn new(suggestions: Vec<Suggestion>) -> Self {
        Self {
            suggestions,
            call_count: AtomicUsize::new(0),
            failures_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn failures_seen(&self) -> Vec<usize> {
        self.failures_seen.lock().unwrap().iter().map(Vec::len).collect()
    }

    /// Every failure sample passed in, one list per call
    pub fn samples(&self) -> Vec<Vec<FailureSample>> {
        self.failures_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImprovementAnalyzer for MockAnalyzer {
    async fn analyze(
        &self,
        _artifact: &Artifact,
        failures: &[FailureSample],
    ) -> Result<Generated<Vec<Suggestion>>, CollaboratorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.failures_seen.lock().unwrap().push(failures.to_vec());
        Ok(Generated::new(
            self.suggestions.clone(),
            Some(Usage::new("claude-sonnet-4-5", 10_000, 2_000)),
        ))
    }
}

/// Applier producing "<content>+v<N>" and recording how many suggestions it got
#[derive(Default)]
pub struct MockApplier {
    call_count: AtomicUsize,
    applied: Mutex<Vec<Vec<String>>>,
    unchanged: bool,
}

impl MockApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applier that hands back the artifact it was given
    pub fn unchanged() -> Self {
        Self {
            unchanged: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> Vec<Vec<String>> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImprovementApplier for MockApplier {
    async fn apply(
        &self,
        artifact: &Artifact,
        suggestions: &[Suggestion],
    ) -> Result<Generated<Option<Artifact>>, CollaboratorError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.applied
            .lock()
            .unwrap()
            .push(suggestions.iter().map(|s| s.description.clone()).collect());
        if self.unchanged {
            return Ok(Generated::free(Some(artifact.clone())));
        }
        Ok(Generated::free(Some(artifact.revise(format!("{}+v{}", artifact.content, n)))))
    }
}
