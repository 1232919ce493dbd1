//! RetryEngine - bounded attempts with reflection and human escalation
//!
//! ```text
//!   Idle ──► Working ──► Success
//!              │  ▲
//!              ▼  │
//!          Reflecting
//!              │
//!              ▼ (attempts exhausted, gate present)
//!         WaitingHuman ──► Working (continue: +1 attempt, hints merged)
//!              │
//!              ▼
//!            Failed
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::{AttemptExecutor, HumanEscalationGate, ReflectionProvider, StrategyPlanner};
use crate::cost::CostLedger;
use crate::domain::{Action, AgentStatus, Attempt, OpenAttempt, Task, TerminalReason, Usage};
use crate::events::{EventEmitter, SessionRecorder};

use super::config::RetryConfig;
use super::error::BuildError;
use super::guard::{CallOutcome, guarded, pause};

/// Result of [`RetryEngine::run`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub attempts: Vec<Attempt>,
    /// Sum of every recorded action's cost
    pub total_cost: f64,
    pub terminal_reason: TerminalReason,
    /// Output of the successful attempt
    pub output: Option<Value>,
    pub last_reflection: Option<String>,
}

impl RunResult {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Summary counters for an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub name: String,
    pub status: AgentStatus,
    pub total_attempts: u32,
    pub successful_attempts: u32,
    pub total_cost: f64,
    pub total_actions: usize,
}

enum Escalation {
    NoGate,
    Continue(Map<String, Value>),
    Declined,
    Cancelled,
}

/// How an attempt's execution ended
enum Executed {
    Finished { success: bool, outcome: String, output: Option<Value> },
    Cancelled,
}

/// Builder for [`RetryEngine`]
#[derive(Default)]
pub struct RetryEngineBuilder {
    config: RetryConfig,
    instance_id: Option<String>,
    executor: Option<Arc<dyn AttemptExecutor>>,
    planner: Option<Arc<dyn StrategyPlanner>>,
    reflector: Option<Arc<dyn ReflectionProvider>>,
    gate: Option<Arc<dyn HumanEscalationGate>>,
    ledger: Option<Arc<CostLedger>>,
    events: Option<EventEmitter>,
    session: Option<Arc<SessionRecorder>>,
    cancel: Option<CancellationToken>,
}

impl RetryEngineBuilder {
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn executor(mut self, executor: Arc<dyn AttemptExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn StrategyPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn reflector(mut self, reflector: Arc<dyn ReflectionProvider>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn HumanEscalationGate>) -> Self {
        self.gate = Some(gate);
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

    /// Persist every closed attempt under this engine's instance id
    pub fn session(mut self, session: Arc<SessionRecorder>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Fails fast when a required collaborator is missing or config is invalid
    pub fn build(self) -> Result<RetryEngine, BuildError> {
        debug!(name = %self.config.name, "RetryEngineBuilder::build: called");
        self.config.validate()?;
        let executor = self.executor.ok_or(BuildError::MissingCollaborator("executor"))?;
        let planner = self.planner.ok_or(BuildError::MissingCollaborator("planner"))?;
        let reflector = self.reflector.ok_or(BuildError::MissingCollaborator("reflector"))?;

        let events = match (self.events, self.instance_id) {
            (Some(events), Some(id)) => events.for_instance(id),
            (Some(events), None) => events,
            (None, Some(id)) => EventEmitter::disabled(id),
            (None, None) => EventEmitter::disabled(uuid::Uuid::now_v7().to_string()),
        };

        Ok(RetryEngine {
            config: self.config,
            executor,
            planner,
            reflector,
            gate: self.gate,
            ledger: self.ledger.unwrap_or_default(),
            events,
            session: self.session,
            cancel: self.cancel.unwrap_or_default(),
            status: AgentStatus::Idle,
            history: Vec::new(),
        })
    }
}

/// Bounded retry loop for one task at a time
pub struct RetryEngine {
    config: RetryConfig,
    executor: Arc<dyn AttemptExecutor>,
    planner: Arc<dyn StrategyPlanner>,
    reflector: Arc<dyn ReflectionProvider>,
    gate: Option<Arc<dyn HumanEscalationGate>>,
    ledger: Arc<CostLedger>,
    events: EventEmitter,
    session: Option<Arc<SessionRecorder>>,
    cancel: CancellationToken,
    status: AgentStatus,
    history: Vec<Attempt>,
}

impl RetryEngine {
    pub fn builder() -> RetryEngineBuilder {
        RetryEngineBuilder::default()
    }

    pub fn instance_id(&self) -> &str {
        self.events.instance_id()
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    /// Closed attempts of the current or last run
    pub fn history(&self) -> &[Attempt] {
        &self.history
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            name: self.config.name.clone(),
            status: self.status,
            total_attempts: self.history.len() as u32,
            successful_attempts: self.history.iter().filter(|a| a.success).count() as u32,
            total_cost: self.spent(),
            total_actions: self.history.iter().map(|a| a.actions.len()).sum(),
        }
    }

    fn spent(&self) -> f64 {
        self.history.iter().map(|a| a.total_cost).sum()
    }

    fn set_status(&mut self, to: AgentStatus) {
        if self.status != to {
            debug!(instance_id = %self.instance_id(), from = %self.status, %to, "set_status: transition");
            self.events.status_changed(self.status, to);
            self.status = to;
        }
    }

    fn price(&self, usage: Option<&Usage>, caller: &str) -> (f64, u64) {
        match usage {
            Some(u) => (
                self.ledger
                    .record_usage(&u.resource_id, u.input_units, u.output_units, caller),
                u.total_units(),
            ),
            None => (0.0, 0),
        }
    }

    fn record(&self, open: &mut OpenAttempt, action: Action) {
        self.events.action_recorded(open.attempt_number(), &action);
        open.record(action);
    }

    fn close(&mut self, open: OpenAttempt, outcome: &str, success: bool) {
        let attempt = open.close(outcome, success);
        debug!(instance_id = %self.instance_id(), attempt = attempt.attempt_number, success, cost = attempt.total_cost, "close: attempt closed");
        if let Some(session) = &self.session
            && let Err(e) = session.record(self.events.instance_id(), &attempt)
        {
            warn!(instance_id = %self.instance_id(), attempt = attempt.attempt_number, error = %e, "close: session write failed");
        }
        self.events.attempt_closed(&attempt);
        self.history.push(attempt);
    }

    /// Run a task to completion
    ///
    /// Never returns an error: every failure mode ends in a [`RunResult`]
    /// with `success == false` and a terminal reason.
    pub async fn run(&mut self, task: Task) -> RunResult {
        debug!(instance_id = %self.instance_id(), task_id = %task.id, max_attempts = self.config.max_attempts, "run: called");
        info!(
            "Starting {} on task {} (max_attempts: {})",
            self.config.name, task.id, self.config.max_attempts
        );

        let mut task = task;
        self.history.clear();
        self.status = AgentStatus::Idle;
        self.set_status(AgentStatus::Working);

        let mut max_attempts = self.config.max_attempts;
        let mut attempt_number = 0u32;
        let mut strategy = self.config.baseline_strategy.clone();
        let mut last_reflection: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                debug!(instance_id = %self.instance_id(), "run: cancelled at attempt boundary");
                return self.finish(TerminalReason::Cancelled, None, last_reflection);
            }

            if let Some(max_cost) = self.config.max_cost
                && self.spent() >= max_cost
            {
                warn!(instance_id = %self.instance_id(), spent = self.spent(), max_cost, "run: cost ceiling reached");
                return self.finish(TerminalReason::CostCeiling, None, last_reflection);
            }

            if attempt_number >= max_attempts {
                debug!(instance_id = %self.instance_id(), attempt_number, max_attempts, "run: attempts exhausted");
                match self.escalate(&task, last_reflection.as_deref()).await {
                    Escalation::Continue(hints) => {
                        info!(instance_id = %self.instance_id(), hint_count = hints.len(), "Human approved one more attempt");
                        max_attempts += 1;
                        task.merge_hints(&hints);
                        self.set_status(AgentStatus::Working);
                        continue;
                    }
                    Escalation::Declined => {
                        return self.finish(TerminalReason::EscalationDeclined, None, last_reflection);
                    }
                    Escalation::NoGate => {
                        return self.finish(TerminalReason::Exhausted, None, last_reflection);
                    }
                    Escalation::Cancelled => {
                        return self.finish(TerminalReason::Cancelled, None, last_reflection);
                    }
                }
            }

            attempt_number += 1;
            if attempt_number > 1 && !pause(&self.cancel, self.config.pause()).await {
                return self.finish(TerminalReason::Cancelled, None, last_reflection);
            }
            self.set_status(AgentStatus::Working);
            info!("{} attempt {}/{}", self.config.name, attempt_number, max_attempts);

            let mut open = OpenAttempt::open(attempt_number, strategy.clone());

            if attempt_number > 1 {
                match self.plan(&task, &mut open).await {
                    Some(planned) => strategy = planned,
                    None => {
                        self.close(open, "cancelled", false);
                        return self.finish(TerminalReason::Cancelled, None, last_reflection);
                    }
                }
                open.set_strategy(strategy.clone());
            }

            let (success, outcome, output) = match self.execute(&task, &mut open).await {
                Executed::Finished {
                    success,
                    outcome,
                    output,
                } => (success, outcome, output),
                Executed::Cancelled => {
                    self.close(open, "cancelled", false);
                    return self.finish(TerminalReason::Cancelled, None, last_reflection);
                }
            };

            if success {
                self.close(open, &outcome, true);
                return self.finish(TerminalReason::Success, output, last_reflection);
            }

            self.set_status(AgentStatus::Reflecting);
            match self.reflect(&outcome, &mut open).await {
                CallOutcome::Done(Some(reflection)) => last_reflection = Some(reflection),
                CallOutcome::Done(None) | CallOutcome::TimedOut(_) => {}
                CallOutcome::Cancelled => {
                    self.close(open, &outcome, false);
                    return self.finish(TerminalReason::Cancelled, None, last_reflection);
                }
            }
            self.close(open, &outcome, false);
        }
    }

    /// Ask the planner for a new strategy; None means cancelled
    ///
    /// Planner failures fall back to the previous strategy.
    async fn plan(&self, task: &Task, open: &mut OpenAttempt) -> Option<String> {
        let attempt_number = open.attempt_number();
        debug!(instance_id = %self.instance_id(), attempt_number, "plan: called");
        let planner = Arc::clone(&self.planner);
        let description = format!("Planning strategy for attempt {}", attempt_number);

        match guarded(&self.cancel, self.config.call_timeout(), planner.suggest(task, &self.history)).await {
            CallOutcome::Done(Ok(generated)) => {
                let (cost, units) = self.price(generated.usage.as_ref(), &self.config.name);
                let action = Action::new("plan_strategy", description, generated.value.clone(), true).with_cost(cost, units);
                self.record(open, action);
                debug!(instance_id = %self.instance_id(), strategy = %generated.value, "plan: new strategy");
                Some(generated.value)
            }
            CallOutcome::Done(Err(e)) => {
                warn!(instance_id = %self.instance_id(), error = %e, "plan: planner failed, keeping previous strategy");
                self.record(open, Action::new("plan_strategy", description, e.to_string(), false));
                Some(open.strategy().to_string())
            }
            CallOutcome::TimedOut(limit) => {
                warn!(instance_id = %self.instance_id(), ?limit, "plan: planner timed out, keeping previous strategy");
                self.record(
                    open,
                    Action::new("plan_strategy", description, format!("timed out after {:?}", limit), false),
                );
                Some(open.strategy().to_string())
            }
            CallOutcome::Cancelled => None,
        }
    }

    async fn execute(&self, task: &Task, open: &mut OpenAttempt) -> Executed {
        let attempt_number = open.attempt_number();
        debug!(instance_id = %self.instance_id(), attempt_number, "execute: called");
        let executor = Arc::clone(&self.executor);
        let strategy = open.strategy().to_string();

        match guarded(
            &self.cancel,
            self.config.execution_timeout(),
            executor.execute(task, &strategy, attempt_number),
        )
        .await
        {
            CallOutcome::Done(Ok(report)) => {
                for step in report.actions {
                    let (cost, units) = self.price(step.usage.as_ref(), &self.config.name);
                    let action = Action::new(step.action_type, step.description, step.result, step.success)
                        .with_cost(cost + step.recorded_cost, units);
                    self.record(open, action);
                }
                debug!(instance_id = %self.instance_id(), success = report.success, "execute: attempt finished");
                Executed::Finished {
                    success: report.success,
                    outcome: report.outcome,
                    output: report.output,
                }
            }
            CallOutcome::Done(Err(e)) => {
                warn!(instance_id = %self.instance_id(), attempt_number, error = %e, "execute: attempt raised");
                let outcome = format!("error: {}", e);
                self.record(open, Action::new("execute", "Execute attempt", outcome.clone(), false));
                Executed::Finished {
                    success: false,
                    outcome,
                    output: None,
                }
            }
            CallOutcome::TimedOut(limit) => {
                warn!(instance_id = %self.instance_id(), attempt_number, ?limit, "execute: attempt timed out");
                let outcome = format!("timed out after {:?}", limit);
                self.record(open, Action::new("execute", "Execute attempt", outcome.clone(), false));
                Executed::Finished {
                    success: false,
                    outcome,
                    output: None,
                }
            }
            CallOutcome::Cancelled => Executed::Cancelled,
        }
    }

    /// Reflect on a failed attempt; errors are logged and swallowed
    async fn reflect(&self, outcome: &str, open: &mut OpenAttempt) -> CallOutcome<Option<String>> {
        let attempt_number = open.attempt_number();
        debug!(instance_id = %self.instance_id(), attempt_number, "reflect: called");
        let reflector = Arc::clone(&self.reflector);
        let caller = format!("{}_reflection", self.config.name);

        match guarded(
            &self.cancel,
            self.config.call_timeout(),
            reflector.reflect(outcome, open.actions()),
        )
        .await
        {
            CallOutcome::Done(Ok(generated)) => {
                let (cost, units) = self.price(generated.usage.as_ref(), &caller);
                let action =
                    Action::new("reflect", "Reflect on failure", generated.value.clone(), true).with_cost(cost, units);
                self.record(open, action);
                self.events.reflection_recorded(attempt_number, &generated.value);
                info!(instance_id = %self.instance_id(), attempt_number, "Reflection recorded");
                CallOutcome::Done(Some(generated.value))
            }
            CallOutcome::Done(Err(e)) => {
                warn!(instance_id = %self.instance_id(), attempt_number, error = %e, "reflect: reflection failed");
                CallOutcome::Done(None)
            }
            CallOutcome::TimedOut(limit) => {
                warn!(instance_id = %self.instance_id(), attempt_number, ?limit, "reflect: reflection timed out");
                CallOutcome::TimedOut(limit)
            }
            CallOutcome::Cancelled => CallOutcome::Cancelled,
        }
    }

    async fn escalate(&mut self, task: &Task, last_reflection: Option<&str>) -> Escalation {
        let Some(gate) = self.gate.clone() else {
            debug!(instance_id = %self.instance_id(), "escalate: no gate configured");
            return Escalation::NoGate;
        };

        self.set_status(AgentStatus::WaitingHuman);
        self.events.escalation_requested(self.history.len() as u32);
        info!(instance_id = %self.instance_id(), attempts = self.history.len(), "Escalating to human");

        match guarded(
            &self.cancel,
            self.config.escalation_timeout(),
            gate.escalate(task, last_reflection, &self.history),
        )
        .await
        {
            CallOutcome::Done(Ok(decision)) if decision.continue_run => Escalation::Continue(decision.hints),
            CallOutcome::Done(Ok(_)) => {
                info!(instance_id = %self.instance_id(), "Human declined to continue");
                Escalation::Declined
            }
            CallOutcome::Done(Err(e)) => {
                warn!(instance_id = %self.instance_id(), error = %e, "escalate: gate failed, treating as declined");
                Escalation::Declined
            }
            CallOutcome::TimedOut(limit) => {
                warn!(instance_id = %self.instance_id(), ?limit, "escalate: gate timed out, treating as declined");
                Escalation::Declined
            }
            CallOutcome::Cancelled => Escalation::Cancelled,
        }
    }

    fn finish(&mut self, reason: TerminalReason, output: Option<Value>, last_reflection: Option<String>) -> RunResult {
        let success = reason == TerminalReason::Success;
        self.set_status(if success {
            AgentStatus::Success
        } else {
            AgentStatus::Failed
        });

        let total_cost = self.spent();
        let attempts = self.history.len() as u32;
        self.events.run_completed(success, attempts, total_cost, reason);
        if let Some(session) = &self.session {
            session.finish(self.events.instance_id());
        }
        info!(
            "{} finished: success={} attempts={} cost=${:.4} reason={}",
            self.config.name, success, attempts, total_cost, reason
        );

        RunResult {
            success,
            attempts: self.history.clone(),
            total_cost,
            terminal_reason: reason,
            output,
            last_reflection,
        }
    }
}
