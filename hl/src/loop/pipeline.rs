//! Generate-and-validate attempt executor
//!
//! Plugs a generator and a [`ValidationLoop`] into a [`RetryEngine`](super::RetryEngine):
//! each attempt generates a fresh artifact for the current strategy and runs
//! it through validation. The task context (including any escalation hints)
//! is passed to the repair requester as domain context.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::collab::{ActionReport, ArtifactGenerator, AttemptExecutor, AttemptReport, CollaboratorError};
use crate::domain::Task;

use super::schema::ExpectedShape;
use super::validation::ValidationLoop;

pub struct GenerateAndValidate {
    generator: Arc<dyn ArtifactGenerator>,
    validator: Arc<ValidationLoop>,
    input: Value,
    shape: ExpectedShape,
}

impl GenerateAndValidate {
    pub fn new(
        generator: Arc<dyn ArtifactGenerator>,
        validator: Arc<ValidationLoop>,
        input: Value,
        shape: ExpectedShape,
    ) -> Self {
        Self {
            generator,
            validator,
            input,
            shape,
        }
    }
}

#[async_trait]
impl AttemptExecutor for GenerateAndValidate {
    async fn execute(&self, task: &Task, strategy: &str, attempt: u32) -> Result<AttemptReport, CollaboratorError> {
        debug!(task_id = %task.id, attempt, %strategy, "GenerateAndValidate::execute: called");

        let generated = self.generator.generate(task, strategy).await?;
        let artifact = generated.value;
        let mut generate = ActionReport::new(
            "generate",
            format!("Generate {} for attempt {}", artifact.manifest.entry_point, attempt),
            format!("{} bytes", artifact.len()),
            true,
        );
        if let Some(usage) = generated.usage {
            generate = generate.with_usage(usage);
        }

        let domain_context = (!task.context.is_empty()).then(|| Value::Object(task.context.clone()));
        let outcome = self
            .validator
            .run(artifact, &self.input, &self.shape, domain_context.as_ref())
            .await;

        let summary = match (outcome.success, outcome.confidence) {
            (true, Some(confidence)) => format!(
                "validated after {} execution(s), {} repair(s), confidence {:.2}",
                outcome.attempts(),
                outcome.repairs,
                confidence
            ),
            _ => {
                let last_error = outcome
                    .history
                    .last()
                    .and_then(|r| r.error_text.clone())
                    .unwrap_or_default();
                let kind = outcome.failure_kind.map(|k| k.to_string()).unwrap_or_default();
                format!(
                    "validation failed ({}, {}) after {} execution(s): {}",
                    outcome.terminal_reason,
                    kind,
                    outcome.attempts(),
                    last_error
                )
            }
        };
        info!(task_id = %task.id, attempt, success = outcome.success, "{}", summary);

        let validate = ActionReport::new("validate", "Validate and repair artifact", summary.clone(), outcome.success)
            .with_recorded_cost(outcome.total_cost);
        let base = if outcome.success {
            AttemptReport::success(summary)
        } else {
            AttemptReport::failure(summary)
        };

        let report = base.with_action(generate).with_action(validate);
        if outcome.success {
            Ok(report.with_output(json!({
                "artifact": outcome.artifact,
                "confidence": outcome.confidence,
                "repairs": outcome.repairs,
                "prior_fixes": outcome.prior_fixes,
            })))
        } else {
            Ok(report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mock::{MockGenerator, MockHarness, MockPlanner, MockReflector, MockRepairer, MockStore};
    use crate::collab::{ExecutionReport, RepairOutcome};
    use crate::cost::CostLedger;
    use crate::domain::{Artifact, TerminalReason};
    use crate::r#loop::{RetryConfig, RetryEngine, ValidationConfig};
    use crate::r#loop::schema::FieldType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails fast on the first run, then hangs
    struct HangsOnRerun {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::collab::ArtifactExecutor for HangsOnRerun {
        async fn execute(&self, _artifact: &Artifact, _input: &Value) -> Result<ExecutionReport, CollaboratorError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(ExecutionReport::failed("no such element"));
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ExecutionReport::succeeded(json!({"name": "Ada"})))
        }
    }

    #[tokio::test]
    async fn test_generate_and_validate_under_retry_engine() {
        let ledger = Arc::new(CostLedger::default());
        let harness = Arc::new(MockHarness::new(vec![
            Ok(ExecutionReport::failed("no such element")),
            Ok(ExecutionReport::succeeded(json!({"name": "Ada"}))),
        ]));
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            Artifact::new("Form.fill", "fill(#name)"),
            vec!["fix selector".to_string()],
        ))]));
        let store = Arc::new(MockStore::new());
        let validator = ValidationLoop::builder()
            .config(ValidationConfig::default())
            .executor(harness)
            .repairer(repairer.clone())
            .store(store.clone())
            .ledger(ledger.clone())
            .build()
            .unwrap();
        let generator = Arc::new(MockGenerator::new(Artifact::new("Form.fill", "fill(#nme)")));
        let driver = GenerateAndValidate::new(
            generator.clone(),
            Arc::new(validator),
            json!({"name": "Ada"}),
            ExpectedShape::new().field("name", FieldType::String),
        );

        let mut engine = RetryEngine::builder()
            .config(RetryConfig {
                pause_ms: 0,
                ..Default::default()
            })
            .executor(Arc::new(driver))
            .planner(Arc::new(MockPlanner::new()))
            .reflector(Arc::new(MockReflector::new()))
            .ledger(ledger.clone())
            .build()
            .unwrap();

        let task = Task::new("fill the form").with_context("portal", json!("pension"));
        let result = engine.run(task).await;

        assert!(result.success);
        assert_eq!(result.terminal_reason, TerminalReason::Success);
        assert_eq!(generator.call_count(), 1);
        assert_eq!(store.records().len(), 1);
        assert_eq!(result.output.as_ref().unwrap()["artifact"]["content"], "fill(#name)");
        // task context flows to repair as domain context
        assert_eq!(
            repairer.requests()[0].domain_context,
            Some(json!({"portal": "pension"}))
        );
        // generation is priced under the engine's name
        assert!(ledger.caller_totals("agent").is_some());
        assert!((result.total_cost - ledger.total_cost()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_outer_timeout_leaves_inner_spend_in_ledger_only() {
        let ledger = Arc::new(CostLedger::default());
        let repairer = Arc::new(MockRepairer::new(vec![Ok(RepairOutcome::fixed(
            Artifact::new("Form.fill", "fill(#name)"),
            vec!["fix selector".to_string()],
        )
        .with_usage(crate::domain::Usage::new("claude-haiku-4-5", 1000, 1000)))]));
        let validator = ValidationLoop::builder()
            .name("validator")
            .executor(Arc::new(HangsOnRerun {
                calls: AtomicUsize::new(0),
            }))
            .repairer(repairer.clone())
            .ledger(ledger.clone())
            .build()
            .unwrap();
        let driver = GenerateAndValidate::new(
            Arc::new(MockGenerator::new(Artifact::new("Form.fill", "fill(#nme)"))),
            Arc::new(validator),
            json!({}),
            ExpectedShape::new().field("name", FieldType::String),
        );

        let mut engine = RetryEngine::builder()
            .config(RetryConfig {
                max_attempts: 1,
                pause_ms: 0,
                execution_timeout_ms: 200,
                ..Default::default()
            })
            .executor(Arc::new(driver))
            .planner(Arc::new(MockPlanner::new()))
            .reflector(Arc::new(MockReflector::new()))
            .ledger(ledger.clone())
            .build()
            .unwrap();

        let result = engine.run(Task::new("fill the form")).await;

        assert!(!result.success);
        assert_eq!(repairer.call_count(), 1);
        // the abandoned attempt never reported the repair spend
        let repair_spend = ledger.caller_totals("validator").unwrap().cost_usd;
        assert!((repair_spend - 0.006).abs() < 1e-9);
        assert!((ledger.total_cost() - result.total_cost - repair_spend).abs() < 1e-9);
    }
}
