//! LLM-backed planner and reflector
//!
//! Thin adapters from the retry engine's collaborator traits onto an
//! [`LlmClient`]. Token usage is reported back keyed by the client's model id
//! so the engine can price it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CompletionRequest, LlmClient};
use crate::collab::{CollaboratorError, Generated, ReflectionProvider, StrategyPlanner};
use crate::domain::{Action, Attempt, Task};

const PLANNER_MAX_TOKENS: u32 = 500;
const REFLECTOR_MAX_TOKENS: u32 = 800;

/// Suggests a revised strategy from the attempt history
pub struct LlmStrategyPlanner {
    client: Arc<dyn LlmClient>,
    agent_name: String,
}

impl LlmStrategyPlanner {
    pub fn new(client: Arc<dyn LlmClient>, agent_name: impl Into<String>) -> Self {
        Self {
            client,
            agent_name: agent_name.into(),
        }
    }

    fn prompt(&self, task: &Task, history: &[Attempt]) -> (String, String) {
        let system = format!(
            "You plan retry strategies for the agent '{}'. Reply with one specific, actionable strategy \
             that differs from every strategy already tried.",
            self.agent_name
        );
        let mut user = format!("Task: {}\n", task.description);
        if !task.context.is_empty() {
            user.push_str(&format!("Context: {}\n", serde_json::Value::Object(task.context.clone())));
        }
        user.push_str("\nPrevious attempts:\n");
        for attempt in history {
            user.push_str(&format!("- {}\n", attempt.summary()));
        }
        (system, user)
    }
}

#[async_trait]
impl StrategyPlanner for LlmStrategyPlanner {
    async fn suggest(&self, task: &Task, history: &[Attempt]) -> Result<Generated<String>, CollaboratorError> {
        debug!(task_id = %task.id, history_len = history.len(), "LlmStrategyPlanner::suggest: called");
        let (system, user) = self.prompt(task, history);
        let response = self
            .client
            .complete(CompletionRequest::single(system, user, PLANNER_MAX_TOKENS))
            .await?;
        let strategy = response
            .content
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CollaboratorError::failed("planner returned no text"))?;
        Ok(Generated::new(strategy, Some(response.usage.to_usage(self.client.model()))))
    }
}

/// Explains why an attempt failed
pub struct LlmReflector {
    client: Arc<dyn LlmClient>,
    agent_name: String,
}

impl LlmReflector {
    pub fn new(client: Arc<dyn LlmClient>, agent_name: impl Into<String>) -> Self {
        Self {
            client,
            agent_name: agent_name.into(),
        }
    }

    fn prompt(&self, failed_outcome: &str, actions: &[Action]) -> (String, String) {
        let system = format!(
            "You review failed attempts for the agent '{}'. Say why the attempt failed, \
             which assumptions were wrong, and what to try next.",
            self.agent_name
        );
        let mut user = format!("Outcome: {}\n\nActions:\n", failed_outcome);
        for action in actions {
            user.push_str(&format!(
                "- {} [{}]: {}\n",
                action.action_type,
                if action.success { "ok" } else { "failed" },
                action.result
            ));
        }
        (system, user)
    }
}

#[async_trait]
impl ReflectionProvider for LlmReflector {
    async fn reflect(&self, failed_outcome: &str, actions: &[Action]) -> Result<Generated<String>, CollaboratorError> {
        debug!(action_count = actions.len(), "LlmReflector::reflect: called");
        let (system, user) = self.prompt(failed_outcome, actions);
        let response = self
            .client
            .complete(CompletionRequest::single(system, user, REFLECTOR_MAX_TOKENS))
            .await?;
        let reflection = response.content.unwrap_or_default();
        Ok(Generated::new(reflection, Some(response.usage.to_usage(self.client.model()))))
    }
}
