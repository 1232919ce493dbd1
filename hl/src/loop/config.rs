//! Loop configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Strategy used for the first attempt
pub const BASELINE_STRATEGY: &str = "Initial exploration with standard approach";

/// Configuration for a [`RetryEngine`](super::RetryEngine)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Engine name; used as the caller id in the cost ledger
    pub name: String,

    /// Attempts before escalation
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Strategy for attempt 1; no planner call is made for it
    #[serde(rename = "baseline-strategy")]
    pub baseline_strategy: String,

    /// Pause between a failed attempt and the next one
    #[serde(rename = "pause-ms")]
    pub pause_ms: u64,

    /// Timeout for planner and reflection calls
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,

    /// Timeout for one attempt execution
    #[serde(rename = "execution-timeout-ms")]
    pub execution_timeout_ms: u64,

    /// Timeout for the human gate
    #[serde(rename = "escalation-timeout-ms")]
    pub escalation_timeout_ms: u64,

    /// Stop once this much has been spent (USD)
    #[serde(rename = "max-cost", skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
}

fn default_call_timeout_ms() -> u64 {
    debug!("default_call_timeout_ms: called");
    120_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        debug!("RetryConfig::default: called");
        Self {
            name: "agent".to_string(),
            max_attempts: 3,
            baseline_strategy: BASELINE_STRATEGY.to_string(),
            pause_ms: 2_000,
            call_timeout_ms: default_call_timeout_ms(),
            execution_timeout_ms: 300_000,
            escalation_timeout_ms: 600_000,
            max_cost: None,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_attempts == 0 {
            return Err(eyre::eyre!("max-attempts must be at least 1"));
        }
        check_cost(self.max_cost)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_millis(self.escalation_timeout_ms)
    }
}

/// Configuration for a [`ValidationLoop`](super::ValidationLoop)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Executions before giving up
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Consecutive identical or failed repairs that end the loop early
    #[serde(rename = "max-unproductive-repairs")]
    pub max_unproductive_repairs: u32,

    /// Harness timeout per execution
    #[serde(rename = "execution-timeout-ms")]
    pub execution_timeout_ms: u64,

    /// Timeout for repair and verifier calls
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,

    /// Confidence before repair penalties
    #[serde(rename = "baseline-confidence")]
    pub baseline_confidence: f64,

    /// Stop once this much has been spent (USD)
    #[serde(rename = "max-cost", skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        debug!("ValidationConfig::default: called");
        Self {
            max_attempts: 3,
            max_unproductive_repairs: 2,
            execution_timeout_ms: 60_000,
            call_timeout_ms: default_call_timeout_ms(),
            baseline_confidence: 0.8,
            max_cost: None,
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_attempts == 0 {
            return Err(eyre::eyre!("max-attempts must be at least 1"));
        }
        if self.max_unproductive_repairs == 0 {
            return Err(eyre::eyre!("max-unproductive-repairs must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.baseline_confidence) {
            return Err(eyre::eyre!("baseline-confidence must be in [0, 1]"));
        }
        check_cost(self.max_cost)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Configuration for an [`ImprovementCycleTracker`](super::ImprovementCycleTracker)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImprovementConfig {
    #[serde(rename = "max-cycles")]
    pub max_cycles: u32,

    /// Success rate that ends the run successfully
    #[serde(rename = "target-success-rate")]
    pub target_success_rate: f64,

    /// Cumulative spend that ends the run (USD)
    #[serde(rename = "max-cost")]
    pub max_cost: f64,

    /// Failing cases sent for analysis per cycle
    #[serde(rename = "max-failures-analyzed")]
    pub max_failures_analyzed: usize,

    /// Suggestions applied per cycle, highest confidence first
    #[serde(rename = "max-improvements-per-cycle")]
    pub max_improvements_per_cycle: usize,

    /// Suggestions below this confidence are ignored
    #[serde(rename = "min-suggestion-confidence")]
    pub min_suggestion_confidence: f64,

    /// Cycles inspected for a non-increasing trend
    #[serde(rename = "degrade-window")]
    pub degrade_window: usize,

    /// Harness timeout per test case
    #[serde(rename = "execution-timeout-ms")]
    pub execution_timeout_ms: u64,

    /// Timeout for analysis and apply calls
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,
}

impl Default for ImprovementConfig {
    fn default() -> Self {
        debug!("ImprovementConfig::default: called");
        Self {
            max_cycles: 5,
            target_success_rate: 0.9,
            max_cost: 2.0,
            max_failures_analyzed: 3,
            max_improvements_per_cycle: 5,
            min_suggestion_confidence: 0.0,
            degrade_window: 3,
            execution_timeout_ms: 60_000,
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl ImprovementConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_cycles == 0 {
            return Err(eyre::eyre!("max-cycles must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.target_success_rate) {
            return Err(eyre::eyre!("target-success-rate must be in [0, 1]"));
        }
        if self.degrade_window < 2 {
            return Err(eyre::eyre!("degrade-window must be at least 2"));
        }
        check_cost(Some(self.max_cost))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn check_cost(max_cost: Option<f64>) -> eyre::Result<()> {
    match max_cost {
        Some(c) if !(c.is_finite() && c >= 0.0) => Err(eyre::eyre!("max-cost must be a non-negative number")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.baseline_strategy, BASELINE_STRATEGY);
        assert_eq!(config.pause(), Duration::from_secs(2));
        assert!(config.max_cost.is_none());
    }

    #[test]
    fn test_improvement_defaults() {
        let config = ImprovementConfig::default();
        assert_eq!(config.max_cycles, 5);
        assert_eq!(config.target_success_rate, 0.9);
        assert_eq!(config.max_cost, 2.0);
        assert_eq!(config.max_improvements_per_cycle, 5);
        assert_eq!(config.degrade_window, 3);
    }

    #[test]
    fn test_deserialize_minimal() {
        let yaml = "max-attempts: 4\nmax-cost: 0.5\n";
        let config: RetryConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.max_cost, Some(0.5));
        assert_eq!(config.call_timeout_ms, 120_000);
    }

    #[test]
    fn test_validate() {
        assert!(ValidationConfig::default().validate().is_ok());

        let bad = ValidationConfig {
            baseline_confidence: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = ImprovementConfig {
            target_success_rate: -0.1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = RetryConfig {
            max_cost: Some(f64::NAN),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
