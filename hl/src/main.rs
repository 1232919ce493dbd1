//! healloop CLI
//!
//! Inspection commands for configuration, prices and recorded sessions.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use eyre::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

use healloop::cli::{Cli, Command, OutputFormat, generate_after_help};
use healloop::collab::ReflectionProvider;
use healloop::config::Config;
use healloop::cost::{CostLedger, NANOS_PER_USD, PriceTable};
use healloop::events::{SessionRecord, read_session};
use healloop::llm::{LlmReflector, create_client};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("healloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("healloop.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Prices { format } => cmd_prices(&config, format),
        Command::Session { id, dir, format } => cmd_session(&config, &id, dir, format),
        Command::Reflect { outcome, agent } => cmd_reflect(&config, &outcome, &agent).await,
    }
}

/// Print the resolved configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

fn per_million(nanos_per_unit: u64) -> f64 {
    nanos_per_unit as f64 * 1_000_000.0 / NANOS_PER_USD as f64
}

/// Print the price table
fn cmd_prices(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_prices: called");
    let table: PriceTable = config.price_table();
    let entries = table.entries();

    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = entries
                .iter()
                .map(|(resource, price)| {
                    json!({
                        "resource": resource,
                        "input_per_million": per_million(price.input_nanos_per_unit),
                        "output_per_million": per_million(price.output_nanos_per_unit),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            println!("{:<32} {:>12} {:>12}", "RESOURCE", "INPUT $/M", "OUTPUT $/M");
            for (resource, price) in &entries {
                println!(
                    "{:<32} {:>12.2} {:>12.2}",
                    resource,
                    per_million(price.input_nanos_per_unit),
                    per_million(price.output_nanos_per_unit)
                );
            }
        }
        OutputFormat::Text => {
            for (resource, price) in &entries {
                println!(
                    "{}: ${:.2}/M in, ${:.2}/M out",
                    resource,
                    per_million(price.input_nanos_per_unit),
                    per_million(price.output_nanos_per_unit)
                );
            }
        }
    }
    Ok(())
}

/// Replay a recorded session
fn cmd_session(config: &Config, id: &str, dir: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    debug!(%id, ?dir, %format, "cmd_session: called");
    let dir = dir.unwrap_or_else(|| PathBuf::from(&config.storage.sessions_dir));
    let records: Vec<SessionRecord> =
        read_session(&dir, id).context(format!("Failed to read session {} from {}", id, dir.display()))?;

    if records.is_empty() {
        println!("No attempts recorded for session {}", id);
        return Ok(());
    }

    let success = records.iter().any(|r| r.attempt.success);
    let total_cost: f64 = records.iter().map(|r| r.attempt.total_cost).sum();

    match format {
        OutputFormat::Json => {
            let attempts: Vec<_> = records.iter().map(|r| &r.attempt).collect();
            let out = json!({
                "session_id": id,
                "attempts": attempts,
                "success": success,
                "total_cost": total_cost,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!("{:<8} {:<8} {:>10} {:>8}  STRATEGY", "ATTEMPT", "SUCCESS", "COST", "ACTIONS");
            for r in &records {
                println!(
                    "{:<8} {:<8} {:>10.4} {:>8}  {}",
                    r.attempt.attempt_number,
                    r.attempt.success,
                    r.attempt.total_cost,
                    r.attempt.actions.len(),
                    r.attempt.strategy
                );
            }
            println!("\nsuccess={} attempts={} total_cost=${:.4}", success, records.len(), total_cost);
        }
        OutputFormat::Text => {
            println!("Session {}", id);
            for r in &records {
                println!("  [{}] {}", r.timestamp.format("%Y-%m-%d %H:%M:%S"), r.attempt.summary());
                for action in &r.attempt.actions {
                    let mark = if action.success { "ok" } else { "FAIL" };
                    println!("      {:<4} {}: {} (${:.4})", mark, action.action_type, action.description, action.cost);
                }
            }
            println!("Success: {}", success);
            println!("Attempts: {}", records.len());
            println!("Total cost: ${:.4}", total_cost);
        }
    }
    Ok(())
}

/// Reflect on a failed outcome with the configured LLM
async fn cmd_reflect(config: &Config, outcome: &str, agent: &str) -> Result<()> {
    debug!(%agent, "cmd_reflect: called");
    let client = create_client(&config.llm).context("Failed to create LLM client")?;
    let ledger = CostLedger::new(Arc::new(config.price_table()));
    let reflector = LlmReflector::new(client, agent);

    let generated = reflector
        .reflect(outcome, &[])
        .await
        .context("Reflection failed")?;

    let cost = generated
        .usage
        .as_ref()
        .map(|u| ledger.record_usage(&u.resource_id, u.input_units, u.output_units, &format!("{}_reflection", agent)))
        .unwrap_or(0.0);

    println!("{}", generated.value);
    println!("\n(cost: ${:.4})", cost);
    info!(%agent, cost, "cmd_reflect: done");
    Ok(())
}
