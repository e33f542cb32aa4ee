//! CLI command implementations
//!
//! Each command computes a JSON value; `run` wraps it in the response
//! envelope. Commands never touch the network.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};

use crate::barrier::barrier_backoff;
use crate::config::RouterConfig;
use crate::observability::{Logger, Severity};
use crate::session::SessionToken;

use super::args::{Cli, Command, ConfigAction, TokenAction};
use super::errors::CliResult;
use super::io::write_response;

/// Parse arguments, run the command, print the result.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    if cli.verbose {
        Logger::set_min_severity(Severity::Info);
    }
    let data = run_command(cli.command)?;
    write_response(data)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<Value> {
    match cmd {
        Command::Token {
            action: TokenAction::Merge { left, right },
        } => merge_tokens(&left, &right),
        Command::Token {
            action: TokenAction::Check { required, observed },
        } => check_token(&required, &observed),
        Command::Config {
            action: ConfigAction::Check { config },
        } => check_config(&config),
        Command::Config {
            action: ConfigAction::Defaults,
        } => default_config(),
        Command::BarrierDelay { gap, latency_ms } => barrier_delay(gap, latency_ms),
    }
}

/// Merge two tokens into their element-wise maximum.
pub fn merge_tokens(left: &str, right: &str) -> CliResult<Value> {
    let left = SessionToken::parse(left)?;
    let right = SessionToken::parse(right)?;
    let merged = left.merge(&right)?;
    Ok(json!({ "merged": merged.to_string() }))
}

/// Whether `observed` has progressed at least as far as `required`.
pub fn check_token(required: &str, observed: &str) -> CliResult<Value> {
    let required = SessionToken::parse(required)?;
    let observed = SessionToken::parse(observed)?;
    Ok(json!({
        "required": required.to_string(),
        "observed": observed.to_string(),
        "satisfied": required.is_valid(&observed),
    }))
}

/// Load and validate a config file, echoing the effective values.
pub fn check_config(path: &Path) -> CliResult<Value> {
    let config = RouterConfig::load(path)?;
    Ok(json!({
        "valid": true,
        "config": serde_json::to_value(&config)?,
    }))
}

pub fn default_config() -> CliResult<Value> {
    Ok(serde_json::to_value(RouterConfig::default())?)
}

pub fn barrier_delay(gap: u64, latency_ms: u64) -> CliResult<Value> {
    let delay = barrier_backoff(gap, Duration::from_millis(latency_ms));
    Ok(json!({
        "gap": gap,
        "latency_ms": latency_ms,
        "delay_ms": delay.as_millis() as u64,
    }))
}
