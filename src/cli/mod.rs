//! CLI module for aeroroute
//!
//! Offline diagnostics:
//! - token: merge and check session tokens
//! - config: validate a config file, print defaults
//! - barrier-delay: probe pacing for a given gap

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, ConfigAction, TokenAction};
pub use commands::{
    barrier_delay, check_config, check_token, default_config, merge_tokens, run, run_command,
};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{error_envelope, response_envelope, write_error, write_response};
