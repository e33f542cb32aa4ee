//! aeroroute CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`. Errors are printed
//! as a JSON error envelope and the process exits non-zero.

use aeroroute::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        std::process::exit(1);
    }
}
