//! # Keel Terminal Entry Point
//!
//! ```text
//! keel-terminal [CONFIG_PATH]
//! ```
//!
//! Without a path the platform config location is used
//! (see `TerminalConfig::default_config_path`).

use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    keel_terminal::init_tracing();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    match keel_terminal::run(config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Terminal stopped with an error");
            ExitCode::FAILURE
        }
    }
}
