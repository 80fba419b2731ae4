//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config file used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG: &str = "etc/ferm_config.toml";

#[derive(Parser, Debug)]
#[command(name = "ferm", version, about = "Fermentation chamber controller")]
pub struct Cli {
    /// Path to config TOML (defaults to etc/ferm_config.toml, or built-in defaults if absent)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and print as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG takes precedence
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the chamber against the simulated plant
    Run {
        /// How long to run, in (simulated) seconds
        #[arg(long, value_name = "N")]
        seconds: u64,
        /// Beer setpoint in degC (overrides config and stored state)
        #[arg(long, value_name = "C", allow_negative_numbers = true)]
        setpoint: Option<f64>,
        /// Room temperature around the simulated chamber, degC
        #[arg(long, value_name = "C", default_value_t = 22.0, allow_negative_numbers = true)]
        ambient: f64,
        /// Drive a simulated clock instead of waiting in real time
        #[arg(long, action = ArgAction::SetTrue)]
        speedup: bool,
    },
    /// Discover probes on the bus and print their addresses
    SelfCheck,
    /// Print the persisted controller record
    State,
}
