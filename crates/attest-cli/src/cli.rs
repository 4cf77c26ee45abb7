use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "attest")]
#[command(version, about = "Check structured model output against validation strategies", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Runtime config file (YAML or JSON)
    #[arg(long, global = true, env = "ATTEST_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered strategies
    Strategies {
        /// Directory of plugin definitions to discover
        #[arg(long)]
        plugins: Option<PathBuf>,

        /// Reject duplicate strategy names
        #[arg(long)]
        strict: bool,
    },

    /// Validate a saved JSON response once
    Check {
        /// JSON response to validate
        #[arg(long)]
        response: PathBuf,

        /// Reference texts: a JSON array of strings, or one plain-text document
        #[arg(long)]
        references: Option<PathBuf>,

        /// Strategy to run, in order (repeatable). Defaults to `citation`.
        #[arg(long = "strategy", value_name = "NAME")]
        strategies: Vec<String>,

        /// Directory of plugin definitions to discover
        #[arg(long)]
        plugins: Option<PathBuf>,

        /// Stop at the first failing strategy
        #[arg(long)]
        short_circuit: bool,

        /// Write the trace tree as JSON
        #[arg(long, value_name = "FILE")]
        trace_out: Option<PathBuf>,
    },
}
