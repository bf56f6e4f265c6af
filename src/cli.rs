use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tradegate")]
#[command(version)]
#[command(about = "Ensemble trading decision and execution core", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "TRADEGATE_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect every enabled account and dispatch decisions for JSON-line ticks read from stdin
    Run,
    /// Print decisions for JSON-line ticks without dispatching anything
    Predict {
        /// Tick file; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Handshake and heartbeat against one account's agent
    Ping {
        /// Account id from the configuration
        account: String,
    },
    /// Load and validate the configuration
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_predict_with_file() {
        let cli = Cli::parse_from(["tradegate", "--config-dir", "conf", "predict", "--file", "ticks.jsonl"]);
        assert_eq!(cli.config_dir, PathBuf::from("conf"));
        match cli.command {
            Commands::Predict { file } => assert_eq!(file, Some(PathBuf::from("ticks.jsonl"))),
            _ => panic!("expected predict"),
        }
    }
}
