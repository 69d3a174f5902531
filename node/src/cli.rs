//! # CLI Interface
//!
//! `accredit-node` subcommands: `run`, `init`, `demo` and `version`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// accredit devnet node.
///
/// Runs the credential pipeline against an in-process ledger, serves a
/// status API and Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "accredit-node",
    about = "accredit credential pipeline devnet node",
    version,
    propagate_version = true
)]
pub struct AccreditNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the devnet and serve the status API and metrics.
    Run(RunArgs),
    /// Create the data directory and write fresh devnet keys.
    Init(InitArgs),
    /// Walk every pipeline scenario against a throwaway devnet.
    Demo(DemoArgs),
    /// Print version information and exit.
    Version,
}

/// Options shared by every subcommand that starts a devnet.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Service configuration (JSON). Missing fields take their defaults.
    #[arg(long, short = 'c', env = "ACCREDIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log as JSON lines instead of human-readable text.
    #[arg(long, env = "ACCREDIT_LOG_JSON")]
    pub log_json: bool,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "ACCREDIT_LOG", default_value = "accredit_node=info,accredit_protocol=info,accredit_contracts=info")]
    pub log_level: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Data directory holding `keys.json` and the sled database.
    #[arg(long, short = 'd', env = "ACCREDIT_DATA_DIR", default_value = ".accredit")]
    pub data_dir: PathBuf,

    /// Port for the status API and `/metrics`.
    #[arg(long, env = "ACCREDIT_HTTP_PORT", default_value_t = 9851)]
    pub http_port: u16,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[arg(long, short = 'd', env = "ACCREDIT_DATA_DIR", default_value = ".accredit")]
    pub data_dir: PathBuf,

    /// Number of session validators to create keys for.
    #[arg(long, default_value_t = 1)]
    pub validators: usize,

    /// Overwrite an existing `keys.json`.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Seed for the devnet keys.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Print the final metrics snapshot.
    #[arg(long)]
    pub metrics: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        AccreditNodeCli::command().debug_assert();
    }

    #[test]
    fn demo_defaults() {
        let cli = AccreditNodeCli::parse_from(["accredit-node", "demo"]);
        match cli.command {
            Commands::Demo(args) => {
                assert_eq!(args.seed, 42);
                assert!(!args.metrics);
                assert!(args.node.config.is_none());
            }
            other => panic!("expected demo, got {other:?}"),
        }
    }
}
