//! # CLI Interface
//!
//! Defines the command-line argument structure for `bank-node` using
//! `clap` derive. Supports four subcommands: `run`, `provision-atm`,
//! `settle`, and `version`.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Bank ledger node.
///
/// Serves the account, transfer and ATM HTTP API over a sled-backed ledger,
/// settles pending transactions in the background, and exposes Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[command(
    name = "bank-node",
    about = "Bank ledger node",
    version,
    propagate_version = true
)]
pub struct BankNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the bank node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP node.
    Run(RunArgs),
    /// Register a new ATM and its vault account.
    ProvisionAtm(ProvisionAtmArgs),
    /// Run one settlement pass over pending transactions and exit.
    Settle(SettleArgs),
    /// Print version information and exit.
    Version,
}

/// Options shared by every subcommand that opens the ledger.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the JSON configuration file. Defaults are used when omitted.
    #[arg(long, short = 'c', env = "BANK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `database.path` from the configuration file.
    #[arg(long, short = 'd', env = "BANK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Overrides `log.format` ("pretty" or "json").
    #[arg(long, env = "BANK_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Overrides `http.listen`.
    #[arg(long, env = "BANK_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Overrides `http.metricsListen`.
    #[arg(long, env = "BANK_METRICS_LISTEN")]
    pub metrics_listen: Option<SocketAddr>,

    /// Disable the background settlement worker.
    #[arg(long)]
    pub no_settlement: bool,
}

/// Arguments for the `provision-atm` subcommand.
#[derive(Parser, Debug)]
pub struct ProvisionAtmArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Login the ATM will authenticate with.
    #[arg(long)]
    pub login: String,

    /// ATM password. Prefer the environment variable over the flag.
    #[arg(long, env = "BANK_ATM_PASSWORD", hide_env_values = true)]
    pub password: String,
}

/// Arguments for the `settle` subcommand.
#[derive(Parser, Debug)]
pub struct SettleArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Overrides `settlement.batchSize`.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        BankNodeCli::command().debug_assert();
    }

    #[test]
    fn parses_provision_atm() {
        let cli = BankNodeCli::try_parse_from([
            "bank-node",
            "provision-atm",
            "--login",
            "lobby-1",
            "--password",
            "secret",
            "-c",
            "config.json",
        ])
        .unwrap();
        match cli.command {
            Commands::ProvisionAtm(args) => {
                assert_eq!(args.login, "lobby-1");
                assert_eq!(args.password, "secret");
                assert_eq!(args.common.config, Some(PathBuf::from("config.json")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_overrides_are_optional() {
        let cli = BankNodeCli::try_parse_from(["bank-node", "run", "--no-settlement"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert!(args.no_settlement);
                assert!(args.listen.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
