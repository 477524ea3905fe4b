//! # CLI Interface
//!
//! Command-line structure for `capvault-node`, built with `clap` derive.
//! Four subcommands: `run`, `init`, `inspect`, and `version`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use capvault_protocol::config::{
    LedgerConfig, DEFAULT_API_PORT, DEFAULT_GLOBAL_CAP, DEFAULT_METRICS_PORT,
    DEFAULT_PER_WITHDRAWAL_CAP,
};

use crate::logging::LogFormat;

/// Capped custodial ledger node.
///
/// Holds a persistent vault ledger, serves deposit and withdrawal requests
/// over HTTP, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "capvault-node",
    about = "Capped custodial vault ledger node",
    version,
    propagate_version = true
)]
pub struct CapvaultNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load (or create) the ledger and serve the API.
    Run(RunArgs),
    /// Create a new ledger in the data directory with the given caps.
    Init(InitArgs),
    /// Print the persisted ledger as JSON and exit.
    Inspect(InspectArgs),
    /// Print version information and exit.
    Version,
}

/// Ledger caps. Only used when a ledger is first created; a persisted
/// ledger keeps the caps it was created with.
#[derive(Args, Debug, Clone, Copy)]
pub struct CapArgs {
    /// Maximum sum of all balances.
    #[arg(long, env = "CAPVAULT_GLOBAL_CAP", default_value_t = DEFAULT_GLOBAL_CAP)]
    pub global_cap: u64,

    /// Maximum amount of a single withdrawal.
    #[arg(
        long,
        env = "CAPVAULT_PER_WITHDRAWAL_CAP",
        default_value_t = DEFAULT_PER_WITHDRAWAL_CAP
    )]
    pub per_withdrawal_cap: u64,
}

impl From<CapArgs> for LedgerConfig {
    fn from(caps: CapArgs) -> Self {
        LedgerConfig {
            global_cap: caps.global_cap,
            per_withdrawal_cap: caps.per_withdrawal_cap,
        }
    }
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the ledger database. Created if missing.
    #[arg(long, short = 'd', env = "CAPVAULT_DATA_DIR", default_value = "capvault-data")]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub caps: CapArgs,

    /// Port for the HTTP API.
    #[arg(long, env = "CAPVAULT_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CAPVAULT_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "CAPVAULT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to create the ledger in.
    #[arg(long, short = 'd', env = "CAPVAULT_DATA_DIR", default_value = "capvault-data")]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub caps: CapArgs,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Directory holding the ledger database.
    #[arg(long, short = 'd', env = "CAPVAULT_DATA_DIR", default_value = "capvault-data")]
    pub data_dir: PathBuf,
}
