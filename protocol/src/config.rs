//! # Configuration & Constants
//!
//! Default caps and host parameters. Caps are fixed when a ledger is
//! constructed and can never change afterwards, so the defaults here only
//! matter the first time a data directory is initialized.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Ledger protocol version, reported by hosts alongside the crate version.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Ledger Caps
// ---------------------------------------------------------------------------

/// Default ceiling on the sum of all vault balances.
pub const DEFAULT_GLOBAL_CAP: u64 = 1_000_000_000;

/// Default ceiling on a single withdrawal.
pub const DEFAULT_PER_WITHDRAWAL_CAP: u64 = 10_000_000;

/// Committed events retained in memory. Older events are evicted first.
pub const EVENT_LOG_CAPACITY: usize = 1_024;

// ---------------------------------------------------------------------------
// Host Parameters
// ---------------------------------------------------------------------------

/// Default port for the ledger HTTP API.
pub const DEFAULT_API_PORT: u16 = 9841;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Header carrying the authenticated caller identity into the host API.
pub const CALLER_HEADER: &str = "x-caller";

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// The two construction-time parameters of a vault ledger.
///
/// Not validated here: a zero cap is rejected by the ledger constructor,
/// which owns that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Maximum permitted sum of all vault balances.
    pub global_cap: u64,
    /// Maximum amount any single withdrawal may move.
    pub per_withdrawal_cap: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            global_cap: DEFAULT_GLOBAL_CAP,
            per_withdrawal_cap: DEFAULT_PER_WITHDRAWAL_CAP,
        }
    }
}
