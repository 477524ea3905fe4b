//! # Ledger Events
//!
//! Immutable facts recorded for every committed deposit and withdrawal.
//! Events are informative only: nothing in the ledger reads them back, and a
//! rolled-back operation leaves no event behind.

use capvault_protocol::identity::AccountId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which balance-mutating operation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Deposit => write!(f, "deposit"),
            OperationKind::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

/// The step an operation is in. Carried in logs so a rollback names the
/// step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Validating,
    Mutating,
    Transferring,
    Emitting,
}

impl fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationPhase::Validating => write!(f, "validating"),
            OperationPhase::Mutating => write!(f, "mutating"),
            OperationPhase::Transferring => write!(f, "transferring"),
            OperationPhase::Emitting => write!(f, "emitting"),
        }
    }
}

/// A committed balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEvent {
    /// 1-based position in the ledger's event log.
    pub sequence: u64,
    /// Deposit or withdrawal.
    pub kind: OperationKind,
    /// The account whose vault changed.
    pub account: AccountId,
    /// Amount moved.
    pub amount: u64,
    /// The account's balance after the operation.
    pub resulting_balance: u64,
}
