//! # Value Transfer Primitive
//!
//! The ledger's one interaction with the outside world: handing value to
//! the withdrawing account. The host supplies the primitive; the ledger
//! calls it last, after every internal check has passed and the caller's
//! balance has already been debited.
//!
//! ## Re-entry
//!
//! [`ValueTransfer::release`] receives the ledger itself. An implementation
//! may call straight back into [`VaultLedger::deposit`] or
//! [`VaultLedger::withdraw`] before returning. It will observe the debited
//! balance, so re-entry cannot spend the same funds twice. If `release`
//! returns an error, the withdrawal and anything done during re-entry are
//! rolled back together.

use capvault_protocol::identity::AccountId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vault_ledger::VaultLedger;

/// Reasons a transfer primitive could not deliver value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The receiving side refused the value.
    #[error("transfer rejected: {reason}")]
    Rejected {
        /// Human-readable explanation from the receiving side.
        reason: String,
    },

    /// The transfer rail is unreachable or not accepting payouts.
    #[error("transfer rail unavailable: {0}")]
    Unavailable(String),
}

/// An external value-release primitive.
///
/// Implementations must not assume they are free of side effects on the
/// ledger they are handed; see the module docs.
pub trait ValueTransfer {
    /// Deliver `amount` to `destination`.
    ///
    /// # Errors
    ///
    /// Any error aborts the enclosing withdrawal, which is then rolled back
    /// as if it never ran.
    fn release(
        &mut self,
        ledger: &mut VaultLedger,
        destination: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError>;
}

// ---------------------------------------------------------------------------
// PayoutOutbox
// ---------------------------------------------------------------------------

/// A payout handed to the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// 1-based order in which payouts were released.
    pub sequence: u64,
    /// Who receives the value.
    pub destination: AccountId,
    /// How much.
    pub amount: u64,
}

/// Records every released payout in order for an external settlement
/// process to pick up. Never fails.
#[derive(Debug, Default)]
pub struct PayoutOutbox {
    payouts: Vec<Payout>,
    released: u64,
}

impl PayoutOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payouts released and not yet drained.
    pub fn payouts(&self) -> &[Payout] {
        &self.payouts
    }

    /// Removes and returns all pending payouts. Sequence numbers keep
    /// increasing across drains.
    pub fn drain(&mut self) -> Vec<Payout> {
        std::mem::take(&mut self.payouts)
    }

    /// Total number of payouts ever released.
    pub fn released_count(&self) -> u64 {
        self.released
    }

    /// Withdraws every pending payout after the first `len`.
    ///
    /// For hosts whose own commit (e.g. persistence) failed after the
    /// ledger released value: the payouts never leave the outbox.
    pub fn truncate(&mut self, len: usize) {
        if len < self.payouts.len() {
            let retracted = (self.payouts.len() - len) as u64;
            self.payouts.truncate(len);
            self.released -= retracted;
        }
    }
}

impl ValueTransfer for PayoutOutbox {
    fn release(
        &mut self,
        _ledger: &mut VaultLedger,
        destination: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError> {
        self.released += 1;
        self.payouts.push(Payout {
            sequence: self.released,
            destination: *destination,
            amount,
        });
        tracing::debug!(destination = %destination, amount, "payout queued");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FailingTransfer
// ---------------------------------------------------------------------------

/// A transfer rail that refuses everything. Used to put a host into a
/// deposit-only mode and to exercise rollback.
#[derive(Debug, Clone)]
pub struct FailingTransfer {
    reason: String,
}

impl FailingTransfer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ValueTransfer for FailingTransfer {
    fn release(
        &mut self,
        _ledger: &mut VaultLedger,
        _destination: &AccountId,
        _amount: u64,
    ) -> Result<(), TransferError> {
        Err(TransferError::Rejected {
            reason: self.reason.clone(),
        })
    }
}
