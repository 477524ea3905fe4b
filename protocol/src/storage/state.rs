//! # Ledger State Layout
//!
//! [`LedgerState`] is the complete persisted state of a vault ledger and
//! nothing else. Events, journals, and other bookkeeping live beside it in
//! memory but never reach disk.
//!
//! ## Invariants
//!
//! A well-formed state satisfies, at every committed point:
//!
//! 1. `global_cap > 0` and `per_withdrawal_cap > 0`.
//! 2. `total_deposited == sum(balances)`.
//! 3. `total_deposited <= global_cap`.
//!
//! Non-negativity is structural: balances are `u64`.
//!
//! The contract keeps these true by construction. [`LedgerState::check_invariants`]
//! exists for the places where state arrives from outside the contract,
//! i.e. when it is loaded from disk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::identity::AccountId;

/// Ways a ledger state can be malformed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// One of the caps is zero.
    #[error("caps must be non-zero: global {global_cap}, per-withdrawal {per_withdrawal_cap}")]
    ZeroCap {
        /// Configured global cap.
        global_cap: u64,
        /// Configured per-withdrawal cap.
        per_withdrawal_cap: u64,
    },

    /// The running total disagrees with the sum of balances.
    #[error("total deposited {total_deposited} does not match sum of balances {sum}")]
    TotalMismatch {
        /// Recorded aggregate.
        total_deposited: u64,
        /// Sum of all account balances.
        sum: u128,
    },

    /// The aggregate exceeds the global cap.
    #[error("total deposited {total_deposited} exceeds global cap {global_cap}")]
    OverCap {
        /// Recorded aggregate.
        total_deposited: u64,
        /// Configured global cap.
        global_cap: u64,
    },
}

/// The persisted fields of a vault ledger.
///
/// Accounts are kept in a `BTreeMap` so iteration (and therefore JSON output
/// and on-disk write order) is deterministic. An account that was never
/// credited is simply absent and reads as zero; an account drained to zero
/// stays present at zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Per-account vault balances.
    pub balances: BTreeMap<AccountId, u64>,
    /// Sum of all entries in `balances`.
    pub total_deposited: u64,
    /// Number of successful deposits.
    pub deposit_count: u64,
    /// Number of successful withdrawals.
    pub withdrawal_count: u64,
    /// Ceiling on `total_deposited`. Fixed at construction.
    pub global_cap: u64,
    /// Ceiling on a single withdrawal. Fixed at construction.
    pub per_withdrawal_cap: u64,
}

impl LedgerState {
    /// Creates an empty state with the given caps.
    ///
    /// Does not validate the caps; the contract constructor does that.
    pub fn new(global_cap: u64, per_withdrawal_cap: u64) -> Self {
        Self {
            balances: BTreeMap::new(),
            total_deposited: 0,
            deposit_count: 0,
            withdrawal_count: 0,
            global_cap,
            per_withdrawal_cap,
        }
    }

    /// Balance of `account`, zero if it has never been credited.
    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Sum of every balance, widened so it cannot overflow.
    pub fn sum_of_balances(&self) -> u128 {
        self.balances.values().map(|&b| u128::from(b)).sum()
    }

    /// Number of accounts with an entry (including zero balances).
    pub fn account_count(&self) -> usize {
        self.balances.len()
    }

    /// Verifies the structural invariants listed in the module docs.
    pub fn check_invariants(&self) -> Result<(), StateError> {
        if self.global_cap == 0 || self.per_withdrawal_cap == 0 {
            return Err(StateError::ZeroCap {
                global_cap: self.global_cap,
                per_withdrawal_cap: self.per_withdrawal_cap,
            });
        }

        let sum = self.sum_of_balances();
        if sum != u128::from(self.total_deposited) {
            return Err(StateError::TotalMismatch {
                total_deposited: self.total_deposited,
                sum,
            });
        }

        if self.total_deposited > self.global_cap {
            return Err(StateError::OverCap {
                total_deposited: self.total_deposited,
                global_cap: self.global_cap,
            });
        }

        Ok(())
    }
}
