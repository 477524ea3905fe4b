//! # Vault Ledger Contract
//!
//! A per-account value vault guarded by two caps: a ceiling on the sum of
//! all balances (`global_cap`) and a ceiling on any single withdrawal
//! (`per_withdrawal_cap`). Both are fixed at construction.
//!
//! Every balance-mutating call runs the same pipeline:
//!
//! ```text
//! Validating -> Mutating -> (Transferring) -> Emitting -> Committed
//!      \            \              \              \
//!       `------------`--------------`--------------`---> RolledBack
//! ```
//!
//! 1. **Validate**: zero amounts and cap or balance breaches are rejected
//!    before anything changes.
//! 2. **Mutate**: the caller's balance, `total_deposited`, and the
//!    operation counter move together.
//! 3. **Transfer** (withdrawals only): the external primitive is invoked
//!    last, after the books already reflect the debit.
//! 4. **Emit**: a [`VaultEvent`] is appended to the event log.
//!
//! ## Rollback
//!
//! Each call runs inside [`VaultLedger::transact`]. It records a checkpoint
//! (scalar fields plus the lengths of the balance journal and event log),
//! and on any error replays the journal backwards to restore every balance
//! it touched. Re-entrant calls made by a transfer primitive nest their own
//! checkpoints inside the outer one, so an outer failure discards them too.
//! No caller can observe a half-applied operation.
//!
//! Hosts that must do more work before an operation counts as committed
//! (writing it to disk, say) wrap both in [`VaultLedger::atomically`]. The
//! ledger work is then undone if the host's step fails.
//!
//! ## Event Log
//!
//! Events emitted inside an operation stay pending until the outermost
//! unit of work commits. They are then logged under `capvault::events` and
//! appended to a log holding the last [`EVENT_LOG_CAPACITY`] events.

use std::collections::VecDeque;

use capvault_protocol::config::{LedgerConfig, EVENT_LOG_CAPACITY};
use capvault_protocol::identity::AccountId;
use capvault_protocol::storage::{LedgerState, StateError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{OperationKind, OperationPhase, VaultEvent};
use crate::transfer::ValueTransfer;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by ledger operations. Each one aborts and rolls back the
/// current operation only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Deposits and withdrawals of zero are not operations.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// The deposit would push the aggregate past the global cap.
    #[error("global cap exceeded: attempted total {attempted}, cap {cap}")]
    GlobalCapExceeded {
        /// The aggregate the deposit would have produced. Saturates at
        /// `u64::MAX` when the true sum is not representable.
        attempted: u64,
        /// The configured global cap.
        cap: u64,
    },

    /// A single withdrawal asked for more than the per-withdrawal cap.
    #[error("withdrawal cap exceeded: requested {requested}, cap {cap}")]
    WithdrawalCapExceeded {
        /// Amount requested.
        requested: u64,
        /// The configured per-withdrawal cap.
        cap: u64,
    },

    /// The caller's vault holds less than requested.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount requested.
        requested: u64,
        /// The caller's balance at validation time.
        available: u64,
    },

    /// The external transfer primitive could not deliver the value.
    #[error("transfer of {amount} to {destination} failed")]
    TransferFailed {
        /// Intended recipient.
        destination: AccountId,
        /// Amount that was not delivered.
        amount: u64,
    },

    /// A cap of zero was supplied at construction.
    #[error(
        "invalid configuration: global cap {global_cap} and per-withdrawal cap \
         {per_withdrawal_cap} must both be non-zero"
    )]
    InvalidConfiguration {
        global_cap: u64,
        per_withdrawal_cap: u64,
    },

    /// Value sent outside of `deposit` is never accepted.
    #[error("direct transfer of {amount} from {sender} rejected; use deposit")]
    DirectTransferRejected { sender: AccountId, amount: u64 },

    /// Loaded state violates a ledger invariant.
    #[error("corrupt ledger state: {0}")]
    CorruptState(#[from] StateError),

    /// A counter or balance would overflow. Unreachable while the
    /// invariants hold.
    #[error("amount overflow: operation would exceed representable limits")]
    AmountOverflow,
}

impl LedgerError {
    /// Stable snake_case name of the error kind, for metrics labels and
    /// API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::ZeroAmount => "zero_amount",
            LedgerError::GlobalCapExceeded { .. } => "global_cap_exceeded",
            LedgerError::WithdrawalCapExceeded { .. } => "withdrawal_cap_exceeded",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::TransferFailed { .. } => "transfer_failed",
            LedgerError::InvalidConfiguration { .. } => "invalid_configuration",
            LedgerError::DirectTransferRejected { .. } => "direct_transfer_rejected",
            LedgerError::CorruptState(_) => "corrupt_state",
            LedgerError::AmountOverflow => "amount_overflow",
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Aggregate counters, read together at one logical point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_deposited: u64,
    pub deposit_count: u64,
    pub withdrawal_count: u64,
}

/// Prior value of a balance entry, recorded before every write.
#[derive(Debug, Clone, Copy)]
struct JournalEntry {
    account: AccountId,
    /// `None` if the account had no entry before the write.
    previous: Option<u64>,
}

/// Everything needed to put the ledger back where an operation found it.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    journal_len: usize,
    pending_len: usize,
    next_sequence: u64,
    total_deposited: u64,
    deposit_count: u64,
    withdrawal_count: u64,
}

// ---------------------------------------------------------------------------
// VaultLedger
// ---------------------------------------------------------------------------

/// The vault ledger.
///
/// Owns its state outright; hosts pass it by `&mut` into each call and are
/// responsible for serializing calls (a mutex, a single-threaded executor,
/// a database transaction). Within one call the ledger guarantees
/// all-or-nothing.
#[derive(Debug, Clone)]
pub struct VaultLedger {
    state: LedgerState,
    /// Balance writes made by operations still in flight.
    journal: Vec<JournalEntry>,
    /// Nesting depth of in-flight operations. Non-zero only during re-entry.
    depth: usize,
    /// Events of operations still in flight.
    pending: Vec<VaultEvent>,
    /// The most recent committed events, oldest first.
    events: VecDeque<VaultEvent>,
    next_sequence: u64,
}

impl VaultLedger {
    /// Constructs an empty ledger with permanently fixed caps.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfiguration`] if either cap is zero.
    pub fn new(global_cap: u64, per_withdrawal_cap: u64) -> Result<Self, LedgerError> {
        if global_cap == 0 || per_withdrawal_cap == 0 {
            return Err(LedgerError::InvalidConfiguration {
                global_cap,
                per_withdrawal_cap,
            });
        }

        tracing::debug!(global_cap, per_withdrawal_cap, "vault ledger constructed");
        Ok(Self::with_state(LedgerState::new(
            global_cap,
            per_withdrawal_cap,
        )))
    }

    /// Constructs an empty ledger from a [`LedgerConfig`].
    pub fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        Self::new(config.global_cap, config.per_withdrawal_cap)
    }

    /// Rehydrates a ledger from persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfiguration`] for zero caps and
    /// [`LedgerError::CorruptState`] if balances and totals disagree.
    pub fn from_state(state: LedgerState) -> Result<Self, LedgerError> {
        if state.global_cap == 0 || state.per_withdrawal_cap == 0 {
            return Err(LedgerError::InvalidConfiguration {
                global_cap: state.global_cap,
                per_withdrawal_cap: state.per_withdrawal_cap,
            });
        }
        state.check_invariants()?;
        Ok(Self::with_state(state))
    }

    fn with_state(state: LedgerState) -> Self {
        Self {
            state,
            journal: Vec::new(),
            depth: 0,
            pending: Vec::new(),
            events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
            next_sequence: 1,
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Credits `amount` to the caller's vault.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ZeroAmount`] if `amount` is 0.
    /// Returns [`LedgerError::GlobalCapExceeded`] if the aggregate would pass
    /// the global cap, including when the sum overflows.
    pub fn deposit(&mut self, caller: &AccountId, amount: u64) -> Result<VaultEvent, LedgerError> {
        self.transact(OperationKind::Deposit, caller, amount, |ledger, phase| {
            let new_total = ledger.validate_deposit(amount)?;

            *phase = OperationPhase::Mutating;
            let balance = ledger
                .state
                .balance_of(caller)
                .checked_add(amount)
                .ok_or(LedgerError::AmountOverflow)?;
            ledger.write_balance(caller, balance);
            ledger.state.total_deposited = new_total;
            ledger.state.deposit_count = ledger
                .state
                .deposit_count
                .checked_add(1)
                .ok_or(LedgerError::AmountOverflow)?;

            *phase = OperationPhase::Emitting;
            Ok(ledger.emit(OperationKind::Deposit, caller, amount))
        })
    }

    /// Debits `amount` from the caller's vault and releases it through
    /// `transfer`.
    ///
    /// The books are updated before `transfer` runs. If it fails, the
    /// debit (and anything `transfer` did to the ledger on re-entry) is
    /// undone.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ZeroAmount`] if `amount` is 0.
    /// Returns [`LedgerError::WithdrawalCapExceeded`] if `amount` is above
    /// the per-withdrawal cap, regardless of balance.
    /// Returns [`LedgerError::InsufficientBalance`] if the vault holds less.
    /// Returns [`LedgerError::TransferFailed`] if the primitive fails.
    pub fn withdraw(
        &mut self,
        caller: &AccountId,
        amount: u64,
        transfer: &mut dyn ValueTransfer,
    ) -> Result<VaultEvent, LedgerError> {
        self.transact(OperationKind::Withdrawal, caller, amount, |ledger, phase| {
            let remaining = ledger.validate_withdrawal(caller, amount)?;

            *phase = OperationPhase::Mutating;
            ledger.write_balance(caller, remaining);
            ledger.state.total_deposited = ledger
                .state
                .total_deposited
                .checked_sub(amount)
                .ok_or(LedgerError::AmountOverflow)?;
            ledger.state.withdrawal_count = ledger
                .state
                .withdrawal_count
                .checked_add(1)
                .ok_or(LedgerError::AmountOverflow)?;

            *phase = OperationPhase::Transferring;
            if let Err(source) = transfer.release(ledger, caller, amount) {
                tracing::warn!(
                    destination = %caller,
                    amount,
                    error = %source,
                    "value transfer failed"
                );
                return Err(LedgerError::TransferFailed {
                    destination: *caller,
                    amount,
                });
            }

            *phase = OperationPhase::Emitting;
            Ok(ledger.emit(OperationKind::Withdrawal, caller, amount))
        })
    }

    /// Handles value sent to the ledger outside of [`deposit`](Self::deposit).
    ///
    /// There is no implicit top-up path: this always fails and never
    /// changes state.
    pub fn receive_direct(&mut self, sender: &AccountId, amount: u64) -> Result<(), LedgerError> {
        tracing::warn!(sender = %sender, amount, "rejecting direct value transfer");
        Err(LedgerError::DirectTransferRejected {
            sender: *sender,
            amount,
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Checks a deposit without changing anything. Returns the aggregate the
    /// deposit would produce.
    pub fn validate_deposit(&self, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let cap = self.state.global_cap;
        match self.state.total_deposited.checked_add(amount) {
            Some(total) if total <= cap => Ok(total),
            attempted => Err(LedgerError::GlobalCapExceeded {
                attempted: attempted.unwrap_or(u64::MAX),
                cap,
            }),
        }
    }

    /// Checks a withdrawal without changing anything. Returns the caller's
    /// balance after the withdrawal.
    pub fn validate_withdrawal(&self, caller: &AccountId, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let cap = self.state.per_withdrawal_cap;
        if amount > cap {
            return Err(LedgerError::WithdrawalCapExceeded {
                requested: amount,
                cap,
            });
        }

        let available = self.state.balance_of(caller);
        available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                requested: amount,
                available,
            })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current balance of `account`. Zero for accounts never credited.
    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.state.balance_of(account)
    }

    /// `(total_deposited, deposit_count, withdrawal_count)` as one snapshot.
    pub fn statistics(&self) -> LedgerStatistics {
        LedgerStatistics {
            total_deposited: self.state.total_deposited,
            deposit_count: self.state.deposit_count,
            withdrawal_count: self.state.withdrawal_count,
        }
    }

    pub fn global_cap(&self) -> u64 {
        self.state.global_cap
    }

    pub fn per_withdrawal_cap(&self) -> u64 {
        self.state.per_withdrawal_cap
    }

    /// The persistable state.
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// The last [`EVENT_LOG_CAPACITY`] committed events, oldest first.
    pub fn events(&self) -> &VecDeque<VaultEvent> {
        &self.events
    }

    /// Re-verifies the ledger invariants against current state.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        Ok(self.state.check_invariants()?)
    }

    // -----------------------------------------------------------------------
    // Transaction Boundary
    // -----------------------------------------------------------------------

    /// Runs `work` as one unit: every ledger operation it performs commits
    /// only if `work` returns `Ok`. On `Err` the ledger is restored to where
    /// it was on entry, including operations inside `work` that succeeded.
    ///
    /// Events of the enclosed operations are published when the outermost
    /// unit commits.
    pub fn atomically<T, E>(
        &mut self,
        work: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let checkpoint = self.checkpoint();

        self.depth += 1;
        let result = work(self);
        self.depth -= 1;

        match result {
            Ok(value) => {
                if self.depth == 0 {
                    self.commit();
                }
                Ok(value)
            }
            Err(err) => {
                self.rollback(checkpoint);
                Err(err)
            }
        }
    }

    /// Runs `op` as one indivisible unit: either everything it did stays,
    /// or the ledger is restored to the checkpoint taken on entry.
    fn transact<T>(
        &mut self,
        kind: OperationKind,
        caller: &AccountId,
        amount: u64,
        op: impl FnOnce(&mut Self, &mut OperationPhase) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let checkpoint = self.checkpoint();
        let mut phase = OperationPhase::Validating;

        self.depth += 1;
        let result = op(self, &mut phase);
        self.depth -= 1;

        match result {
            Ok(value) => {
                if self.depth == 0 {
                    self.commit();
                }
                Ok(value)
            }
            Err(err) => {
                self.rollback(checkpoint);
                tracing::info!(
                    %kind,
                    account = %caller,
                    amount,
                    %phase,
                    reason = err.kind(),
                    "operation rolled back"
                );
                Err(err)
            }
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            journal_len: self.journal.len(),
            pending_len: self.pending.len(),
            next_sequence: self.next_sequence,
            total_deposited: self.state.total_deposited,
            deposit_count: self.state.deposit_count,
            withdrawal_count: self.state.withdrawal_count,
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        for entry in self.journal.drain(checkpoint.journal_len..).rev() {
            match entry.previous {
                Some(balance) => {
                    self.state.balances.insert(entry.account, balance);
                }
                None => {
                    self.state.balances.remove(&entry.account);
                }
            }
        }

        self.state.total_deposited = checkpoint.total_deposited;
        self.state.deposit_count = checkpoint.deposit_count;
        self.state.withdrawal_count = checkpoint.withdrawal_count;
        self.pending.truncate(checkpoint.pending_len);
        self.next_sequence = checkpoint.next_sequence;
    }

    /// Ends the outermost unit of work: forgets the journal and moves
    /// pending events into the bounded log.
    fn commit(&mut self) {
        self.journal.clear();
        for event in std::mem::take(&mut self.pending) {
            tracing::info!(
                target: "capvault::events",
                sequence = event.sequence,
                kind = %event.kind,
                account = %event.account,
                amount = event.amount,
                resulting_balance = event.resulting_balance,
                "vault event"
            );
            if self.events.len() == EVENT_LOG_CAPACITY {
                self.events.pop_front();
            }
            self.events.push_back(event);
        }
    }

    fn write_balance(&mut self, account: &AccountId, balance: u64) {
        let previous = self.state.balances.insert(*account, balance);
        self.journal.push(JournalEntry {
            account: *account,
            previous,
        });
    }

    fn emit(&mut self, kind: OperationKind, account: &AccountId, amount: u64) -> VaultEvent {
        let event = VaultEvent {
            sequence: self.next_sequence,
            kind,
            account: *account,
            amount,
            resulting_balance: self.state.balance_of(account),
        };
        self.next_sequence += 1;
        self.pending.push(event.clone());
        event
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{FailingTransfer, PayoutOutbox};

    fn alice() -> AccountId {
        AccountId::derive(b"alice")
    }

    fn bob() -> AccountId {
        AccountId::derive(b"bob")
    }

    fn ledger(global_cap: u64, per_withdrawal_cap: u64) -> VaultLedger {
        VaultLedger::new(global_cap, per_withdrawal_cap).unwrap()
    }

    #[test]
    fn zero_caps_rejected() {
        assert_eq!(
            VaultLedger::new(0, 10).unwrap_err(),
            LedgerError::InvalidConfiguration {
                global_cap: 0,
                per_withdrawal_cap: 10
            }
        );
        assert!(matches!(
            VaultLedger::new(10, 0),
            Err(LedgerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn from_config_uses_both_caps() {
        let config = LedgerConfig {
            global_cap: 500,
            per_withdrawal_cap: 50,
        };
        let ledger = VaultLedger::from_config(&config).unwrap();
        assert_eq!(ledger.global_cap(), 500);
        assert_eq!(ledger.per_withdrawal_cap(), 50);
    }

    #[test]
    fn new_ledger_is_empty() {
        let ledger = ledger(100, 40);
        assert_eq!(
            ledger.statistics(),
            LedgerStatistics {
                total_deposited: 0,
                deposit_count: 0,
                withdrawal_count: 0
            }
        );
        assert_eq!(ledger.balance_of(&alice()), 0);
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn deposit_credits_caller_only() {
        let mut ledger = ledger(100, 40);
        let event = ledger.deposit(&alice(), 60).unwrap();

        assert_eq!(event.kind, OperationKind::Deposit);
        assert_eq!(event.resulting_balance, 60);
        assert_eq!(ledger.balance_of(&alice()), 60);
        assert_eq!(ledger.balance_of(&bob()), 0);
        assert_eq!(ledger.statistics().total_deposited, 60);
        assert_eq!(ledger.statistics().deposit_count, 1);
    }

    #[test]
    fn zero_deposit_rejected_without_change() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 10).unwrap();
        let before = ledger.state().clone();

        assert_eq!(ledger.deposit(&alice(), 0), Err(LedgerError::ZeroAmount));
        assert_eq!(ledger.state(), &before);
    }

    #[test]
    fn deposit_up_to_cap_is_allowed() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 100).unwrap();
        assert_eq!(ledger.statistics().total_deposited, 100);
    }

    #[test]
    fn deposit_over_cap_reports_attempted_total() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 60).unwrap();

        assert_eq!(
            ledger.deposit(&bob(), 50),
            Err(LedgerError::GlobalCapExceeded {
                attempted: 110,
                cap: 100
            })
        );
        assert_eq!(ledger.balance_of(&bob()), 0);
        assert_eq!(ledger.state().account_count(), 1);
    }

    #[test]
    fn deposit_overflow_treated_as_cap_exceeded() {
        let mut ledger = ledger(u64::MAX, 1);
        ledger.deposit(&alice(), u64::MAX - 1).unwrap();

        assert_eq!(
            ledger.deposit(&bob(), 5),
            Err(LedgerError::GlobalCapExceeded {
                attempted: u64::MAX,
                cap: u64::MAX
            })
        );
        assert_eq!(ledger.statistics().total_deposited, u64::MAX - 1);
    }

    #[test]
    fn withdrawal_checks_run_in_order() {
        let mut ledger = ledger(100, 40);
        let mut outbox = PayoutOutbox::new();

        assert_eq!(
            ledger.withdraw(&alice(), 0, &mut outbox),
            Err(LedgerError::ZeroAmount)
        );
        // Over the cap and over the (empty) balance: the cap wins.
        assert_eq!(
            ledger.withdraw(&alice(), 41, &mut outbox),
            Err(LedgerError::WithdrawalCapExceeded {
                requested: 41,
                cap: 40
            })
        );
        assert_eq!(
            ledger.withdraw(&alice(), 40, &mut outbox),
            Err(LedgerError::InsufficientBalance {
                requested: 40,
                available: 0
            })
        );
        assert!(outbox.payouts().is_empty());
    }

    #[test]
    fn withdrawal_debits_and_releases() {
        let mut ledger = ledger(100, 40);
        let mut outbox = PayoutOutbox::new();
        ledger.deposit(&alice(), 60).unwrap();

        let event = ledger.withdraw(&alice(), 30, &mut outbox).unwrap();

        assert_eq!(event.kind, OperationKind::Withdrawal);
        assert_eq!(event.resulting_balance, 30);
        assert_eq!(ledger.statistics().withdrawal_count, 1);
        assert_eq!(outbox.payouts()[0].destination, alice());
        assert_eq!(outbox.payouts()[0].amount, 30);
    }

    #[test]
    fn failed_transfer_restores_everything() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 60).unwrap();
        let before = ledger.state().clone();
        let events_before = ledger.events().len();

        let result = ledger.withdraw(&alice(), 30, &mut FailingTransfer::new("offline"));

        assert_eq!(
            result,
            Err(LedgerError::TransferFailed {
                destination: alice(),
                amount: 30
            })
        );
        assert_eq!(ledger.state(), &before);
        assert_eq!(ledger.events().len(), events_before);
    }

    #[test]
    fn rollback_removes_entries_created_by_the_operation() {
        let mut ledger = ledger(100, 40);
        let before = ledger.state().clone();

        let checkpoint = ledger.checkpoint();
        ledger.write_balance(&bob(), 7);
        ledger.rollback(checkpoint);

        assert_eq!(ledger.state(), &before);
        assert!(!ledger.state().balances.contains_key(&bob()));
    }

    #[test]
    fn drained_vault_keeps_zero_entry() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 20).unwrap();
        ledger
            .withdraw(&alice(), 20, &mut PayoutOutbox::new())
            .unwrap();

        assert_eq!(ledger.state().balances.get(&alice()), Some(&0));
        assert_eq!(ledger.balance_of(&alice()), 0);
    }

    #[test]
    fn direct_transfer_always_rejected() {
        let mut ledger = ledger(100, 40);
        let before = ledger.state().clone();

        assert_eq!(
            ledger.receive_direct(&alice(), 5),
            Err(LedgerError::DirectTransferRejected {
                sender: alice(),
                amount: 5
            })
        );
        assert_eq!(ledger.state(), &before);
    }

    #[test]
    fn event_sequence_skips_nothing_after_rollback() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 10).unwrap();
        let _ = ledger.withdraw(&alice(), 5, &mut FailingTransfer::new("no"));
        ledger.deposit(&alice(), 10).unwrap();

        let sequences: Vec<u64> = ledger.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn event_log_keeps_most_recent_events() {
        let mut ledger = ledger(u64::MAX, 40);
        let extra = 5;
        for _ in 0..EVENT_LOG_CAPACITY + extra {
            ledger.deposit(&alice(), 1).unwrap();
        }

        let events = ledger.events();
        assert_eq!(events.len(), EVENT_LOG_CAPACITY);
        assert_eq!(events.front().unwrap().sequence, extra as u64 + 1);
        assert_eq!(
            events.back().unwrap().sequence,
            (EVENT_LOG_CAPACITY + extra) as u64
        );
    }

    #[test]
    fn atomically_discards_operations_when_host_step_fails() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 10).unwrap();
        let before = ledger.state().clone();

        let result: Result<(), &str> = ledger.atomically(|ledger| {
            ledger.deposit(&bob(), 20).map_err(|_| "deposit")?;
            ledger
                .withdraw(&alice(), 5, &mut PayoutOutbox::new())
                .map_err(|_| "withdraw")?;
            Err("disk full")
        });

        assert_eq!(result, Err("disk full"));
        assert_eq!(ledger.state(), &before);
        assert_eq!(ledger.events().len(), 1);
        assert!(ledger.journal.is_empty());

        ledger.deposit(&bob(), 1).unwrap();
        assert_eq!(ledger.events().back().unwrap().sequence, 2);
    }

    #[test]
    fn atomically_commits_events_only_on_success() {
        let mut ledger = ledger(100, 40);

        let event = ledger
            .atomically(|ledger| {
                let event = ledger.deposit(&alice(), 10)?;
                assert!(ledger.events().is_empty());
                Ok::<_, LedgerError>(event)
            })
            .unwrap();

        assert_eq!(ledger.events().len(), 1);
        assert_eq!(ledger.events()[0], event);
        assert!(ledger.journal.is_empty());
        assert_eq!(ledger.depth, 0);
    }

    #[test]
    fn journal_is_empty_between_operations() {
        let mut ledger = ledger(100, 40);
        ledger.deposit(&alice(), 10).unwrap();
        ledger
            .withdraw(&alice(), 5, &mut PayoutOutbox::new())
            .unwrap();
        assert!(ledger.journal.is_empty());
        assert_eq!(ledger.depth, 0);
    }

    #[test]
    fn from_state_rejects_inconsistent_totals() {
        let mut state = LedgerState::new(100, 40);
        state.balances.insert(alice(), 10);
        state.total_deposited = 11;

        assert!(matches!(
            VaultLedger::from_state(state),
            Err(LedgerError::CorruptState(StateError::TotalMismatch { .. }))
        ));
    }

    #[test]
    fn from_state_rejects_zero_caps() {
        assert!(matches!(
            VaultLedger::from_state(LedgerState::new(100, 0)),
            Err(LedgerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn from_state_restores_balances() {
        let mut source = ledger(100, 40);
        source.deposit(&alice(), 25).unwrap();

        let restored = VaultLedger::from_state(source.state().clone()).unwrap();
        assert_eq!(restored.balance_of(&alice()), 25);
        assert_eq!(restored.statistics(), source.statistics());
        assert!(restored.events().is_empty());
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(LedgerError::ZeroAmount.kind(), "zero_amount");
        assert_eq!(
            LedgerError::TransferFailed {
                destination: alice(),
                amount: 1
            }
            .kind(),
            "transfer_failed"
        );
    }
}
