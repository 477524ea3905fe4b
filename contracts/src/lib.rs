//! # Capvault Contracts
//!
//! The vault ledger: per-account balances behind a global deposit ceiling
//! and a per-withdrawal ceiling.
//!
//! - **vault_ledger**: validation, balance mutation, and the rollback
//!   boundary every operation runs inside.
//! - **transfer**: the external value-release primitive the ledger calls
//!   last on withdrawal, plus the host-side implementations.
//! - **events**: the facts recorded for committed operations.
//!
//! ## Design Principles
//!
//! 1. All monetary arithmetic is checked. Overflow is an error, never a wrap.
//! 2. Checks, then effects, then interactions. The external transfer runs
//!    only after the books already reflect the debit.
//! 3. Failure is total. An operation that errors leaves no trace in
//!    balances, counters, or events.
//! 4. Every public type that crosses a host boundary is serializable.

pub mod events;
pub mod transfer;
pub mod vault_ledger;

pub use events::{OperationKind, OperationPhase, VaultEvent};
pub use transfer::{FailingTransfer, Payout, PayoutOutbox, TransferError, ValueTransfer};
pub use vault_ledger::{LedgerError, LedgerStatistics, VaultLedger};
