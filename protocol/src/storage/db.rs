//! # VaultDB: Persistent Ledger Storage
//!
//! The persistence layer for the vault ledger, built on sled's embedded
//! key-value store.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                   | Value            |
//! |------------|-----------------------|------------------|
//! | `accounts` | account id (32B)      | balance (8B BE)  |
//! | `ledger`   | field name (UTF-8)    | value (8B BE)    |
//!
//! The `ledger` tree holds exactly five keys: `total_deposited`,
//! `deposit_count`, `withdrawal_count`, `global_cap`, and
//! `per_withdrawal_cap`. Together with `accounts` that is the whole
//! [`LedgerState`] and nothing more.
//!
//! ## Atomicity
//!
//! Every write goes through a multi-tree sled transaction. A committed
//! operation touches one account balance and up to three scalars; all of
//! them land together or none do, so a crash can never leave a balance
//! that disagrees with `total_deposited`.

use sled::transaction::{ConflictableTransactionResult, TransactionError, Transactional};
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;

use super::state::LedgerState;
use crate::identity::AccountId;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("transaction aborted: {0}")]
    Transaction(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<TransactionError<()>> for DbError {
    fn from(err: TransactionError<()>) -> Self {
        match err {
            TransactionError::Storage(e) => DbError::Sled(e),
            TransactionError::Abort(()) => DbError::Transaction("aborted".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger Keys
// ---------------------------------------------------------------------------

const KEY_TOTAL_DEPOSITED: &[u8] = b"total_deposited";
const KEY_DEPOSIT_COUNT: &[u8] = b"deposit_count";
const KEY_WITHDRAWAL_COUNT: &[u8] = b"withdrawal_count";
const KEY_GLOBAL_CAP: &[u8] = b"global_cap";
const KEY_PER_WITHDRAWAL_CAP: &[u8] = b"per_withdrawal_cap";

// ---------------------------------------------------------------------------
// VaultDB
// ---------------------------------------------------------------------------

/// Persistent storage engine for a single vault ledger.
///
/// Cheap to clone; sled handles are reference counted and safe to share
/// across threads.
#[derive(Debug, Clone)]
pub struct VaultDB {
    db: Db,
    /// Balances keyed by raw account id bytes.
    accounts: Tree,
    /// Scalar ledger fields keyed by name.
    ledger: Tree,
}

impl VaultDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let accounts = db.open_tree("accounts")?;
        let ledger = db.open_tree("ledger")?;
        Ok(Self {
            db,
            accounts,
            ledger,
        })
    }

    /// Returns `true` if a ledger has been persisted.
    pub fn has_ledger(&self) -> DbResult<bool> {
        Ok(self.ledger.contains_key(KEY_GLOBAL_CAP)?)
    }

    /// Persist a complete ledger state, replacing whatever was stored.
    ///
    /// Accounts present on disk but absent from `state` are removed in the
    /// same transaction.
    pub fn save_state(&self, state: &LedgerState) -> DbResult<()> {
        let mut stale = Vec::new();
        for key in self.accounts.iter().keys() {
            let key = key?;
            let id = decode_account(&key)?;
            if !state.balances.contains_key(&id) {
                stale.push(id);
            }
        }

        (&self.accounts, &self.ledger).transaction(
            |(accounts, ledger)| -> ConflictableTransactionResult<(), ()> {
                for id in &stale {
                    accounts.remove(&id.as_bytes()[..])?;
                }
                for (id, balance) in &state.balances {
                    accounts.insert(&id.as_bytes()[..], &balance.to_be_bytes()[..])?;
                }
                ledger.insert(KEY_TOTAL_DEPOSITED, &state.total_deposited.to_be_bytes()[..])?;
                ledger.insert(KEY_DEPOSIT_COUNT, &state.deposit_count.to_be_bytes()[..])?;
                ledger.insert(KEY_WITHDRAWAL_COUNT, &state.withdrawal_count.to_be_bytes()[..])?;
                ledger.insert(KEY_GLOBAL_CAP, &state.global_cap.to_be_bytes()[..])?;
                ledger.insert(
                    KEY_PER_WITHDRAWAL_CAP,
                    &state.per_withdrawal_cap.to_be_bytes()[..],
                )?;
                Ok(())
            },
        )?;

        self.db.flush()?;
        tracing::debug!(accounts = state.account_count(), "ledger state saved");
        Ok(())
    }

    /// Persist the outcome of one committed operation on `account`.
    ///
    /// Writes the account's balance and the three mutable scalars in one
    /// transaction. Caps are immutable and are not rewritten. An account
    /// with no entry in `state` is removed from disk.
    pub fn commit_account(&self, state: &LedgerState, account: &AccountId) -> DbResult<()> {
        let balance = state.balances.get(account).copied();

        (&self.accounts, &self.ledger).transaction(
            |(accounts, ledger)| -> ConflictableTransactionResult<(), ()> {
                match balance {
                    Some(balance) => {
                        accounts.insert(&account.as_bytes()[..], &balance.to_be_bytes()[..])?;
                    }
                    None => {
                        accounts.remove(&account.as_bytes()[..])?;
                    }
                }
                ledger.insert(KEY_TOTAL_DEPOSITED, &state.total_deposited.to_be_bytes()[..])?;
                ledger.insert(KEY_DEPOSIT_COUNT, &state.deposit_count.to_be_bytes()[..])?;
                ledger.insert(KEY_WITHDRAWAL_COUNT, &state.withdrawal_count.to_be_bytes()[..])?;
                Ok(())
            },
        )?;

        self.db.flush()?;
        Ok(())
    }

    /// Load the persisted ledger state, or `None` if nothing was saved yet.
    ///
    /// The returned state is decoded faithfully; callers that need the
    /// invariants guaranteed must check them.
    pub fn load_state(&self) -> DbResult<Option<LedgerState>> {
        let Some(global_cap) = self.read_scalar(KEY_GLOBAL_CAP)? else {
            return Ok(None);
        };

        let per_withdrawal_cap = self.require_scalar(KEY_PER_WITHDRAWAL_CAP)?;
        let total_deposited = self.require_scalar(KEY_TOTAL_DEPOSITED)?;
        let deposit_count = self.require_scalar(KEY_DEPOSIT_COUNT)?;
        let withdrawal_count = self.require_scalar(KEY_WITHDRAWAL_COUNT)?;

        let mut balances = BTreeMap::new();
        for entry in self.accounts.iter() {
            let (key, value) = entry?;
            balances.insert(decode_account(&key)?, decode_u64(&value)?);
        }

        Ok(Some(LedgerState {
            balances,
            total_deposited,
            deposit_count,
            withdrawal_count,
            global_cap,
            per_withdrawal_cap,
        }))
    }

    fn read_scalar(&self, key: &[u8]) -> DbResult<Option<u64>> {
        match self.ledger.get(key)? {
            Some(bytes) => Ok(Some(decode_u64(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require_scalar(&self, key: &[u8]) -> DbResult<u64> {
        self.read_scalar(key)?.ok_or_else(|| {
            DbError::Corrupt(format!(
                "missing ledger field {}",
                String::from_utf8_lossy(key)
            ))
        })
    }
}

fn decode_u64(bytes: &[u8]) -> DbResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Corrupt(format!("expected 8-byte value, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

fn decode_account(bytes: &[u8]) -> DbResult<AccountId> {
    AccountId::try_from(bytes).map_err(|e| DbError::Corrupt(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
