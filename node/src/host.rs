//! # Ledger Host
//!
//! The unit-of-work boundary around the vault ledger. One mutex serializes
//! every operation, and each operation is persisted before the lock is
//! released:
//!
//! ```text
//! lock -> [ ledger op (validate, mutate, transfer, emit) -> persist ] -> unlock
//!         `---------------- VaultLedger::atomically ----------------'
//! ```
//!
//! The bracketed part is one ledger unit of work. If the ledger op fails,
//! the contract has already rolled itself back. If persistence fails, the
//! ledger rolls the op back in memory, the host retracts any payout the op
//! queued, and the restored state is written back over whatever part of
//! the failed write reached disk.

use parking_lot::Mutex;
use thiserror::Error;

use capvault_contracts::{
    LedgerError, LedgerStatistics, Payout, PayoutOutbox, VaultEvent, VaultLedger,
};
use capvault_protocol::config::LedgerConfig;
use capvault_protocol::identity::AccountId;
use capvault_protocol::storage::{DbError, LedgerState, VaultDB};

use crate::metrics::SharedMetrics;

/// Failures surfaced by the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The ledger rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The operation could not be persisted and was rolled back.
    #[error("storage failure: {0}")]
    Storage(#[from] DbError),
}

/// Where the host keeps the ledger between restarts.
pub trait LedgerStore: Send + Sync {
    fn load_state(&self) -> Result<Option<LedgerState>, DbError>;

    fn save_state(&self, state: &LedgerState) -> Result<(), DbError>;

    /// Persists `account`'s balance and the mutable aggregates of `state`.
    fn commit_account(&self, state: &LedgerState, account: &AccountId) -> Result<(), DbError>;
}

impl LedgerStore for VaultDB {
    fn load_state(&self) -> Result<Option<LedgerState>, DbError> {
        VaultDB::load_state(self)
    }

    fn save_state(&self, state: &LedgerState) -> Result<(), DbError> {
        VaultDB::save_state(self, state)
    }

    fn commit_account(&self, state: &LedgerState, account: &AccountId) -> Result<(), DbError> {
        VaultDB::commit_account(self, state, account)
    }
}

/// A point-in-time view of the ledger's aggregates and configuration.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LedgerSummary {
    #[serde(flatten)]
    pub statistics: LedgerStatistics,
    pub global_cap: u64,
    pub per_withdrawal_cap: u64,
    pub accounts: usize,
    /// Payouts released since startup, settled or not.
    pub payouts_released: u64,
}

struct HostInner {
    ledger: VaultLedger,
    outbox: PayoutOutbox,
}

/// Owns the ledger, its payout outbox, and its store.
pub struct LedgerHost {
    inner: Mutex<HostInner>,
    store: Box<dyn LedgerStore>,
    metrics: Option<SharedMetrics>,
}

impl LedgerHost {
    /// Loads the persisted ledger, or constructs and persists a new one
    /// from `config` if the store is empty.
    ///
    /// Caps are immutable: when a persisted ledger exists, its caps win over
    /// `config`.
    pub fn open(store: impl LedgerStore + 'static, config: &LedgerConfig) -> Result<Self, HostError> {
        let ledger = match store.load_state()? {
            Some(state) => {
                let ledger = VaultLedger::from_state(state)?;
                if ledger.global_cap() != config.global_cap
                    || ledger.per_withdrawal_cap() != config.per_withdrawal_cap
                {
                    tracing::warn!(
                        persisted_global_cap = ledger.global_cap(),
                        persisted_per_withdrawal_cap = ledger.per_withdrawal_cap(),
                        requested_global_cap = config.global_cap,
                        requested_per_withdrawal_cap = config.per_withdrawal_cap,
                        "caps are fixed at construction; ignoring requested caps"
                    );
                }
                tracing::info!(
                    accounts = ledger.state().account_count(),
                    total_deposited = ledger.statistics().total_deposited,
                    "ledger loaded"
                );
                ledger
            }
            None => {
                let ledger = VaultLedger::from_config(config)?;
                store.save_state(ledger.state())?;
                tracing::info!(
                    global_cap = config.global_cap,
                    per_withdrawal_cap = config.per_withdrawal_cap,
                    "new ledger initialized"
                );
                ledger
            }
        };

        Ok(Self {
            inner: Mutex::new(HostInner {
                ledger,
                outbox: PayoutOutbox::new(),
            }),
            store: Box::new(store),
            metrics: None,
        })
    }

    /// Keeps the `total_deposited` gauge in step with every commit.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        metrics.set_total_deposited(self.inner.get_mut().ledger.statistics().total_deposited);
        self.metrics = Some(metrics);
        self
    }

    pub fn deposit(&self, caller: &AccountId, amount: u64) -> Result<VaultEvent, HostError> {
        self.commit(caller, |ledger, _| ledger.deposit(caller, amount))
    }

    pub fn withdraw(&self, caller: &AccountId, amount: u64) -> Result<VaultEvent, HostError> {
        self.commit(caller, |ledger, outbox| ledger.withdraw(caller, amount, outbox))
    }

    pub fn receive_direct(&self, sender: &AccountId, amount: u64) -> Result<(), HostError> {
        Ok(self.inner.lock().ledger.receive_direct(sender, amount)?)
    }

    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.inner.lock().ledger.balance_of(account)
    }

    pub fn summary(&self) -> LedgerSummary {
        let inner = self.inner.lock();
        LedgerSummary {
            statistics: inner.ledger.statistics(),
            global_cap: inner.ledger.global_cap(),
            per_withdrawal_cap: inner.ledger.per_withdrawal_cap(),
            accounts: inner.ledger.state().account_count(),
            payouts_released: inner.outbox.released_count(),
        }
    }

    /// The most recent committed events, oldest first.
    pub fn events(&self) -> Vec<VaultEvent> {
        self.inner.lock().ledger.events().iter().cloned().collect()
    }

    /// Payouts released and not yet handed to settlement.
    pub fn payouts(&self) -> Vec<Payout> {
        self.inner.lock().outbox.payouts().to_vec()
    }

    /// Hands every pending payout to settlement, emptying the outbox.
    pub fn drain_payouts(&self) -> Vec<Payout> {
        let drained = self.inner.lock().outbox.drain();
        tracing::info!(count = drained.len(), "payouts handed to settlement");
        drained
    }

    /// Runs `op` and persists its outcome as one unit of work.
    fn commit<F>(&self, caller: &AccountId, op: F) -> Result<VaultEvent, HostError>
    where
        F: FnOnce(&mut VaultLedger, &mut PayoutOutbox) -> Result<VaultEvent, LedgerError>,
    {
        let mut inner = self.inner.lock();
        let HostInner { ledger, outbox } = &mut *inner;
        let queued_before = outbox.payouts().len();

        let result = ledger.atomically(|ledger| {
            let event = op(ledger, &mut *outbox)?;
            self.store.commit_account(ledger.state(), caller)?;
            Ok::<_, HostError>(event)
        });

        match result {
            Ok(event) => {
                if let Some(metrics) = &self.metrics {
                    metrics.set_total_deposited(ledger.statistics().total_deposited);
                }
                Ok(event)
            }
            Err(err) => {
                outbox.truncate(queued_before);
                if let HostError::Storage(cause) = &err {
                    tracing::error!(account = %caller, error = %cause, "persist failed; operation rolled back");
                    // The failed write may have landed before its flush failed.
                    if let Err(realign) = self.store.commit_account(ledger.state(), caller) {
                        tracing::error!(account = %caller, error = %realign, "could not restore persisted account");
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::metrics::NodeMetrics;

    /// A store whose commits land on disk and then report failure, like a
    /// flush error after the write, while `failing` is set.
    struct FlakyStore {
        db: VaultDB,
        failing: Arc<AtomicBool>,
    }

    impl LedgerStore for FlakyStore {
        fn load_state(&self) -> Result<Option<LedgerState>, DbError> {
            self.db.load_state()
        }

        fn save_state(&self, state: &LedgerState) -> Result<(), DbError> {
            self.db.save_state(state)
        }

        fn commit_account(&self, state: &LedgerState, account: &AccountId) -> Result<(), DbError> {
            self.db.commit_account(state, account)?;
            if self.failing.load(Ordering::SeqCst) {
                return Err(DbError::Transaction("flush failed".into()));
            }
            Ok(())
        }
    }

    fn config(global_cap: u64, per_withdrawal_cap: u64) -> LedgerConfig {
        LedgerConfig {
            global_cap,
            per_withdrawal_cap,
        }
    }

    fn host(global_cap: u64, per_withdrawal_cap: u64) -> LedgerHost {
        let db = VaultDB::open_temporary().unwrap();
        LedgerHost::open(db, &config(global_cap, per_withdrawal_cap)).unwrap()
    }

    fn flaky_host() -> (LedgerHost, VaultDB, Arc<AtomicBool>) {
        let db = VaultDB::open_temporary().unwrap();
        let failing = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            db: db.clone(),
            failing: Arc::clone(&failing),
        };
        let host = LedgerHost::open(store, &config(100, 40)).unwrap();
        (host, db, failing)
    }

    #[test]
    fn open_rejects_zero_caps() {
        let db = VaultDB::open_temporary().unwrap();
        let result = LedgerHost::open(db, &config(0, 1));
        assert!(matches!(
            result,
            Err(HostError::Ledger(LedgerError::InvalidConfiguration { .. }))
        ));
    }

    #[test]
    fn operations_are_persisted() {
        let db = VaultDB::open_temporary().unwrap();
        let host = LedgerHost::open(db.clone(), &config(100, 40)).unwrap();
        let alice = AccountId::derive(b"alice");

        host.deposit(&alice, 60).unwrap();
        host.withdraw(&alice, 30).unwrap();

        let persisted = db.load_state().unwrap().unwrap();
        assert_eq!(persisted.balance_of(&alice), 30);
        assert_eq!(persisted.total_deposited, 30);
        assert_eq!(persisted.withdrawal_count, 1);
        assert_eq!(host.payouts().len(), 1);
    }

    #[test]
    fn reopen_keeps_persisted_caps() {
        let db = VaultDB::open_temporary().unwrap();
        LedgerHost::open(db.clone(), &config(100, 40))
            .unwrap()
            .deposit(&AccountId::derive(b"alice"), 10)
            .unwrap();

        let reopened = LedgerHost::open(db, &LedgerConfig::default()).unwrap();
        let summary = reopened.summary();
        assert_eq!(summary.global_cap, 100);
        assert_eq!(summary.per_withdrawal_cap, 40);
        assert_eq!(summary.statistics.total_deposited, 10);
    }

    #[test]
    fn rejected_operations_do_not_touch_storage() {
        let db = VaultDB::open_temporary().unwrap();
        let host = LedgerHost::open(db.clone(), &config(100, 40)).unwrap();
        let alice = AccountId::derive(b"alice");
        let before = db.load_state().unwrap();

        assert!(host.deposit(&alice, 0).is_err());
        assert!(host.withdraw(&alice, 10).is_err());
        assert!(host.receive_direct(&alice, 10).is_err());

        assert_eq!(db.load_state().unwrap(), before);
    }

    #[test]
    fn failed_persist_leaves_no_trace() {
        let (host, db, failing) = flaky_host();
        let alice = AccountId::derive(b"alice");
        let bob = AccountId::derive(b"bob");

        host.deposit(&alice, 60).unwrap();
        host.withdraw(&alice, 30).unwrap();
        let summary_before = host.summary();
        let events_before = host.events();
        let payouts_before = host.payouts();
        let disk_before = db.load_state().unwrap();

        failing.store(true, Ordering::SeqCst);
        assert!(matches!(host.deposit(&bob, 5), Err(HostError::Storage(_))));
        assert!(matches!(host.withdraw(&alice, 10), Err(HostError::Storage(_))));

        assert_eq!(host.balance_of(&bob), 0);
        assert_eq!(host.balance_of(&alice), 30);
        assert_eq!(host.summary().statistics, summary_before.statistics);
        assert_eq!(host.summary().payouts_released, 1);
        assert_eq!(host.events(), events_before);
        assert_eq!(host.payouts(), payouts_before);
        assert_eq!(db.load_state().unwrap(), disk_before);

        failing.store(false, Ordering::SeqCst);
        let event = host.deposit(&bob, 5).unwrap();
        assert_eq!(event.sequence, 3);
        assert_eq!(db.load_state().unwrap().unwrap().total_deposited, 35);
    }

    #[test]
    fn drain_hands_over_pending_payouts() {
        let host = host(100, 40);
        let alice = AccountId::derive(b"alice");
        host.deposit(&alice, 50).unwrap();
        host.withdraw(&alice, 10).unwrap();
        host.withdraw(&alice, 20).unwrap();

        let drained = host.drain_payouts();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].amount, 20);
        assert!(host.payouts().is_empty());
        assert_eq!(host.summary().payouts_released, 2);
    }

    #[test]
    fn gauge_tracks_commits() {
        let metrics = Arc::new(NodeMetrics::new());
        let host = host(100, 40).with_metrics(Arc::clone(&metrics));
        let alice = AccountId::derive(b"alice");

        host.deposit(&alice, 60).unwrap();
        host.withdraw(&alice, 25).unwrap();
        let _ = host.deposit(&alice, 0);

        assert_eq!(metrics.total_deposited.get(), 35);
    }

    #[test]
    fn summary_reports_accounts() {
        let host = host(1_000, 100);
        host.deposit(&AccountId::derive(b"a"), 1).unwrap();
        host.deposit(&AccountId::derive(b"b"), 2).unwrap();

        let summary = host.summary();
        assert_eq!(summary.accounts, 2);
        assert_eq!(summary.statistics.deposit_count, 2);
        assert_eq!(host.events().len(), 2);
    }
}
