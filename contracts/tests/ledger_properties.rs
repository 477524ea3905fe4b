//! Property-based tests for the vault ledger invariants.
//!
//! Random interleavings of deposits and withdrawals across a handful of
//! accounts, some with a failing transfer rail, must never break the
//! aggregate, the caps, or all-or-nothing semantics.

use proptest::prelude::*;

use capvault_contracts::{FailingTransfer, LedgerError, PayoutOutbox, VaultLedger};
use capvault_protocol::identity::AccountId;

const ACCOUNTS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Deposit { who: usize, amount: u64 },
    Withdraw { who: usize, amount: u64 },
    FailedWithdraw { who: usize, amount: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..ACCOUNTS, 0u64..400).prop_map(|(who, amount)| Op::Deposit { who, amount }),
        (0..ACCOUNTS, 0u64..150).prop_map(|(who, amount)| Op::Withdraw { who, amount }),
        (0..ACCOUNTS, 1u64..100).prop_map(|(who, amount)| Op::FailedWithdraw { who, amount }),
    ]
}

fn accounts() -> Vec<AccountId> {
    (0..ACCOUNTS)
        .map(|i| AccountId::derive(format!("account-{i}").as_bytes()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn invariants_hold_after_every_operation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let ids = accounts();
        let mut ledger = VaultLedger::new(1_000, 100).unwrap();
        let mut outbox = PayoutOutbox::new();

        for op in ops {
            let before = ledger.state().clone();
            let result = match op {
                Op::Deposit { who, amount } => ledger.deposit(&ids[who], amount).map(|_| ()),
                Op::Withdraw { who, amount } => {
                    ledger.withdraw(&ids[who], amount, &mut outbox).map(|_| ())
                }
                Op::FailedWithdraw { who, amount } => ledger
                    .withdraw(&ids[who], amount, &mut FailingTransfer::new("down"))
                    .map(|_| ()),
            };

            if result.is_err() {
                prop_assert_eq!(ledger.state(), &before);
            }

            let state = ledger.state();
            prop_assert_eq!(state.sum_of_balances(), u128::from(state.total_deposited));
            prop_assert!(state.total_deposited <= ledger.global_cap());
            prop_assert!(ledger.check_invariants().is_ok());
        }

        for payout in outbox.payouts() {
            prop_assert!(payout.amount <= ledger.per_withdrawal_cap());
        }
    }

    #[test]
    fn zero_amounts_always_rejected(who in 0..ACCOUNTS, seed in 1u64..500) {
        let ids = accounts();
        let mut ledger = VaultLedger::new(1_000, 100).unwrap();
        ledger.deposit(&ids[who], seed).unwrap();
        let before = ledger.state().clone();

        prop_assert_eq!(ledger.deposit(&ids[who], 0), Err(LedgerError::ZeroAmount));
        prop_assert_eq!(
            ledger.withdraw(&ids[who], 0, &mut PayoutOutbox::new()),
            Err(LedgerError::ZeroAmount)
        );
        prop_assert_eq!(ledger.state(), &before);
    }

    #[test]
    fn deposit_withdraw_round_trip(existing in 0u64..500, amount in 1u64..=100) {
        let ids = accounts();
        let mut ledger = VaultLedger::new(1_000, 100).unwrap();
        if existing > 0 {
            ledger.deposit(&ids[1], existing).unwrap();
        }
        let before = ledger.state().balance_of(&ids[0]);
        let total_before = ledger.statistics().total_deposited;

        ledger.deposit(&ids[0], amount).unwrap();
        ledger.withdraw(&ids[0], amount, &mut PayoutOutbox::new()).unwrap();

        prop_assert_eq!(ledger.balance_of(&ids[0]), before);
        prop_assert_eq!(ledger.statistics().total_deposited, total_before);
    }
}
