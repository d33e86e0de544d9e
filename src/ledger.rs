//! Balances and the append-only transaction log.
//!
//! Money is only ever moved through [`Ledger::apply`]: an atomic per-account
//! debit/credit that rejects any debit that would drive the balance negative.
//! The invariant is that a balance always equals the fold of its log from
//! zero.

use crate::errors::LedgerError;
use crate::store::AccountStore;
use crate::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Reason codes attached to every ledger transaction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    CardPurchase,
    BingoWin,
    AdminCredit,
    Deposit,
    Withdrawal,
}

/// One appended log record. `balance_after` is the balance that resulted
/// from this transaction, so the log alone reproduces the account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub at: DateTime<Utc>,
    pub amount: i64,
    pub reason: Reason,
    pub description: String,
    pub balance_after: u64,
}

/// Account state: balance, transaction log, and the immutable referral
/// back-reference. Created lazily on first contact, never destroyed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub log: Vec<LedgerEntry>,
    pub referred_by: Option<AccountId>,
}

impl Account {
    pub fn opened_with(starting_balance: u64) -> Self {
        Self {
            balance: starting_balance,
            log: Vec::new(),
            referred_by: None,
        }
    }
}

/// The ledger: the only mutator of account money.
pub struct Ledger {
    store: Arc<dyn AccountStore>,
    starting_balance: u64,
}

impl Ledger {
    pub fn new(store: Arc<dyn AccountStore>, starting_balance: u64) -> Self {
        Self {
            store,
            starting_balance,
        }
    }

    /// Current balance, initializing the account on first contact. Never
    /// fails.
    pub fn balance(&self, account: &AccountId) -> u64 {
        self.store.snapshot(account, self.starting_balance).balance
    }

    /// Atomically apply a signed amount and append a log entry. A debit
    /// larger than the current balance fails with `InsufficientBalance` and
    /// leaves the account unchanged. Serialized per account by the store;
    /// different accounts never block each other.
    pub fn apply(
        &self,
        account: &AccountId,
        amount: i64,
        reason: Reason,
        description: &str,
    ) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(0));
        }

        let new_balance = self
            .store
            .mutate(account, self.starting_balance, &mut |acct| {
                let balance = if amount < 0 {
                    let debit = amount.unsigned_abs();
                    acct.balance
                        .checked_sub(debit)
                        .ok_or(LedgerError::InsufficientBalance {
                            balance: acct.balance,
                            required: debit,
                        })?
                } else {
                    acct.balance.saturating_add(amount as u64)
                };

                // Timestamps are monotonically non-decreasing per account.
                let now = Utc::now();
                let at = match acct.log.last() {
                    Some(last) if last.at > now => last.at,
                    _ => now,
                };

                acct.balance = balance;
                acct.log.push(LedgerEntry {
                    at,
                    amount,
                    reason,
                    description: description.to_string(),
                    balance_after: balance,
                });
                Ok(())
            })?;

        debug!(%account, amount, ?reason, new_balance, "ledger transaction applied");
        Ok(new_balance)
    }

    /// Most recent transactions, newest first, for statement rendering.
    pub fn history(&self, account: &AccountId, limit: usize) -> Vec<LedgerEntry> {
        let snapshot = self.store.snapshot(account, self.starting_balance);
        snapshot.log.iter().rev().take(limit).cloned().collect()
    }

    /// Bind the referral source. Set once at first contact and immutable
    /// thereafter.
    pub fn set_referrer(
        &self,
        account: &AccountId,
        referrer: &AccountId,
    ) -> Result<(), LedgerError> {
        if account == referrer {
            return Err(LedgerError::SelfReferral);
        }
        let referrer = referrer.clone();
        self.store
            .mutate(account, self.starting_balance, &mut |acct| {
                if acct.referred_by.is_some() {
                    return Err(LedgerError::ReferrerAlreadySet);
                }
                acct.referred_by = Some(referrer.clone());
                Ok(())
            })?;
        Ok(())
    }

    pub fn referrer(&self, account: &AccountId) -> Option<AccountId> {
        self.store
            .snapshot(account, self.starting_balance)
            .referred_by
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger(starting_balance: u64) -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()), starting_balance)
    }

    #[test]
    fn test_lazy_balance() {
        let ledger = ledger(1_000);
        assert_eq!(ledger.balance(&AccountId::from("alice")), 1_000);
    }

    #[test]
    fn test_debit_and_credit() {
        let ledger = ledger(1_000);
        let alice = AccountId::from("alice");

        let after_debit = ledger
            .apply(&alice, -100, Reason::CardPurchase, "bingo card")
            .unwrap();
        assert_eq!(after_debit, 900);

        let after_credit = ledger
            .apply(&alice, 510, Reason::BingoWin, "session prize")
            .unwrap();
        assert_eq!(after_credit, 1_410);
    }

    #[test]
    fn test_overdraft_rejected_without_side_effect() {
        let ledger = ledger(50);
        let bob = AccountId::from("bob");

        let err = ledger
            .apply(&bob, -100, Reason::CardPurchase, "bingo card")
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                balance: 50,
                required: 100
            }
        ));
        assert_eq!(ledger.balance(&bob), 50);
        assert!(ledger.history(&bob, 10).is_empty());
    }

    #[test]
    fn test_exact_balance_debit_reaches_zero() {
        let ledger = ledger(100);
        let carol = AccountId::from("carol");
        let balance = ledger
            .apply(&carol, -100, Reason::CardPurchase, "bingo card")
            .unwrap();
        assert_eq!(balance, 0);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let ledger = ledger(100);
        let err = ledger
            .apply(&AccountId::from("dan"), 0, Reason::Deposit, "noop")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(0)));
    }

    #[test]
    fn test_balance_equals_log_fold() {
        let ledger = ledger(1_000);
        let eve = AccountId::from("eve");

        ledger.apply(&eve, -100, Reason::CardPurchase, "card").unwrap();
        ledger.apply(&eve, 200, Reason::Deposit, "top-up").unwrap();
        ledger.apply(&eve, -300, Reason::Withdrawal, "cash out").unwrap();

        let history = ledger.history(&eve, 100);
        let folded = history
            .iter()
            .fold(1_000_i64, |acc, entry| acc + entry.amount);
        assert_eq!(folded as u64, ledger.balance(&eve));
    }

    #[test]
    fn test_no_lost_updates_under_concurrency() {
        let ledger = Arc::new(ledger(0));
        let shared = AccountId::from("shared");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            let shared = shared.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    ledger
                        .apply(&shared, 1, Reason::Deposit, "concurrent credit")
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.balance(&shared), 2_000);
        assert_eq!(ledger.history(&shared, usize::MAX).len(), 2_000);
    }

    #[test]
    fn test_timestamps_monotonic_per_account() {
        let ledger = ledger(1_000);
        let frank = AccountId::from("frank");
        for _ in 0..20 {
            ledger.apply(&frank, 1, Reason::Deposit, "tick").unwrap();
        }
        let history = ledger.history(&frank, usize::MAX);
        // history is newest first
        for pair in history.windows(2) {
            assert!(pair[0].at >= pair[1].at);
        }
    }

    #[test]
    fn test_referrer_set_once() {
        let ledger = ledger(0);
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        let carol = AccountId::from("carol");

        assert!(ledger.set_referrer(&alice, &alice).is_err());
        ledger.set_referrer(&alice, &bob).unwrap();
        assert_eq!(ledger.referrer(&alice), Some(bob));
        assert!(matches!(
            ledger.set_referrer(&alice, &carol),
            Err(LedgerError::ReferrerAlreadySet)
        ));
    }
}
