//! Account store abstraction.
//!
//! All core logic depends only on this interface so that the in-memory
//! reference backing and a durable transactional store are interchangeable.

use crate::errors::LedgerError;
use crate::ledger::Account;
use crate::AccountId;
use dashmap::DashMap;

/// Transactional per-account storage. Implementations must serialize
/// concurrent operations on the same account while letting operations on
/// different accounts proceed independently.
pub trait AccountStore: Send + Sync {
    /// Atomic per-account read-modify-write. The account is created with
    /// `starting_balance` on first contact. If `op` fails the account is
    /// left exactly as it was, and the error is returned unchanged.
    /// Returns the balance after the operation.
    fn mutate(
        &self,
        id: &AccountId,
        starting_balance: u64,
        op: &mut dyn FnMut(&mut Account) -> Result<(), LedgerError>,
    ) -> Result<u64, LedgerError>;

    /// Consistent snapshot of one account, created lazily on first contact.
    fn snapshot(&self, id: &AccountId, starting_balance: u64) -> Account;
}

/// Volatile reference backing. DashMap entry locking gives per-account
/// serialization without a global lock.
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for MemoryStore {
    fn mutate(
        &self,
        id: &AccountId,
        starting_balance: u64,
        op: &mut dyn FnMut(&mut Account) -> Result<(), LedgerError>,
    ) -> Result<u64, LedgerError> {
        let mut entry = self
            .accounts
            .entry(id.clone())
            .or_insert_with(|| Account::opened_with(starting_balance));
        let account = entry.value_mut();

        // The closure mutates in place; on failure it must not have touched
        // the account (the ledger checks before writing).
        op(account)?;
        Ok(account.balance)
    }

    fn snapshot(&self, id: &AccountId, starting_balance: u64) -> Account {
        self.accounts
            .entry(id.clone())
            .or_insert_with(|| Account::opened_with(starting_balance))
            .value()
            .clone()
    }
}
