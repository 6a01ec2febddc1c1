//! In-memory account store
//!
//! Backs tests and the replay CLI. A single `RwLock` guards the map, so every
//! trait method is atomic with respect to concurrent readers.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::plans::FeatureFlags;
use crate::store::{Account, AccountId, AccountStore, PendingReprovision, SubscriptionSnapshot};

/// `HashMap`-backed [`AccountStore`]
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with accounts
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert(account);
        }
        store
    }

    /// Insert or overwrite an account
    pub fn insert(&self, account: Account) -> AccountId {
        let id = account.id;
        self.accounts.write().insert(id, account);
        id
    }

    /// All accounts, sorted by name then id
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.read().values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        accounts
    }

    fn update<T>(
        &self,
        id: AccountId,
        apply: impl FnOnce(&mut Account) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))?;
        apply(account)
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_account_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .read()
            .values()
            .find(|account| account.customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().get(&id).cloned())
    }

    async fn replace_subscription_snapshot(
        &self,
        id: AccountId,
        snapshot: SubscriptionSnapshot,
    ) -> Result<(), StoreError> {
        self.update(id, |account| {
            account.subscription = Some(snapshot);
            Ok(())
        })
    }

    async fn set_feature_flags(
        &self,
        id: AccountId,
        flags: FeatureFlags,
    ) -> Result<(), StoreError> {
        self.update(id, |account| {
            account.feature_flags = flags;
            Ok(())
        })
    }

    async fn commit_reconciliation(
        &self,
        id: AccountId,
        snapshot: SubscriptionSnapshot,
        flags: FeatureFlags,
    ) -> Result<(), StoreError> {
        self.update(id, |account| {
            account.subscription = Some(snapshot);
            account.feature_flags = flags;
            Ok(())
        })
    }

    async fn find_pending_reprovision(
        &self,
        previous_customer_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .read()
            .values()
            .find(|account| {
                account
                    .pending_reprovision
                    .as_ref()
                    .is_some_and(|pending| pending.previous_customer_id == previous_customer_id)
            })
            .cloned())
    }

    async fn begin_reprovision(
        &self,
        id: AccountId,
        pending: PendingReprovision,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        if let Some(owner) = accounts.values().find(|account| {
            account.id != id && account.customer_id.as_ref() == Some(&pending.customer_id)
        }) {
            return Err(StoreError::CustomerIdTaken {
                customer_id: pending.customer_id,
                owner: owner.id.to_string(),
            });
        }
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))?;
        account.customer_id = Some(pending.customer_id.clone());
        account.pending_reprovision = Some(pending);
        Ok(())
    }

    async fn complete_reprovision(&self, id: AccountId) -> Result<(), StoreError> {
        self.update(id, |account| {
            account.pending_reprovision = None;
            Ok(())
        })
    }

    async fn increment_usage(&self, id: AccountId, by: u64) -> Result<u64, StoreError> {
        self.update(id, |account| {
            let snapshot = account
                .subscription
                .as_mut()
                .ok_or_else(|| StoreError::NoSubscription(id.to_string()))?;
            snapshot.usage_counter = snapshot.usage_counter.saturating_add(by);
            Ok(snapshot.usage_counter)
        })
    }
}
