//! Account and subscription state store
//!
//! The engine talks to persistence only through [`AccountStore`]. Every write
//! is atomic per call; [`AccountStore::commit_reconciliation`] replaces the
//! snapshot and the feature flags as one unit so readers never observe one
//! without the other.

pub mod locks;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::SubscriptionStatus;
use crate::plans::FeatureFlags;

pub use locks::AccountLocks;
pub use memory::InMemoryAccountStore;

/// Account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The account's current, fully replaced view of its billing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    /// Provider customer id the snapshot was built from
    pub customer_id: String,
    /// Provider price id
    pub price_id: String,
    /// Provider product id
    pub product_id: String,
    /// Catalog plan resolved from `product_id`
    pub plan_name: String,
    /// Subscribed seat quantity
    pub subscribed_quantity: u32,
    /// End of the current billing period
    pub subscription_ends_on: DateTime<Utc>,
    /// Provider subscription status
    pub subscription_status: SubscriptionStatus,
    /// Consumed usage in the current plan; cleared on plan change
    pub usage_counter: u64,
}

impl SubscriptionSnapshot {
    /// Check if moving to `plan_name`/`product_id` is a plan change
    pub fn is_plan_change(&self, plan_name: &str, product_id: &str) -> bool {
        self.plan_name != plan_name || self.product_id != product_id
    }
}

/// A customer re-provisioning that has started but not finished
///
/// The new customer exists at the provider and is already the account's
/// customer id; the default subscription may still be missing. A redelivered
/// deletion for `previous_customer_id` resumes from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReprovision {
    /// Customer id whose subscription was deleted
    pub previous_customer_id: String,
    /// Customer id created to replace it
    pub customer_id: String,
}

/// A billable account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id
    #[serde(default)]
    pub id: AccountId,
    /// Display name, also sent to the provider
    pub name: String,
    /// Email handed to the provider when creating a customer
    #[serde(default)]
    pub billing_email: Option<String>,
    /// Provider customer id; the join key for inbound events
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Latest reconciled subscription, if any update was applied
    #[serde(default)]
    pub subscription: Option<SubscriptionSnapshot>,
    /// Explicit on/off per known feature
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    /// Unfinished re-provisioning, cleared once the default plan is started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reprovision: Option<PendingReprovision>,
}

impl Account {
    /// Create an account with no billing identity
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            name: name.into(),
            billing_email: None,
            customer_id: None,
            subscription: None,
            feature_flags: FeatureFlags::new(),
            pending_reprovision: None,
        }
    }

    /// Set the provider customer id
    pub fn with_customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// Set the billing email
    pub fn with_billing_email(mut self, email: impl Into<String>) -> Self {
        self.billing_email = Some(email.into());
        self
    }

    /// Check a feature flag; unset flags are disabled
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        self.feature_flags.get(feature).copied().unwrap_or(false)
    }

    /// Current usage counter, zero without a subscription
    pub fn usage_counter(&self) -> u64 {
        self.subscription
            .as_ref()
            .map_or(0, |snapshot| snapshot.usage_counter)
    }
}

/// Durable account storage used by the reconciliation engine
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync + 'static {
    /// Find the account owning a provider customer id (exact match)
    async fn find_account_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Fetch an account by id
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Replace the subscription snapshot, creating it if absent
    async fn replace_subscription_snapshot(
        &self,
        id: AccountId,
        snapshot: SubscriptionSnapshot,
    ) -> Result<(), StoreError>;

    /// Replace the feature flag map
    async fn set_feature_flags(&self, id: AccountId, flags: FeatureFlags)
        -> Result<(), StoreError>;

    /// Replace snapshot and feature flags in one atomic write
    async fn commit_reconciliation(
        &self,
        id: AccountId,
        snapshot: SubscriptionSnapshot,
        flags: FeatureFlags,
    ) -> Result<(), StoreError>;

    /// Find the account with an unfinished re-provisioning of `previous_customer_id`
    async fn find_pending_reprovision(
        &self,
        previous_customer_id: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Switch the account to a newly created customer and record the marker
    ///
    /// Fails with [`StoreError::CustomerIdTaken`] when another account owns
    /// the new customer id.
    async fn begin_reprovision(
        &self,
        id: AccountId,
        pending: PendingReprovision,
    ) -> Result<(), StoreError>;

    /// Clear the re-provisioning marker
    async fn complete_reprovision(&self, id: AccountId) -> Result<(), StoreError>;

    /// Add consumed usage and return the new counter
    async fn increment_usage(&self, id: AccountId, by: u64) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_change_detection() {
        let snapshot = SubscriptionSnapshot {
            customer_id: "cus_123".to_string(),
            price_id: "test".to_string(),
            product_id: "plan_id".to_string(),
            plan_name: "Hacker".to_string(),
            subscribed_quantity: 10,
            subscription_ends_on: DateTime::<Utc>::from_timestamp(1_686_567_520, 0).unwrap(),
            subscription_status: SubscriptionStatus::Active,
            usage_counter: 5,
        };

        assert!(!snapshot.is_plan_change("Hacker", "plan_id"));
        assert!(snapshot.is_plan_change("Startups", "plan_id_2"));
        assert!(snapshot.is_plan_change("Hacker", "plan_id_legacy"));
    }

    #[test]
    fn test_account_defaults() {
        let account = Account::new("Acme").with_customer_id("cus_1");
        assert_eq!(account.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(account.usage_counter(), 0);
        assert!(!account.is_feature_enabled("help_center"));
    }

    #[test]
    fn test_account_deserializes_with_defaults() {
        let account: Account = serde_json::from_str(
            r#"{"id": "7d7c3f2e-9f0e-4d5b-9c43-0f1a2b3c4d5e", "name": "Acme", "customer_id": "cus_123"}"#,
        )
        .unwrap();
        assert_eq!(account.customer_id.as_deref(), Some("cus_123"));
        assert!(account.subscription.is_none());
        assert!(account.feature_flags.is_empty());
        assert!(account.pending_reprovision.is_none());
    }

    #[test]
    fn test_pending_marker_survives_serialization() {
        let mut account = Account::new("Acme").with_customer_id("cus_new");
        let plain = serde_json::to_value(&account).unwrap();
        assert!(plain.get("pending_reprovision").is_none());

        account.pending_reprovision = Some(PendingReprovision {
            previous_customer_id: "cus_old".to_string(),
            customer_id: "cus_new".to_string(),
        });
        let json = serde_json::to_string(&account).unwrap();
        let restored: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, account);
    }
}
