//! Billing provider abstraction
//!
//! The engine only needs two provider operations, both used when a deleted
//! subscription forces a fresh billing identity. Both take an idempotency key:
//! a retried call with the same key must return the original result instead
//! of creating a second object.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::store::Account;

/// Payment provider client
///
/// Abstracts payment processing to allow different providers (Stripe, etc.)
#[async_trait]
pub trait BillingProvider: Send + Sync + 'static {
    /// Create a customer for the account and return its provider id
    async fn create_customer(
        &self,
        account: &Account,
        idempotency_key: &str,
    ) -> Result<String, ProviderError>;

    /// Start a subscription and return its provider id
    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        quantity: u32,
        idempotency_key: &str,
    ) -> Result<String, ProviderError>;
}

/// Provider used when no credentials are configured
///
/// Every call fails with [`ProviderError::NotConfigured`], which the engine
/// reports as a retryable provider outage.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl BillingProvider for UnconfiguredProvider {
    async fn create_customer(
        &self,
        account: &Account,
        _idempotency_key: &str,
    ) -> Result<String, ProviderError> {
        tracing::warn!(
            account_id = %account.id,
            "Cannot create billing customer: no provider configured"
        );
        Err(ProviderError::NotConfigured)
    }

    async fn create_subscription(
        &self,
        _customer_id: &str,
        _price_id: &str,
        _quantity: u32,
        _idempotency_key: &str,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}
