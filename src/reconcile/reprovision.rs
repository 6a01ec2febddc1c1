//! Customer recreation after a subscription is deleted
//!
//! A deleted subscription leaves the account without a live billing identity.
//! [`CustomerRecreation`] creates a fresh provider customer, stores its id on
//! the account and, when the default plan has a price, starts a default-plan
//! subscription for it. The provider then emits the usual subscription events
//! for the new customer, which the engine reconciles like any other update.
//!
//! Re-provisioning is resumable. The switch to the new customer is stored
//! together with a [`PendingReprovision`] marker that is only cleared once the
//! subscription exists, and both provider calls carry idempotency keys derived
//! from the account and the deleted customer id. A redelivered deletion picks
//! up where the failed attempt stopped without creating a second customer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{ProviderError, ReconcileError};
use crate::plans::PlanDefinition;
use crate::provider::BillingProvider;
use crate::store::{Account, AccountStore, PendingReprovision};

/// Re-provisions a default billing customer for an account
pub struct CustomerRecreation<S: AccountStore, P: BillingProvider> {
    store: Arc<S>,
    provider: Arc<P>,
    provider_timeout: Duration,
    default_quantity: u32,
}

impl<S: AccountStore, P: BillingProvider> CustomerRecreation<S, P> {
    /// Create a trigger bound to a store and provider client
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        provider_timeout: Duration,
        default_quantity: u32,
    ) -> Self {
        Self {
            store,
            provider,
            provider_timeout,
            default_quantity,
        }
    }

    /// Replace `previous_customer_id` with a new customer on the default plan
    ///
    /// Returns the new customer id. Provider failures and timeouts surface as
    /// [`ReconcileError::ProviderUnavailable`]. The account keeps its pending
    /// marker until the default subscription is started, so calling this again
    /// with the stored account resumes the same re-provisioning.
    pub async fn reprovision(
        &self,
        account: &Account,
        previous_customer_id: &str,
        default_plan: &PlanDefinition,
    ) -> Result<String, ReconcileError> {
        let key_prefix = format!("reprovision:{}:{}", account.id, previous_customer_id);

        let resumed = account
            .pending_reprovision
            .as_ref()
            .filter(|pending| pending.previous_customer_id == previous_customer_id);

        let customer_id = match resumed {
            Some(pending) => {
                info!(
                    account_id = %account.id,
                    previous_customer_id,
                    customer_id = %pending.customer_id,
                    "Resuming re-provisioning"
                );
                pending.customer_id.clone()
            }
            None => {
                let customer_id = self
                    .bounded(
                        "create_customer",
                        self.provider
                            .create_customer(account, &format!("{key_prefix}:customer")),
                    )
                    .await?;

                // Stored before the subscription starts so the provider's
                // follow-up events for this customer find the account.
                self.store
                    .begin_reprovision(
                        account.id,
                        PendingReprovision {
                            previous_customer_id: previous_customer_id.to_string(),
                            customer_id: customer_id.clone(),
                        },
                    )
                    .await?;

                info!(
                    account_id = %account.id,
                    previous_customer_id,
                    customer_id = %customer_id,
                    "Re-provisioned billing customer"
                );
                customer_id
            }
        };

        if let Some(price_id) = default_plan.primary_price_id() {
            let subscription_id = self
                .bounded(
                    "create_subscription",
                    self.provider.create_subscription(
                        &customer_id,
                        price_id,
                        self.default_quantity,
                        &format!("{key_prefix}:subscription"),
                    ),
                )
                .await?;
            info!(
                account_id = %account.id,
                customer_id = %customer_id,
                subscription_id = %subscription_id,
                plan = %default_plan.name,
                "Started default plan subscription"
            );
        }

        self.store.complete_reprovision(account.id).await?;
        Ok(customer_id)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ReconcileError> {
        match timeout(self.provider_timeout, call).await {
            Ok(result) => result.map_err(|e| {
                warn!(operation, error = %e, "Billing provider call failed");
                ReconcileError::from(e)
            }),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.provider_timeout.as_millis() as u64,
                    "Billing provider call timed out"
                );
                Err(ReconcileError::ProviderUnavailable(format!(
                    "{operation} timed out after {:?}",
                    self.provider_timeout
                )))
            }
        }
    }
}
