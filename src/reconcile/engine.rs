//! Reconciliation engine
//!
//! Applies one [`BillingEvent`] to the owning account:
//!
//! ```text
//! SubscriptionUpdated ──> locate account ──> resolve plan ──> [account lock]
//!                                                              │
//!                         build snapshot, carry or reset usage ◀┘
//!                                     │
//!                                     ▼
//!                  commit snapshot + full feature resync (one write)
//!
//! SubscriptionDeleted ──> locate account ──> [account lock] ──> re-provision customer
//! ```
//!
//! Writes are full replacements, so applying the same update twice leaves the
//! account exactly as applying it once.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::ReconcileError;
use crate::event::{BillingEvent, SubscriptionPayload};
use crate::metrics::{self, emit_increment, NoopSink, ObservabilitySink};
use crate::plans::{self, PlanCatalog};
use crate::provider::BillingProvider;
use crate::reconcile::reprovision::CustomerRecreation;
use crate::store::{Account, AccountId, AccountLocks, AccountStore, SubscriptionSnapshot};

/// Engine behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Skip updates whose period end is older than the stored snapshot's
    pub reject_stale_events: bool,
}

/// What handling an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Snapshot and feature flags were replaced
    Applied {
        /// Account that was updated
        account_id: AccountId,
        /// Resolved plan
        plan: String,
        /// Whether the usage counter was reset
        usage_reset: bool,
    },
    /// A fresh billing customer was created for the account
    Reprovisioned {
        /// Account that was re-provisioned
        account_id: AccountId,
        /// New provider customer id
        customer_id: String,
    },
    /// Update skipped because it is older than the stored state
    Stale {
        /// Account that was left untouched
        account_id: AccountId,
    },
    /// Event type is not reconciled
    Ignored,
}

/// Applies billing events to account state
pub struct ReconciliationEngine<S: AccountStore, P: BillingProvider> {
    store: Arc<S>,
    catalog: RwLock<Arc<PlanCatalog>>,
    recreation: CustomerRecreation<S, P>,
    locks: AccountLocks,
    sink: Arc<dyn ObservabilitySink>,
    options: EngineOptions,
}

impl<S: AccountStore, P: BillingProvider> ReconciliationEngine<S, P> {
    /// Create an engine with no metrics and default options
    pub fn new(store: Arc<S>, catalog: PlanCatalog, recreation: CustomerRecreation<S, P>) -> Self {
        Self {
            store,
            catalog: RwLock::new(Arc::new(catalog)),
            recreation,
            locks: AccountLocks::new(),
            sink: Arc::new(NoopSink),
            options: EngineOptions::default(),
        }
    }

    /// Report counters to a sink
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Override behaviour switches
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Current plan catalog
    pub fn catalog(&self) -> Arc<PlanCatalog> {
        self.catalog.read().clone()
    }

    /// Swap in a reloaded plan catalog; in-flight events keep the old one
    pub fn reload_catalog(&self, catalog: PlanCatalog) {
        *self.catalog.write() = Arc::new(catalog);
        info!("Plan catalog reloaded");
    }

    /// The sink this engine reports to
    pub fn sink(&self) -> Arc<dyn ObservabilitySink> {
        self.sink.clone()
    }

    /// Apply one event
    #[instrument(skip(self, event), fields(event_id = %event.event_id(), kind = event.kind()))]
    pub async fn handle(&self, event: &BillingEvent) -> Result<Outcome, ReconcileError> {
        let result = match event {
            BillingEvent::SubscriptionUpdated {
                customer_id,
                payload,
                ..
            } => self.apply_update(customer_id, payload).await,
            BillingEvent::SubscriptionDeleted { customer_id, .. } => {
                self.apply_deletion(customer_id).await
            }
            BillingEvent::Unhandled { event_type, .. } => {
                debug!(event_type = %event_type, "Ignoring unhandled event type");
                Ok(Outcome::Ignored)
            }
        };

        self.report(event, &result);
        result
    }

    /// Rewrite an account's plan name and feature flags from its current product
    ///
    /// Used after a catalog reload, when plans changed but no event arrived.
    /// The usage counter is kept: the subscription itself did not change.
    pub async fn resync_features(&self, account_id: AccountId) -> Result<(), ReconcileError> {
        let _guard = self.locks.lock(account_id).await;
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| ReconcileError::UnknownCustomer(account_id.to_string()))?;

        let catalog = self.catalog();
        let plan = match &account.subscription {
            Some(snapshot) => catalog.resolve(&snapshot.product_id),
            None => catalog.default_plan(),
        };
        let flags = plans::entitlements(&catalog, plan);
        let changes = plans::diff(&account.feature_flags, &flags);

        match account.subscription {
            Some(snapshot) => {
                let previous_plan = snapshot.plan_name.clone();
                let snapshot = SubscriptionSnapshot {
                    plan_name: plan.name.clone(),
                    ..snapshot
                };
                self.store
                    .commit_reconciliation(account_id, snapshot, flags)
                    .await?;
                if previous_plan != plan.name {
                    info!(
                        account_id = %account_id,
                        previous_plan = %previous_plan,
                        plan = %plan.name,
                        "Plan renamed by catalog reload"
                    );
                }
            }
            None => self.store.set_feature_flags(account_id, flags).await?,
        }

        info!(
            account_id = %account_id,
            plan = %plan.name,
            changed = changes.len(),
            "Feature flags resynced"
        );
        Ok(())
    }

    /// Add consumed usage to the account's current subscription
    ///
    /// Returns the new counter value.
    pub async fn record_usage(&self, account_id: AccountId, count: u64) -> Result<u64, ReconcileError> {
        let _guard = self.locks.lock(account_id).await;
        let total = self.store.increment_usage(account_id, count).await?;
        debug!(account_id = %account_id, count, total, "Usage recorded");
        Ok(total)
    }

    async fn locate(&self, customer_id: &str) -> Result<Account, ReconcileError> {
        self.store
            .find_account_by_customer_id(customer_id)
            .await?
            .ok_or_else(|| ReconcileError::UnknownCustomer(customer_id.to_string()))
    }

    /// Re-read the account under its lock, making sure it still owns the customer
    async fn reload_owned(
        &self,
        account_id: AccountId,
        customer_id: &str,
    ) -> Result<Account, ReconcileError> {
        self.store
            .get_account(account_id)
            .await?
            .filter(|account| account.customer_id.as_deref() == Some(customer_id))
            .ok_or_else(|| ReconcileError::UnknownCustomer(customer_id.to_string()))
    }

    async fn apply_update(
        &self,
        customer_id: &str,
        payload: &SubscriptionPayload,
    ) -> Result<Outcome, ReconcileError> {
        let ends_on = payload.period_end_at()?;
        let located = self.locate(customer_id).await?;

        let catalog = self.catalog();
        let plan = catalog.resolve(&payload.product_id);
        if catalog.is_default(plan) && !plan.matches_product(&payload.product_id) {
            debug!(
                product_id = %payload.product_id,
                plan = %plan.name,
                "Product not in catalog, using default plan"
            );
        }

        let _guard = self.locks.lock(located.id).await;
        let account = self.reload_owned(located.id, customer_id).await?;
        let previous = account.subscription.as_ref();

        if self.options.reject_stale_events {
            if let Some(previous) = previous.filter(|p| p.subscription_ends_on > ends_on) {
                warn!(
                    account_id = %account.id,
                    stored_ends_on = %previous.subscription_ends_on,
                    event_ends_on = %ends_on,
                    "Skipping stale subscription update"
                );
                return Ok(Outcome::Stale {
                    account_id: account.id,
                });
            }
        }

        let usage_reset =
            previous.map_or(true, |p| p.is_plan_change(&plan.name, &payload.product_id));
        let usage_counter = match previous {
            Some(previous) if !usage_reset => previous.usage_counter,
            _ => 0,
        };

        let snapshot = SubscriptionSnapshot {
            customer_id: customer_id.to_string(),
            price_id: payload.price_id.clone(),
            product_id: payload.product_id.clone(),
            plan_name: plan.name.clone(),
            subscribed_quantity: payload.quantity,
            subscription_ends_on: ends_on,
            subscription_status: payload.status,
            usage_counter,
        };
        let flags = plans::entitlements(&catalog, plan);
        let changes = plans::diff(&account.feature_flags, &flags);

        self.store
            .commit_reconciliation(account.id, snapshot, flags)
            .await?;

        if payload.status.requires_payment_action() {
            warn!(
                account_id = %account.id,
                customer_id,
                status = %payload.status,
                "Subscription needs payment action"
            );
        }

        info!(
            account_id = %account.id,
            customer_id,
            plan = %plan.name,
            status = %payload.status,
            quantity = payload.quantity,
            usage_reset,
            flags_changed = changes.len(),
            "Subscription reconciled"
        );

        Ok(Outcome::Applied {
            account_id: account.id,
            plan: plan.name.clone(),
            usage_reset,
        })
    }

    async fn apply_deletion(&self, customer_id: &str) -> Result<Outcome, ReconcileError> {
        let located = match self.store.find_account_by_customer_id(customer_id).await? {
            Some(account) => account,
            None => self
                .store
                .find_pending_reprovision(customer_id)
                .await?
                .ok_or_else(|| ReconcileError::UnknownCustomer(customer_id.to_string()))?,
        };

        let _guard = self.locks.lock(located.id).await;
        // Matches while the customer is current or its replacement is unfinished;
        // a redelivery after completion is unknown.
        let account = self
            .store
            .get_account(located.id)
            .await?
            .filter(|account| {
                account.customer_id.as_deref() == Some(customer_id)
                    || account
                        .pending_reprovision
                        .as_ref()
                        .is_some_and(|pending| pending.previous_customer_id == customer_id)
            })
            .ok_or_else(|| ReconcileError::UnknownCustomer(customer_id.to_string()))?;

        let catalog = self.catalog();
        let new_customer_id = self
            .recreation
            .reprovision(&account, customer_id, catalog.default_plan())
            .await?;

        Ok(Outcome::Reprovisioned {
            account_id: account.id,
            customer_id: new_customer_id,
        })
    }

    fn report(&self, event: &BillingEvent, result: &Result<Outcome, ReconcileError>) {
        let kind = event.kind();
        match result {
            Ok(_) => emit_increment(self.sink.as_ref(), metrics::EVENTS_HANDLED, &[("kind", kind)]),
            Err(err) => {
                let name = match err {
                    ReconcileError::UnknownCustomer(customer_id) => {
                        warn!(
                            event_id = %event.event_id(),
                            customer_id = %customer_id,
                            "No account owns customer, event acknowledged without changes"
                        );
                        metrics::UNKNOWN_CUSTOMER
                    }
                    ReconcileError::ProviderUnavailable(_) => metrics::PROVIDER_ERROR,
                    ReconcileError::InvalidPayload(_) => metrics::INVALID_PAYLOAD,
                    ReconcileError::Storage(_) => metrics::STORAGE_ERROR,
                };
                emit_increment(self.sink.as_ref(), name, &[("kind", kind)]);
            }
        }
    }
}
