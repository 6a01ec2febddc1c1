//! Integration tests for billing-reconciler
//!
//! Drives the engine the way a webhook consumer does: raw Stripe event JSON in,
//! account state out.
//!
//! # Test Categories
//!
//! 1. **End-to-End**: Stripe payload to stored snapshot
//! 2. **Plan Changes**: usage reset and feature resync
//! 3. **Deletion**: customer re-provisioning
//! 4. **Concurrency**: many events for one account
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --package billing-reconciler --test reconcile_tests
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use billing_reconciler::error::ProviderError;
use billing_reconciler::plans::PlanCatalog;
use billing_reconciler::provider::BillingProvider;
use billing_reconciler::reconcile::{CustomerRecreation, Outcome, ReconciliationEngine};
use billing_reconciler::store::{Account, AccountStore, InMemoryAccountStore};
use billing_reconciler::stripe::StripeEvent;
use billing_reconciler::{BillingEvent, ReconcileError};

/// Provider that counts calls and hands out sequential customer ids
#[derive(Default)]
struct CountingProvider {
    customers: AtomicU32,
    subscriptions: AtomicU32,
    failing_subscriptions: AtomicU32,
}

#[async_trait]
impl BillingProvider for CountingProvider {
    async fn create_customer(
        &self,
        _account: &Account,
        _idempotency_key: &str,
    ) -> Result<String, ProviderError> {
        let n = self.customers.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cus_new_{n}"))
    }

    async fn create_subscription(
        &self,
        _customer_id: &str,
        _price_id: &str,
        _quantity: u32,
        _idempotency_key: &str,
    ) -> Result<String, ProviderError> {
        if self
            .failing_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Api {
                status: 500,
                message: "api_error".to_string(),
            });
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok("sub_new".to_string())
    }
}

type Engine = ReconciliationEngine<InMemoryAccountStore, CountingProvider>;

fn catalog() -> PlanCatalog {
    PlanCatalog::from_json(
        r#"[
            {"name": "Hacker", "product_id": ["plan_id"], "price_ids": ["price_hacker"]},
            {"name": "Startups", "product_id": ["plan_id_2"], "price_ids": ["price_startups"],
             "features": ["help_center", "campaigns", "team_management"]}
        ]"#,
    )
    .expect("catalog is valid")
}

fn setup() -> (Arc<InMemoryAccountStore>, Arc<CountingProvider>, Arc<Engine>) {
    let store = Arc::new(InMemoryAccountStore::new());
    let provider = Arc::new(CountingProvider::default());
    let recreation = CustomerRecreation::new(
        store.clone(),
        provider.clone(),
        Duration::from_secs(1),
        2,
    );
    let engine = ReconciliationEngine::new(store.clone(), catalog(), recreation);
    (store, provider, Arc::new(engine))
}

fn stripe_update(customer: &str, product: &str, quantity: &str, period_end: i64) -> BillingEvent {
    let json = format!(
        r#"{{
            "id": "evt_{product}_{period_end}",
            "type": "customer.subscription.updated",
            "created": 1686567000,
            "data": {{
                "object": {{
                    "id": "sub_1",
                    "customer": "{customer}",
                    "status": "active",
                    "current_period_end": {period_end},
                    "quantity": "{quantity}",
                    "plan": {{"id": "test", "product": "{product}", "name": "Plan"}}
                }}
            }}
        }}"#
    );
    StripeEvent::from_bytes(json.as_bytes())
        .and_then(|event| event.to_billing_event())
        .expect("event parses")
}

fn stripe_deleted(customer: &str) -> BillingEvent {
    let json = format!(
        r#"{{"id": "evt_del", "type": "customer.subscription.deleted",
            "data": {{"object": {{"customer": "{customer}", "status": "canceled"}}}}}}"#
    );
    StripeEvent::from_bytes(json.as_bytes())
        .and_then(|event| event.to_billing_event())
        .expect("event parses")
}

// ============================================================================
// MODULE: End-to-End Tests
// ============================================================================

mod end_to_end_tests {
    use super::*;
    use billing_reconciler::store::SubscriptionSnapshot;
    use billing_reconciler::SubscriptionStatus;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_update_builds_snapshot() {
        let (store, _, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));

        engine
            .handle(&stripe_update("cus_123", "plan_id", "10", 1_686_567_520))
            .await
            .unwrap();

        let account = store.get_account(id).await.unwrap().unwrap();
        assert_eq!(
            account.subscription,
            Some(SubscriptionSnapshot {
                customer_id: "cus_123".to_string(),
                price_id: "test".to_string(),
                product_id: "plan_id".to_string(),
                plan_name: "Hacker".to_string(),
                subscribed_quantity: 10,
                subscription_ends_on: Utc.timestamp_opt(1_686_567_520, 0).unwrap(),
                subscription_status: SubscriptionStatus::Active,
                usage_counter: 0,
            })
        );
        assert_eq!(
            account
                .subscription
                .unwrap()
                .subscription_ends_on
                .to_rfc3339(),
            "2023-06-12T10:58:40+00:00"
        );
    }

    #[tokio::test]
    async fn test_repeated_update_is_idempotent() {
        let (store, _, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));
        let event = stripe_update("cus_123", "plan_id_2", "3", 1_686_567_520);

        engine.handle(&event).await.unwrap();
        let once = store.get_account(id).await.unwrap().unwrap();
        engine.handle(&event).await.unwrap();
        let twice = store.get_account(id).await.unwrap().unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_unknown_product_falls_back_to_default_plan() {
        let (store, _, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));

        let outcome = engine
            .handle(&stripe_update("cus_123", "prod_legacy", "1", 1_686_567_520))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Applied {
                account_id: id,
                plan: "Hacker".to_string(),
                usage_reset: true,
            }
        );
        let snapshot = store.get_account(id).await.unwrap().unwrap().subscription.unwrap();
        assert_eq!(snapshot.product_id, "prod_legacy");
    }

    #[tokio::test]
    async fn test_update_for_unknown_customer_changes_nothing() {
        let (store, _, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));

        let err = engine
            .handle(&stripe_update("cus_other", "plan_id", "1", 1_686_567_520))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::UnknownCustomer(_)));
        assert!(store.get_account(id).await.unwrap().unwrap().subscription.is_none());
    }
}

// ============================================================================
// MODULE: Plan Change Tests
// ============================================================================

mod plan_change_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_usage_reset_on_plan_change_only() {
        let (store, _, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));

        engine
            .handle(&stripe_update("cus_123", "plan_id", "1", 1_000))
            .await
            .unwrap();
        engine.record_usage(id, 5).await.unwrap();

        engine
            .handle(&stripe_update("cus_123", "plan_id", "2", 2_000))
            .await
            .unwrap();
        assert_eq!(store.get_account(id).await.unwrap().unwrap().usage_counter(), 5);

        engine
            .handle(&stripe_update("cus_123", "plan_id_2", "2", 3_000))
            .await
            .unwrap();
        let account = store.get_account(id).await.unwrap().unwrap();
        assert_eq!(account.usage_counter(), 0);
        assert_eq!(account.subscription.unwrap().plan_name, "Startups");
    }

    #[tokio::test]
    async fn test_features_fully_resynced_both_ways() {
        let (store, _, engine) = setup();
        let mut account = Account::new("Acme").with_customer_id("cus_123");
        account.feature_flags.insert("help_center".to_string(), true);
        account.feature_flags.insert("legacy_flag".to_string(), true);
        let id = store.insert(account);

        engine
            .handle(&stripe_update("cus_123", "plan_id", "1", 1_000))
            .await
            .unwrap();
        let account = store.get_account(id).await.unwrap().unwrap();
        assert!(!account.is_feature_enabled("help_center"));
        assert!(!account.is_feature_enabled("campaigns"));

        engine
            .handle(&stripe_update("cus_123", "plan_id_2", "1", 2_000))
            .await
            .unwrap();
        let account = store.get_account(id).await.unwrap().unwrap();
        assert!(account.is_feature_enabled("help_center"));
        assert!(account.is_feature_enabled("campaigns"));
        assert!(account.is_feature_enabled("team_management"));

        engine
            .handle(&stripe_update("cus_123", "plan_id", "1", 3_000))
            .await
            .unwrap();
        let account = store.get_account(id).await.unwrap().unwrap();
        let enabled: Vec<_> = account
            .feature_flags
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(enabled, Vec::<&str>::new());
    }
}

// ============================================================================
// MODULE: Deletion Tests
// ============================================================================

mod deletion_tests {
    use super::*;

    #[tokio::test]
    async fn test_deletion_reprovisions_once() {
        let (store, provider, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));

        let outcome = engine.handle(&stripe_deleted("cus_123")).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Reprovisioned {
                account_id: id,
                customer_id: "cus_new_0".to_string(),
            }
        );
        assert_eq!(provider.customers.load(Ordering::SeqCst), 1);
        assert_eq!(provider.subscriptions.load(Ordering::SeqCst), 1);
        let account = store.get_account(id).await.unwrap().unwrap();
        assert_eq!(account.customer_id.as_deref(), Some("cus_new_0"));
    }

    #[tokio::test]
    async fn test_redelivered_deletion_does_not_reprovision_again() {
        let (store, provider, engine) = setup();
        store.insert(Account::new("Acme").with_customer_id("cus_123"));

        engine.handle(&stripe_deleted("cus_123")).await.unwrap();
        let err = engine.handle(&stripe_deleted("cus_123")).await.unwrap_err();

        assert!(matches!(err, ReconcileError::UnknownCustomer(_)));
        assert_eq!(provider.customers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_subscription_is_resumed_by_redelivery() {
        let (store, provider, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));
        provider.failing_subscriptions.store(1, Ordering::SeqCst);

        let err = engine.handle(&stripe_deleted("cus_123")).await.unwrap_err();
        assert!(err.is_retryable());

        let outcome = engine.handle(&stripe_deleted("cus_123")).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Reprovisioned {
                account_id: id,
                customer_id: "cus_new_0".to_string(),
            }
        );
        assert_eq!(provider.customers.load(Ordering::SeqCst), 1);
        assert_eq!(provider.subscriptions.load(Ordering::SeqCst), 1);
        let account = store.get_account(id).await.unwrap().unwrap();
        assert_eq!(account.customer_id.as_deref(), Some("cus_new_0"));
        assert!(account.pending_reprovision.is_none());
    }

    #[tokio::test]
    async fn test_updates_for_new_customer_apply_while_reprovision_is_pending() {
        let (store, provider, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));
        provider.failing_subscriptions.store(1, Ordering::SeqCst);
        engine.handle(&stripe_deleted("cus_123")).await.unwrap_err();

        let outcome = engine
            .handle(&stripe_update("cus_new_0", "plan_id", "2", 2_000))
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Applied { account_id, .. } if account_id == id));
        let account = store.get_account(id).await.unwrap().unwrap();
        assert!(account.pending_reprovision.is_some());
    }

    #[tokio::test]
    async fn test_deletion_for_unknown_customer_is_not_fatal() {
        let (_, provider, engine) = setup();

        let err = engine.handle(&stripe_deleted("cus_ghost")).await.unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(provider.customers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deletion_keeps_existing_snapshot() {
        let (store, _, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));
        engine
            .handle(&stripe_update("cus_123", "plan_id_2", "4", 1_000))
            .await
            .unwrap();

        engine.handle(&stripe_deleted("cus_123")).await.unwrap();

        let account = store.get_account(id).await.unwrap().unwrap();
        let snapshot = account.subscription.unwrap();
        assert_eq!(snapshot.plan_name, "Startups");
        assert_eq!(snapshot.customer_id, "cus_123");
    }
}

// ============================================================================
// MODULE: Concurrency Tests
// ============================================================================

mod concurrency_tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_leave_consistent_state() {
        let (store, _, engine) = setup();
        let id = store.insert(Account::new("Acme").with_customer_id("cus_123"));

        let tasks = (0..32).map(|i| {
            let engine = engine.clone();
            let product = if i % 2 == 0 { "plan_id" } else { "plan_id_2" };
            tokio::spawn(async move {
                engine
                    .handle(&stripe_update("cus_123", product, "1", 1_000 + i))
                    .await
            })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let account = store.get_account(id).await.unwrap().unwrap();
        let snapshot = account.subscription.unwrap();
        let expects_help_center = snapshot.plan_name == "Startups";
        assert_eq!(account.feature_flags["help_center"], expects_help_center);
        assert_eq!(
            snapshot.product_id == "plan_id_2",
            expects_help_center,
            "snapshot and flags come from the same event"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deletions_reprovision_once() {
        let (store, provider, engine) = setup();
        store.insert(Account::new("Acme").with_customer_id("cus_123"));

        let tasks = (0..8).map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.handle(&stripe_deleted("cus_123")).await })
        });
        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(provider.customers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_accounts_progress_independently() {
        let (store, _, engine) = setup();
        let ids: Vec<_> = (0..10)
            .map(|i| store.insert(Account::new(format!("acct-{i}")).with_customer_id(format!("cus_{i}"))))
            .collect();

        let tasks = (0..10).map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .handle(&stripe_update(&format!("cus_{i}"), "plan_id_2", "5", 1_000))
                    .await
            })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        for id in ids {
            let account = store.get_account(id).await.unwrap().unwrap();
            assert_eq!(account.subscription.unwrap().subscribed_quantity, 5);
        }
    }
}

// ============================================================================
// MODULE: Catalog File Tests
// ============================================================================

mod catalog_file_tests {
    use super::*;

    #[test]
    fn test_example_catalog_loads() {
        let catalog = PlanCatalog::from_path(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config/plans.example.json"
        ))
        .unwrap();

        assert_eq!(catalog.default_plan().name, "Hacker");
        assert_eq!(catalog.resolve("prod_startups").name, "Startups");
        assert_eq!(catalog.known_features().len(), 9);
        assert_eq!(
            catalog.by_name("Startups").and_then(|plan| plan.primary_price_id()),
            Some("price_startups_monthly")
        );

        let default = catalog.default_plan();
        let flags = billing_reconciler::plans::entitlements(&catalog, default);
        assert!(flags.values().all(|enabled| !enabled));
    }
}
