//! Billing Reconciler - Subscription Event Reconciliation Engine
//!
//! This crate keeps an account's billing state and feature entitlements in
//! agreement with subscription events coming from a billing provider.
//!
//! # Features
//!
//! - **Plan Catalog**: configured plans keyed by provider product ids, with a default plan
//! - **Reconciliation**: full snapshot replacement and feature resync per update
//! - **Re-provisioning**: a fresh default customer after a subscription is deleted
//! - **Processing**: queued, timed, retried event handling
//!
//! # Architecture
//!
//! ```text
//! Stripe Event ──▶ BillingEvent ──▶ EventProcessor ──▶ ReconciliationEngine
//!                                                           │
//!                                   ┌───────────────────────┼──────────────────┐
//!                                   ▼                       ▼                  ▼
//!                             ┌───────────┐          ┌──────────────┐   ┌─────────────┐
//!                             │PlanCatalog│          │ AccountStore │   │  Provider   │
//!                             └───────────┘          └──────────────┘   └─────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use billing_reconciler::plans::{PlanCatalog, PlanDefinition};
//! use billing_reconciler::provider::UnconfiguredProvider;
//! use billing_reconciler::reconcile::{CustomerRecreation, ReconciliationEngine};
//! use billing_reconciler::store::{Account, InMemoryAccountStore};
//! use billing_reconciler::stripe::StripeEvent;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = PlanCatalog::new(
//!         vec![
//!             PlanDefinition::new("Hacker").with_product("prod_free"),
//!             PlanDefinition::new("Startups")
//!                 .with_product("prod_paid")
//!                 .with_features(["help_center"]),
//!         ],
//!         None,
//!     )?;
//!
//!     let store = Arc::new(InMemoryAccountStore::new());
//!     store.insert(Account::new("Acme").with_customer_id("cus_123"));
//!
//!     let recreation = CustomerRecreation::new(
//!         store.clone(),
//!         Arc::new(UnconfiguredProvider),
//!         Duration::from_secs(10),
//!         2,
//!     );
//!     let engine = ReconciliationEngine::new(store, catalog, recreation);
//!
//!     let event = StripeEvent::from_bytes(&std::fs::read("event.json")?)?;
//!     let outcome = engine.handle(&event.to_billing_event()?).await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod plans;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod stripe;

// Re-exports for convenience
pub use config::ReconcilerConfig;
pub use error::{Disposition, Error, ReconcileError, Result};
pub use event::{BillingEvent, SubscriptionPayload, SubscriptionStatus};
pub use metrics::{ObservabilitySink, ReconcileMetrics};
pub use plans::{PlanCatalog, PlanDefinition};
pub use reconcile::{EventProcessor, Outcome, ReconciliationEngine};
pub use store::{Account, AccountId, AccountStore, InMemoryAccountStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
