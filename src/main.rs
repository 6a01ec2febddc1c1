//! Billing Reconciler CLI
//!
//! Replays Stripe subscription events against a seeded account set and
//! inspects plan resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use billing_reconciler::metrics::{MetricsFacadeSink, ObservabilitySink, ReconcileMetrics};
use billing_reconciler::plans::{self, PlanCatalog};
use billing_reconciler::provider::{BillingProvider, UnconfiguredProvider};
use billing_reconciler::reconcile::{
    CustomerRecreation, Delivery, EngineOptions, EventProcessor, ReconciliationEngine,
};
use billing_reconciler::store::{Account, InMemoryAccountStore};
use billing_reconciler::stripe::{StripeClient, StripeEvent};
use billing_reconciler::ReconcilerConfig;

/// Billing Reconciler
#[derive(Parser, Debug)]
#[command(name = "billing-reconciler")]
#[command(version)]
#[command(about = "Reconcile subscription events into account billing state")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed newline-delimited Stripe events through the engine and print the accounts
    Replay {
        /// Plan catalog JSON (falls back to BILLING_PLANS_PATH / BILLING_PLANS)
        #[arg(long)]
        plans: Option<PathBuf>,

        /// JSON array of accounts to seed the store with
        #[arg(long)]
        accounts: PathBuf,

        /// Newline-delimited Stripe event JSON
        #[arg(long)]
        events: PathBuf,

        /// Skip updates older than the stored subscription period
        #[arg(long)]
        reject_stale: bool,

        /// Print collected metrics in Prometheus text format to stderr
        #[arg(long)]
        metrics: bool,
    },
    /// Print the plan a product id resolves to, with its feature flags
    Resolve {
        /// Plan catalog JSON (falls back to BILLING_PLANS_PATH / BILLING_PLANS)
        #[arg(long)]
        plans: Option<PathBuf>,

        /// Provider product id
        product_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = ReconcilerConfig::from_env().context("invalid BILLING_* configuration")?;

    match args.command {
        Command::Resolve { plans, product_id } => {
            if plans.is_some() {
                config.plans_path = plans;
            }
            let catalog = config.load_catalog().context("failed to load plan catalog")?;
            resolve(&catalog, &product_id)
        }
        Command::Replay {
            plans,
            accounts,
            events,
            reject_stale,
            metrics,
        } => {
            if plans.is_some() {
                config.plans_path = plans;
            }
            config.reject_stale_events |= reject_stale;

            match config.stripe_api_key.clone() {
                Some(api_key) => {
                    let client = StripeClient::new(
                        api_key,
                        config.stripe_api_base.clone(),
                        config.provider_timeout,
                    )?;
                    replay(config, Arc::new(client), &accounts, &events, metrics).await
                }
                None => {
                    tracing::warn!("BILLING_STRIPE_API_KEY not set, deletions cannot re-provision");
                    replay(config, Arc::new(UnconfiguredProvider), &accounts, &events, metrics)
                        .await
                }
            }
        }
    }
}

fn resolve(catalog: &PlanCatalog, product_id: &str) -> Result<()> {
    let plan = catalog.resolve(product_id);
    let output = serde_json::json!({
        "product_id": product_id,
        "plan": plan.name,
        "default": catalog.is_default(plan),
        "feature_flags": plans::entitlements(catalog, plan),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn replay<P: BillingProvider>(
    config: ReconcilerConfig,
    provider: Arc<P>,
    accounts_path: &Path,
    events_path: &Path,
    print_metrics: bool,
) -> Result<()> {
    let catalog = config.load_catalog().context("failed to load plan catalog")?;

    let accounts: Vec<Account> = serde_json::from_str(
        &std::fs::read_to_string(accounts_path)
            .with_context(|| format!("failed to read {}", accounts_path.display()))?,
    )
    .context("accounts file must be a JSON array of accounts")?;
    let store = Arc::new(InMemoryAccountStore::with_accounts(accounts));

    let collector = Arc::new(ReconcileMetrics::new());
    let sink: Arc<dyn ObservabilitySink> = if print_metrics {
        collector.clone() as Arc<dyn ObservabilitySink>
    } else {
        Arc::new(MetricsFacadeSink::default())
    };

    let recreation = CustomerRecreation::new(
        store.clone(),
        provider,
        config.provider_timeout,
        config.default_subscription_quantity,
    );
    let engine = ReconciliationEngine::new(store.clone(), catalog, recreation)
        .with_sink(sink)
        .with_options(EngineOptions {
            reject_stale_events: config.reject_stale_events,
        });
    let (processor, _handle) = EventProcessor::new(Arc::new(engine), config);

    let raw = std::fs::read_to_string(events_path)
        .with_context(|| format!("failed to read {}", events_path.display()))?;

    // Sequential replay keeps delivery order
    for (line_no, line) in raw.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let event = match StripeEvent::from_bytes(line.as_bytes())
            .and_then(|event| event.to_billing_event())
        {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(line = line_no + 1, error = %e, "Skipping malformed event");
                continue;
            }
        };

        match processor.process_event_sync(&event).await {
            Ok(Delivery::Completed(outcome)) => {
                tracing::info!(event_id = %event.event_id(), outcome = ?outcome, "Event applied");
            }
            Ok(Delivery::Acknowledged(reason)) => {
                tracing::info!(event_id = %event.event_id(), reason = %reason, "Event acknowledged");
            }
            Err(e) => {
                tracing::error!(event_id = %event.event_id(), error = %e, "Event failed");
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&store.accounts())?);
    if print_metrics {
        eprint!("{}", collector.to_prometheus_format());
    }
    Ok(())
}
