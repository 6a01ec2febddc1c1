//! Reconciler configuration
//!
//! Values come from `BILLING_*` environment variables. The plan catalog is
//! read from `BILLING_PLANS_PATH` or, failing that, inline JSON in
//! `BILLING_PLANS`.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BILLING_PLANS_PATH` | unset |
//! | `BILLING_PLANS` | unset |
//! | `BILLING_STRIPE_API_KEY` | unset (provider disabled) |
//! | `BILLING_STRIPE_API_BASE` | `https://api.stripe.com` |
//! | `BILLING_PROVIDER_TIMEOUT_MS` | `10000` |
//! | `BILLING_DEFAULT_QUANTITY` | `2` |
//! | `BILLING_MAX_RETRIES` | `3` |
//! | `BILLING_RETRY_BASE_MS` | `500` |
//! | `BILLING_RETRY_MAX_MS` | `30000` |
//! | `BILLING_PROCESSING_TIMEOUT_MS` | `30000` |
//! | `BILLING_QUEUE_CAPACITY` | `1000` |
//! | `BILLING_REJECT_STALE_EVENTS` | `false` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::plans::PlanCatalog;
use crate::stripe::client::DEFAULT_API_BASE;

/// Runtime configuration for the engine, processor and provider client
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Path to the plan catalog JSON document
    pub plans_path: Option<PathBuf>,
    /// Inline plan catalog JSON, used when no path is set
    pub plans_json: Option<String>,
    /// Stripe secret key; `None` disables the provider client
    pub stripe_api_key: Option<String>,
    /// Stripe API base URL
    pub stripe_api_base: Url,
    /// Upper bound on a single provider call
    pub provider_timeout: Duration,
    /// Seats on the default-plan subscription started after a deletion
    pub default_subscription_quantity: u32,
    /// Retries after the first attempt for retryable failures
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt
    pub base_retry_delay: Duration,
    /// Cap on the retry delay
    pub max_retry_delay: Duration,
    /// Upper bound on processing one event
    pub processing_timeout: Duration,
    /// Capacity of the processor queue
    pub queue_capacity: usize,
    /// Skip updates whose period end is older than the stored one
    pub reject_stale_events: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            plans_path: None,
            plans_json: None,
            stripe_api_key: None,
            stripe_api_base: Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL"),
            provider_timeout: Duration::from_secs(10),
            default_subscription_quantity: 2,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(30),
            queue_capacity: 1000,
            reject_stale_events: false,
        }
    }
}

impl ReconcilerConfig {
    /// Load from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Ok(Self {
            plans_path: get("BILLING_PLANS_PATH").map(PathBuf::from),
            plans_json: get("BILLING_PLANS"),
            stripe_api_key: get("BILLING_STRIPE_API_KEY"),
            stripe_api_base: match get("BILLING_STRIPE_API_BASE") {
                Some(raw) => Url::parse(&raw)?,
                None => defaults.stripe_api_base,
            },
            provider_timeout: millis(&get, "BILLING_PROVIDER_TIMEOUT_MS")?
                .unwrap_or(defaults.provider_timeout),
            default_subscription_quantity: parse(&get, "BILLING_DEFAULT_QUANTITY")?
                .unwrap_or(defaults.default_subscription_quantity),
            max_retries: parse(&get, "BILLING_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            base_retry_delay: millis(&get, "BILLING_RETRY_BASE_MS")?
                .unwrap_or(defaults.base_retry_delay),
            max_retry_delay: millis(&get, "BILLING_RETRY_MAX_MS")?
                .unwrap_or(defaults.max_retry_delay),
            processing_timeout: millis(&get, "BILLING_PROCESSING_TIMEOUT_MS")?
                .unwrap_or(defaults.processing_timeout),
            queue_capacity: parse(&get, "BILLING_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            reject_stale_events: parse(&get, "BILLING_REJECT_STALE_EVENTS")?
                .unwrap_or(defaults.reject_stale_events),
        })
    }

    /// Fast timings for tests
    pub fn test_config() -> Self {
        Self {
            provider_timeout: Duration::from_millis(200),
            max_retries: 2,
            base_retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_millis(20),
            processing_timeout: Duration::from_secs(2),
            queue_capacity: 16,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (zero-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }

    /// Load the configured plan catalog
    pub fn load_catalog(&self) -> Result<PlanCatalog, ConfigError> {
        match (&self.plans_path, &self.plans_json) {
            (Some(path), _) => Ok(PlanCatalog::from_path(path)?),
            (None, Some(json)) => Ok(PlanCatalog::from_json(json)?),
            (None, None) => Err(ConfigError::MissingCatalog),
        }
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    get(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(get, name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.default_subscription_quantity, 2);
        assert_eq!(config.stripe_api_base.as_str(), "https://api.stripe.com/");
        assert!(config.stripe_api_key.is_none());
        assert!(!config.reject_stale_events);
    }

    #[test]
    fn test_overrides() {
        let config = ReconcilerConfig::from_lookup(lookup(&[
            ("BILLING_STRIPE_API_KEY", "sk_test_1"),
            ("BILLING_PROVIDER_TIMEOUT_MS", "1500"),
            ("BILLING_MAX_RETRIES", "5"),
            ("BILLING_REJECT_STALE_EVENTS", "true"),
            ("BILLING_QUEUE_CAPACITY", "  "),
        ]))
        .unwrap();

        assert_eq!(config.stripe_api_key.as_deref(), Some("sk_test_1"));
        assert_eq!(config.provider_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_retries, 5);
        assert!(config.reject_stale_events);
        assert_eq!(config.queue_capacity, 1000);
    }

    #[test]
    fn test_invalid_values() {
        let err = ReconcilerConfig::from_lookup(lookup(&[("BILLING_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name, .. } if name == "BILLING_MAX_RETRIES"));

        let err = ReconcilerConfig::from_lookup(lookup(&[("BILLING_STRIPE_API_BASE", "::")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }

    #[test]
    fn test_retry_delay_backoff() {
        let config = ReconcilerConfig {
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(350),
            ..ReconcilerConfig::default()
        };
        assert_eq!(config.retry_delay(0), Duration::from_millis(100));
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(2), Duration::from_millis(350));
        assert_eq!(config.retry_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_load_inline_catalog() {
        let config = ReconcilerConfig::from_lookup(lookup(&[(
            "BILLING_PLANS",
            r#"[{"name": "Hacker", "product_id": ["plan_id"]}]"#,
        )]))
        .unwrap();
        let catalog = config.load_catalog().unwrap();
        assert_eq!(catalog.resolve("plan_id").name, "Hacker");

        assert!(matches!(
            ReconcilerConfig::default().load_catalog(),
            Err(ConfigError::MissingCatalog)
        ));
    }
}
