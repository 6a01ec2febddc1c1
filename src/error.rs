//! Error types for the billing reconciler
//!
//! This module provides the error hierarchy using `thiserror`. Each concern
//! (reconciliation, plan catalog, configuration, storage, provider) has its own
//! enum, and the crate-level [`Error`] wraps them all for the binary edge.

use thiserror::Error;

/// The main error type for billing reconciler operations
#[derive(Error, Debug)]
pub enum Error {
    /// Reconciliation errors
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Plan catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Account store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Billing provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The background processor stopped accepting events
    #[error("Event queue closed: {0}")]
    QueueClosed(String),
}

/// How the delivery layer should treat a failed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Treat the event as handled; the provider must not redeliver it
    Acknowledge,
    /// Transient failure; retry with backoff
    Retry,
    /// Permanently bad input; drop without retrying
    Reject,
}

/// Errors surfaced by the reconciliation engine
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// No account owns the event's customer id
    #[error("No account owns customer {0}")]
    UnknownCustomer(String),

    /// The billing provider call failed or timed out
    #[error("Billing provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Event fields are missing or malformed
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The account store rejected the write
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ReconcileError {
    /// Map the error to a delivery disposition
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::UnknownCustomer(_) => Disposition::Acknowledge,
            Self::ProviderUnavailable(_) | Self::Storage(_) => Disposition::Retry,
            Self::InvalidPayload(_) => Disposition::Reject,
        }
    }

    /// Check if the caller should retry
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    /// Short machine-readable name, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownCustomer(_) => "unknown_customer",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<ProviderError> for ReconcileError {
    fn from(err: ProviderError) -> Self {
        Self::ProviderUnavailable(err.to_string())
    }
}

/// Plan catalog loading and validation errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog has no plans
    #[error("Plan catalog is empty")]
    Empty,

    /// Two plans share a name
    #[error("Duplicate plan name: {0}")]
    DuplicatePlan(String),

    /// More than one plan is flagged as the default
    #[error("Multiple default plans: {first} and {second}")]
    MultipleDefaults {
        /// First plan flagged as default
        first: String,
        /// Second plan flagged as default
        second: String,
    },

    /// The named default plan does not exist
    #[error("Default plan not found: {0}")]
    UnknownDefault(String),

    /// Catalog file could not be read
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog document is not valid JSON
    #[error("Failed to parse catalog: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment value could not be parsed
    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
    },

    /// Neither a catalog path nor inline catalog JSON was configured
    #[error("No plan catalog configured (set BILLING_PLANS_PATH or BILLING_PLANS)")]
    MissingCatalog,

    /// Provider base URL is not a valid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The configured catalog failed to load
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Account store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// The account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// The account has no subscription snapshot yet
    #[error("Account {0} has no subscription")]
    NoSubscription(String),

    /// Another account already owns the customer id
    #[error("Customer {customer_id} already belongs to account {owner}")]
    CustomerIdTaken {
        /// Customer id being assigned
        customer_id: String,
        /// Account that owns it
        owner: String,
    },

    /// Backend failure
    #[error("Store backend failure: {0}")]
    Backend(String),
}

/// Billing provider client errors
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider returned an error response
    #[error("Provider returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the provider
        message: String,
    },

    /// No provider client is configured
    #[error("Billing provider is not configured")]
    NotConfigured,
}

/// Result type alias for billing reconciler operations
pub type Result<T> = std::result::Result<T, Error>;
