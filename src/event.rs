//! Provider-neutral billing events
//!
//! The reconciliation engine only understands [`BillingEvent`]. Provider
//! adapters (see [`crate::stripe`]) parse their own wire format and convert it
//! into this closed set of variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// A subscription lifecycle event, already authenticated and parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// The subscription was created or changed
    SubscriptionUpdated {
        /// Provider event id
        event_id: String,
        /// Provider customer id, the join key to the account
        customer_id: String,
        /// Subscription attributes
        payload: SubscriptionPayload,
    },
    /// The subscription was deleted
    SubscriptionDeleted {
        /// Provider event id
        event_id: String,
        /// Provider customer id
        customer_id: String,
    },
    /// An event type this engine does not act on
    Unhandled {
        /// Provider event id
        event_id: String,
        /// Raw provider event type
        event_type: String,
    },
}

impl BillingEvent {
    /// Provider event id
    pub fn event_id(&self) -> &str {
        match self {
            Self::SubscriptionUpdated { event_id, .. }
            | Self::SubscriptionDeleted { event_id, .. }
            | Self::Unhandled { event_id, .. } => event_id,
        }
    }

    /// Short name used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscriptionUpdated { .. } => "subscription_updated",
            Self::SubscriptionDeleted { .. } => "subscription_deleted",
            Self::Unhandled { .. } => "unhandled",
        }
    }
}

/// Subscription attributes carried by an update event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    /// Provider product id, used to resolve the plan
    pub product_id: String,
    /// Provider price id
    pub price_id: String,
    /// Subscribed seat quantity
    pub quantity: u32,
    /// Provider subscription status
    pub status: SubscriptionStatus,
    /// End of the current billing period (Unix seconds)
    pub period_end: i64,
    /// Provider-side plan nickname, informational only
    pub plan_meta: Option<String>,
}

impl SubscriptionPayload {
    /// Period end as a UTC timestamp
    pub fn period_end_at(&self) -> Result<DateTime<Utc>, ReconcileError> {
        DateTime::<Utc>::from_timestamp(self.period_end, 0).ok_or_else(|| {
            ReconcileError::InvalidPayload(format!(
                "period_end {} is out of range",
                self.period_end
            ))
        })
    }
}

/// Subscription status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid and current
    Active,
    /// Latest invoice failed, provider is retrying
    PastDue,
    /// Retries exhausted, invoice left open
    Unpaid,
    /// Ended
    Canceled,
    /// First payment not completed yet
    Incomplete,
    /// First payment never completed
    IncompleteExpired,
    /// In a trial period
    Trialing,
    /// Collection paused
    Paused,
    /// Any status this crate does not know
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Check if subscription requires payment attention
    pub fn requires_payment_action(&self) -> bool {
        matches!(self, Self::PastDue | Self::Unpaid | Self::Incomplete)
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
