//! Stripe Event Types
//!
//! Strongly-typed representations of the Stripe subscription webhook events the
//! reconciler consumes, and their conversion into [`BillingEvent`].

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::event::{BillingEvent, SubscriptionPayload, SubscriptionStatus};

/// Stripe event types we handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StripeEventType {
    /// `customer.subscription.created`, reconciled like an update
    #[serde(rename = "customer.subscription.created")]
    SubscriptionCreated,
    /// `customer.subscription.updated`
    #[serde(rename = "customer.subscription.updated")]
    SubscriptionUpdated,
    /// `customer.subscription.deleted`, triggers re-provisioning
    #[serde(rename = "customer.subscription.deleted")]
    SubscriptionDeleted,
    /// Any other event type; acknowledged and ignored
    #[serde(other)]
    Unknown,
}

impl From<&str> for StripeEventType {
    fn from(s: &str) -> Self {
        match s {
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            _ => Self::Unknown,
        }
    }
}

impl StripeEventType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::Unknown => "unknown",
        }
    }

    /// Check if this is a known event type
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Generic Stripe event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    /// Unique identifier for the event
    pub id: String,

    /// Type of event
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time of event creation (Unix timestamp)
    #[serde(default)]
    pub created: i64,

    /// API version used to render data
    #[serde(default)]
    pub api_version: Option<String>,

    /// Whether this is a live mode event
    #[serde(default)]
    pub livemode: bool,

    /// Object containing event data
    pub data: EventData,
}

impl StripeEvent {
    /// Parse from raw JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReconcileError> {
        serde_json::from_slice(bytes).map_err(|e| ReconcileError::InvalidPayload(e.to_string()))
    }

    /// Get the typed event type
    pub fn typed_event_type(&self) -> StripeEventType {
        StripeEventType::from(self.event_type.as_str())
    }

    /// Convert into the provider-neutral event
    ///
    /// `created` and `updated` both carry the full subscription and map to
    /// [`BillingEvent::SubscriptionUpdated`].
    pub fn to_billing_event(&self) -> Result<BillingEvent, ReconcileError> {
        match self.typed_event_type() {
            StripeEventType::SubscriptionCreated | StripeEventType::SubscriptionUpdated => {
                let subscription = self.subscription()?;
                let customer_id = non_empty(&subscription.customer, "customer")?;
                Ok(BillingEvent::SubscriptionUpdated {
                    event_id: self.id.clone(),
                    customer_id,
                    payload: subscription.payload()?,
                })
            }
            StripeEventType::SubscriptionDeleted => {
                let reference: SubscriptionRef = serde_json::from_value(self.data.object.clone())
                    .map_err(|e| ReconcileError::InvalidPayload(e.to_string()))?;
                Ok(BillingEvent::SubscriptionDeleted {
                    event_id: self.id.clone(),
                    customer_id: non_empty(&reference.customer, "customer")?,
                })
            }
            StripeEventType::Unknown => Ok(BillingEvent::Unhandled {
                event_id: self.id.clone(),
                event_type: self.event_type.clone(),
            }),
        }
    }

    /// Extract the subscription object from event data
    pub fn subscription(&self) -> Result<Subscription, ReconcileError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| ReconcileError::InvalidPayload(e.to_string()))
    }
}

fn non_empty(value: &str, field: &str) -> Result<String, ReconcileError> {
    if value.trim().is_empty() {
        return Err(ReconcileError::InvalidPayload(format!("{field} is empty")));
    }
    Ok(value.to_string())
}

/// Event data container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The actual event object
    pub object: serde_json::Value,

    /// Previous values for updated fields (only in *.updated events)
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

// =============================================================================
// Subscription Types
// =============================================================================

/// Minimal view of a subscription, enough to locate the account
#[derive(Debug, Clone, Deserialize)]
struct SubscriptionRef {
    customer: String,
}

/// Stripe subscription object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID (sub_...)
    #[serde(default)]
    pub id: Option<String>,
    /// Customer ID (cus_...)
    pub customer: String,
    /// Subscription status
    pub status: SubscriptionStatus,
    /// Current billing period end (Unix timestamp)
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Legacy single-plan field
    #[serde(default)]
    pub plan: Option<Plan>,
    /// Subscription-level quantity (legacy single-plan subscriptions)
    #[serde(default)]
    pub quantity: Option<Quantity>,
    /// Subscription items (plans/prices)
    #[serde(default)]
    pub items: Option<SubscriptionItems>,
}

impl Subscription {
    /// Flatten into the payload the engine consumes
    ///
    /// The legacy `plan` field wins over the first subscription item.
    pub fn payload(&self) -> Result<SubscriptionPayload, ReconcileError> {
        let item = self.items.as_ref().and_then(|items| items.data.first());

        let (price_id, product_id, plan_meta) = match (&self.plan, item) {
            (Some(plan), _) => (
                plan.id.clone(),
                plan.product.clone(),
                plan.nickname.clone().or_else(|| plan.name.clone()),
            ),
            (None, Some(item)) => (
                item.price.id.clone(),
                item.price.product.clone(),
                item.price.nickname.clone(),
            ),
            (None, None) => {
                return Err(ReconcileError::InvalidPayload(
                    "subscription has neither plan nor items".to_string(),
                ))
            }
        };

        let quantity = match (&self.quantity, item) {
            (Some(quantity), _) => quantity.value()?,
            (None, Some(item)) => item.quantity.as_ref().map_or(Ok(1), Quantity::value)?,
            (None, None) => 1,
        };

        let period_end = self
            .current_period_end
            .or_else(|| item.and_then(|item| item.current_period_end))
            .ok_or_else(|| {
                ReconcileError::InvalidPayload("current_period_end is missing".to_string())
            })?;

        Ok(SubscriptionPayload {
            product_id: non_empty(&product_id, "product")?,
            price_id: non_empty(&price_id, "price")?,
            quantity,
            status: self.status,
            period_end,
            plan_meta,
        })
    }
}

/// Legacy plan object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan (price) ID
    pub id: String,
    /// Product ID
    pub product: String,
    /// Display nickname
    #[serde(default)]
    pub nickname: Option<String>,
    /// Older API versions expose a name
    #[serde(default)]
    pub name: Option<String>,
}

/// Quantity as sent on the wire; older payloads encode it as a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    /// JSON number
    Number(u64),
    /// Decimal string, e.g. `"10"`
    Text(String),
}

impl Quantity {
    /// Numeric value
    pub fn value(&self) -> Result<u32, ReconcileError> {
        let parsed = match self {
            Self::Number(n) => u32::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse::<u32>().ok(),
        };
        parsed.ok_or_else(|| ReconcileError::InvalidPayload(format!("invalid quantity {self:?}")))
    }
}

/// Subscription items container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionItems {
    /// List of subscription items
    pub data: Vec<SubscriptionItem>,
}

/// Individual subscription item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionItem {
    /// Item ID
    #[serde(default)]
    pub id: Option<String>,
    /// Price object
    pub price: Price,
    /// Quantity
    #[serde(default)]
    pub quantity: Option<Quantity>,
    /// Newer API versions report the period on the item
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// Price object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    /// Price ID
    pub id: String,
    /// Product ID
    pub product: String,
    /// Display nickname
    #[serde(default)]
    pub nickname: Option<String>,
}
