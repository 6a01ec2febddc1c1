//! Stripe integration
//!
//! - [`events`]: parses webhook event JSON into [`crate::event::BillingEvent`]
//! - [`client`]: REST client implementing [`crate::provider::BillingProvider`]
//!
//! Signature verification and delivery deduplication happen upstream; events
//! arriving here are already authenticated.
//!
//! # Example
//!
//! ```rust
//! use billing_reconciler::event::BillingEvent;
//! use billing_reconciler::stripe::StripeEvent;
//!
//! let raw = br#"{
//!     "id": "evt_1",
//!     "type": "customer.subscription.deleted",
//!     "data": {"object": {"customer": "cus_123", "status": "canceled"}}
//! }"#;
//!
//! let event = StripeEvent::from_bytes(raw).unwrap();
//! assert!(matches!(
//!     event.to_billing_event().unwrap(),
//!     BillingEvent::SubscriptionDeleted { ref customer_id, .. } if customer_id == "cus_123"
//! ));
//! ```

pub mod client;
pub mod events;

pub use client::StripeClient;
pub use events::{StripeEvent, StripeEventType, Subscription};
