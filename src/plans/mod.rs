//! Plan catalog, resolution and feature entitlements

pub mod catalog;
pub mod entitlements;

pub use catalog::{PlanCatalog, PlanDefinition};
pub use entitlements::{diff, entitlements, is_enabled, FeatureFlags, FlagChange};
