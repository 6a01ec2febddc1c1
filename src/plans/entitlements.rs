//! Feature entitlement gate
//!
//! Entitlements derive solely from the current plan. A resync always produces
//! a value for every known feature, so flags a plan does not grant are written
//! as `false` rather than left at whatever they were before.

use std::collections::BTreeMap;

use crate::plans::catalog::{PlanCatalog, PlanDefinition};

/// Feature name to enabled flag
pub type FeatureFlags = BTreeMap<String, bool>;

/// Check if a plan grants a feature
pub fn is_enabled(plan: &PlanDefinition, feature: &str) -> bool {
    plan.enabled_features.contains(feature)
}

/// Full flag set for a plan, total over the catalog's known features
pub fn entitlements(catalog: &PlanCatalog, plan: &PlanDefinition) -> FeatureFlags {
    catalog
        .known_features()
        .iter()
        .chain(plan.enabled_features.iter())
        .map(|feature| (feature.clone(), is_enabled(plan, feature)))
        .collect()
}

/// A single flag that differs between two flag sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    /// Feature name
    pub feature: String,
    /// Previous value, `None` when the flag was never set
    pub from: Option<bool>,
    /// New value
    pub to: bool,
}

/// Flags whose value changes when moving from `current` to `target`
pub fn diff(current: &FeatureFlags, target: &FeatureFlags) -> Vec<FlagChange> {
    target
        .iter()
        .filter(|(feature, to)| current.get(*feature) != Some(*to))
        .map(|(feature, to)| FlagChange {
            feature: feature.clone(),
            from: current.get(feature).copied(),
            to: *to,
        })
        .collect()
}
