//! Plan catalog and resolver
//!
//! The catalog is an ordered list of [`PlanDefinition`]s loaded from JSON.
//! Resolution scans in configured order and the first plan listing the product
//! id wins; anything unmatched falls back to the default plan.
//!
//! Two document shapes are accepted:
//!
//! ```json
//! [
//!   { "name": "Hacker", "product_id": ["plan_id"], "price_ids": ["price_1"], "default": true },
//!   { "name": "Startups", "product_id": ["plan_id_2"], "price_ids": ["price_2"],
//!     "features": ["help_center", "channel_email"] }
//! ]
//! ```
//!
//! or an object with an explicit feature list, for features no plan enables:
//!
//! ```json
//! { "features": ["campaigns"], "plans": [ ... ] }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// A purchasable tier: provider identifiers plus entitled features
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Internal plan name
    pub name: String,
    /// Provider product ids that map to this plan
    #[serde(default)]
    pub product_ids: BTreeSet<String>,
    /// Provider price ids, in configured order
    #[serde(default)]
    pub price_ids: Vec<String>,
    /// Features this plan enables
    #[serde(default)]
    pub enabled_features: BTreeSet<String>,
}

impl PlanDefinition {
    /// Create a plan with no products, prices or features
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            product_ids: BTreeSet::new(),
            price_ids: Vec::new(),
            enabled_features: BTreeSet::new(),
        }
    }

    /// Add a provider product id
    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_ids.insert(product_id.into());
        self
    }

    /// Add a provider price id
    pub fn with_price(mut self, price_id: impl Into<String>) -> Self {
        self.price_ids.push(price_id.into());
        self
    }

    /// Enable features
    pub fn with_features<I, F>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.enabled_features
            .extend(features.into_iter().map(Into::into));
        self
    }

    /// Check if this plan is sold under the product id
    pub fn matches_product(&self, product_id: &str) -> bool {
        self.product_ids.contains(product_id)
    }

    /// Price used when starting a subscription on this plan
    pub fn primary_price_id(&self) -> Option<&str> {
        self.price_ids.first().map(String::as_str)
    }
}

/// Catalog entry as written in configuration
#[derive(Debug, Deserialize)]
struct PlanEntry {
    name: String,
    #[serde(default, alias = "product_id")]
    product_ids: BTreeSet<String>,
    #[serde(default)]
    price_ids: Vec<String>,
    #[serde(default, alias = "features")]
    enabled_features: BTreeSet<String>,
    #[serde(default)]
    default: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Plans(Vec<PlanEntry>),
    WithFeatures {
        #[serde(default)]
        features: BTreeSet<String>,
        plans: Vec<PlanEntry>,
    },
}

/// Ordered, validated plan catalog
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<PlanDefinition>,
    default_index: usize,
    known_features: BTreeSet<String>,
}

impl PlanCatalog {
    /// Build a catalog from plans in resolution order
    ///
    /// `default_plan` names the fallback plan; when `None`, the first plan is
    /// the default.
    pub fn new(
        plans: Vec<PlanDefinition>,
        default_plan: Option<&str>,
    ) -> Result<Self, CatalogError> {
        if plans.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for plan in &plans {
            if !seen.insert(plan.name.as_str()) {
                return Err(CatalogError::DuplicatePlan(plan.name.clone()));
            }
        }

        let default_index = match default_plan {
            Some(name) => plans
                .iter()
                .position(|plan| plan.name == name)
                .ok_or_else(|| CatalogError::UnknownDefault(name.to_string()))?,
            None => 0,
        };

        let known_features = plans
            .iter()
            .flat_map(|plan| plan.enabled_features.iter().cloned())
            .collect();

        Ok(Self {
            plans,
            default_index,
            known_features,
        })
    }

    /// Register features that exist even though no plan enables them
    ///
    /// Such features are forced off for every account on resync.
    pub fn with_features<I, F>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.known_features
            .extend(features.into_iter().map(Into::into));
        self
    }

    /// Parse a catalog document
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let (entries, features) = match serde_json::from_str::<CatalogDocument>(json)? {
            CatalogDocument::Plans(plans) => (plans, BTreeSet::new()),
            CatalogDocument::WithFeatures { features, plans } => (plans, features),
        };

        let mut default_name: Option<String> = None;
        let mut plans = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.default {
                if let Some(first) = &default_name {
                    return Err(CatalogError::MultipleDefaults {
                        first: first.clone(),
                        second: entry.name,
                    });
                }
                default_name = Some(entry.name.clone());
            }
            plans.push(PlanDefinition {
                name: entry.name,
                product_ids: entry.product_ids,
                price_ids: entry.price_ids,
                enabled_features: entry.enabled_features,
            });
        }

        Ok(Self::new(plans, default_name.as_deref())?.with_features(features))
    }

    /// Load a catalog document from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Resolve the plan for a provider product id
    ///
    /// First match in catalog order wins; no match yields the default plan.
    pub fn resolve(&self, product_id: &str) -> &PlanDefinition {
        self.plans
            .iter()
            .find(|plan| plan.matches_product(product_id))
            .unwrap_or_else(|| self.default_plan())
    }

    /// The fallback plan
    pub fn default_plan(&self) -> &PlanDefinition {
        &self.plans[self.default_index]
    }

    /// Check if the plan is the catalog's default
    pub fn is_default(&self, plan: &PlanDefinition) -> bool {
        self.default_plan().name == plan.name
    }

    /// Look up a plan by internal name
    pub fn by_name(&self, name: &str) -> Option<&PlanDefinition> {
        self.plans.iter().find(|plan| plan.name == name)
    }

    /// Plans in resolution order
    pub fn plans(&self) -> &[PlanDefinition] {
        &self.plans
    }

    /// Every feature the system knows about
    pub fn known_features(&self) -> &BTreeSet<String> {
        &self.known_features
    }
}
