use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

impl ServiceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Main,
    Addon,
    Upsell,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Addon => "addon",
            Self::Upsell => "upsell",
        }
    }
}

impl FromStr for ServiceCategory {
    type Err = ServiceValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(Self::Main),
            "addon" => Ok(Self::Addon),
            "upsell" => Ok(Self::Upsell),
            other => Err(ServiceValidationError::UnknownCategory(other.to_string())),
        }
    }
}

/// A priced offering in the admin-managed catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub description: Option<String>,
    pub category: ServiceCategory,
    pub per_sqft_price: Option<Decimal>,
    pub flat_fee: Option<Decimal>,
    pub use_both_pricing: bool,
    pub minimum_price: Option<Decimal>,
    pub is_active: bool,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn is_selectable(&self, name: &str, category: ServiceCategory) -> bool {
        self.is_active && self.category == category && self.name == name
    }
}

/// Looks up the active service with the given name inside one category.
pub fn find_active<'a>(
    services: &'a [Service],
    name: &str,
    category: ServiceCategory,
) -> Option<&'a Service> {
    services.iter().find(|service| service.is_selectable(name, category))
}

pub fn active_in_category(services: &[Service], category: ServiceCategory) -> Vec<&Service> {
    let mut matching: Vec<&Service> =
        services.iter().filter(|service| service.is_active && service.category == category).collect();
    matching.sort_by(|left, right| {
        left.display_order.cmp(&right.display_order).then_with(|| left.name.cmp(&right.name))
    });
    matching
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceValidationError {
    #[error("Service name is required")]
    MissingName,
    #[error("unsupported service category `{0}` (expected main|addon|upsell)")]
    UnknownCategory(String),
    #[error("{field} must not be negative")]
    NegativeAmount { field: &'static str },
    #[error("set either a per-square-foot price or a flat fee, or enable both pricing modes")]
    ConflictingPricingModes,
    #[error("a {category} service named `{name}` already exists")]
    DuplicateName { name: String, category: &'static str },
}

fn default_active() -> bool {
    true
}

/// Admin-supplied fields for creating or replacing a service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: ServiceCategory,
    #[serde(default)]
    pub per_sqft_price: Option<Decimal>,
    #[serde(default)]
    pub flat_fee: Option<Decimal>,
    #[serde(default)]
    pub use_both_pricing: bool,
    #[serde(default)]
    pub minimum_price: Option<Decimal>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl ServiceInput {
    /// Checks the input against the rest of the catalog. `editing` names the
    /// service being replaced so it does not collide with itself.
    pub fn validate(
        &self,
        catalog: &[Service],
        editing: Option<&ServiceId>,
    ) -> Result<(), ServiceValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ServiceValidationError::MissingName);
        }

        for (field, amount) in [
            ("per_sqft_price", self.per_sqft_price),
            ("flat_fee", self.flat_fee),
            ("minimum_price", self.minimum_price),
        ] {
            if amount.is_some_and(|value| value.is_sign_negative() && !value.is_zero()) {
                return Err(ServiceValidationError::NegativeAmount { field });
            }
        }

        if !self.use_both_pricing && self.per_sqft_price.is_some() && self.flat_fee.is_some() {
            return Err(ServiceValidationError::ConflictingPricingModes);
        }

        let duplicate = catalog.iter().any(|existing| {
            existing.category == self.category
                && existing.name.trim() == name
                && editing.map_or(true, |id| id != &existing.id)
        });
        if duplicate {
            return Err(ServiceValidationError::DuplicateName {
                name: name.to_string(),
                category: self.category.as_str(),
            });
        }

        Ok(())
    }

    pub fn into_service(
        self,
        id: ServiceId,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Service {
        Service {
            id,
            name: self.name.trim().to_string(),
            description: self.description.filter(|value| !value.trim().is_empty()),
            category: self.category,
            per_sqft_price: self.per_sqft_price,
            flat_fee: self.flat_fee,
            use_both_pricing: self.use_both_pricing,
            minimum_price: self.minimum_price,
            is_active: self.is_active,
            display_order: self.display_order,
            created_at,
            updated_at,
        }
    }
}

/// Names that appear more than once inside a category. Used by seeding and
/// doctor checks to flag catalogs that break name-based selection.
pub fn duplicate_names(services: &[Service]) -> Vec<(ServiceCategory, String)> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for service in services {
        let key = (service.category, service.name.clone());
        if !seen.insert(key.clone()) && !duplicates.contains(&key) {
            duplicates.push(key);
        }
    }
    duplicates
}
