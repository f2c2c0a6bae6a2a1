use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_BUSINESS_NAME: &str = "Window Cleaning Service";
pub const DEFAULT_BUSINESS_PHONE: &str = "(555) 123-4567";
pub const DEFAULT_BUSINESS_EMAIL: &str = "info@windowcleaning.com";
pub const DEFAULT_SERVICE_RADIUS_MILES: i64 = 20;
pub const DEFAULT_DISCOUNT_PERCENTAGE: u32 = 15;
pub const MAX_DISCOUNT_PERCENTAGE: u32 = 50;
pub const DEFAULT_OUTSIDE_AREA_MESSAGE: &str = "We're sorry, but your location is outside our typical service area. Please provide your contact information below and we'll call you to see if we can make an exception for your location.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Actual,
    VisualOnly,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Actual => "actual",
            Self::VisualOnly => "visual_only",
        }
    }
}

impl FromStr for DiscountType {
    type Err = SettingsValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "actual" => Ok(Self::Actual),
            "visual_only" => Ok(Self::VisualOnly),
            _ => Err(SettingsValidationError::DiscountType),
        }
    }
}

/// Business-wide configuration. There is exactly one of these per deployment;
/// the repository layer owns how it is keyed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub business_name: String,
    pub business_address: Option<String>,
    pub business_phone: Option<String>,
    pub business_email: Option<String>,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub form_title: Option<String>,
    pub form_subtitle: Option<String>,
    pub notification_emails: Vec<String>,
    pub business_email_template: Option<String>,
    pub customer_email_template: Option<String>,
    pub discount_enabled: bool,
    pub discount_percentage: u32,
    pub discount_type: DiscountType,
    pub post_construction_markup_percentage: Decimal,
    pub service_radius_miles: Decimal,
    pub outside_area_message: Option<String>,
    pub story_multipliers: BTreeMap<String, Decimal>,
    pub story_flat_fees: BTreeMap<String, Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            business_name: DEFAULT_BUSINESS_NAME.to_string(),
            business_address: None,
            business_phone: None,
            business_email: None,
            logo_url: None,
            primary_color: None,
            secondary_color: None,
            form_title: None,
            form_subtitle: None,
            notification_emails: Vec::new(),
            business_email_template: None,
            customer_email_template: None,
            discount_enabled: false,
            discount_percentage: DEFAULT_DISCOUNT_PERCENTAGE,
            discount_type: DiscountType::VisualOnly,
            post_construction_markup_percentage: Decimal::ZERO,
            service_radius_miles: Decimal::from(DEFAULT_SERVICE_RADIUS_MILES),
            outside_area_message: None,
            story_multipliers: BTreeMap::from([
                ("1".to_string(), Decimal::ZERO),
                ("2".to_string(), Decimal::new(2, 2)),
                ("3".to_string(), Decimal::new(6, 2)),
            ]),
            story_flat_fees: BTreeMap::from([("3".to_string(), Decimal::from(300))]),
            updated_at: Utc::now(),
        }
    }
}

impl Settings {
    /// Per-square-foot surcharge for a story count. Counts above the highest
    /// configured key use the highest key ("3" covers 3+).
    pub fn story_multiplier(&self, stories: u32) -> Decimal {
        story_lookup(&self.story_multipliers, stories)
    }

    pub fn story_flat_fee(&self, stories: u32) -> Decimal {
        story_lookup(&self.story_flat_fees, stories)
    }

    pub fn service_radius(&self) -> Decimal {
        if self.service_radius_miles > Decimal::ZERO {
            self.service_radius_miles
        } else {
            Decimal::from(DEFAULT_SERVICE_RADIUS_MILES)
        }
    }

    /// Message shown when an address falls outside the radius, with the
    /// configured mileage spelled out.
    pub fn outside_area_notice(&self) -> String {
        let template = self
            .outside_area_message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(DEFAULT_OUTSIDE_AREA_MESSAGE);
        let radius = self.service_radius().normalize();
        template.replace("typical service area", &format!("typical {radius}-mile service area"))
    }

    pub fn display_business_phone(&self) -> &str {
        non_empty(self.business_phone.as_deref()).unwrap_or(DEFAULT_BUSINESS_PHONE)
    }

    pub fn display_business_email(&self) -> &str {
        non_empty(self.business_email.as_deref()).unwrap_or(DEFAULT_BUSINESS_EMAIL)
    }

    pub fn display_business_name(&self) -> &str {
        non_empty(Some(self.business_name.as_str())).unwrap_or(DEFAULT_BUSINESS_NAME)
    }

    pub fn apply_patch(&mut self, patch: SettingsPatch) -> Result<(), SettingsValidationError> {
        patch.validate()?;

        if let Some(value) = patch.discount_percentage.as_ref() {
            self.discount_percentage = parse_discount_percentage(value)?;
        }
        if let Some(value) = patch.discount_type.as_deref() {
            self.discount_type = value.parse()?;
        }
        if let Some(value) = patch.post_construction_markup_percentage.as_ref() {
            self.post_construction_markup_percentage = parse_markup_percentage(value)?;
        }
        if let Some(value) = patch.service_radius_miles.as_ref() {
            self.service_radius_miles = parse_radius(value)?;
        }
        if let Some(enabled) = patch.discount_enabled {
            self.discount_enabled = enabled;
        }

        if let Some(name) = patch.business_name {
            self.business_name = name.trim().to_string();
        }
        assign_optional(&mut self.business_address, patch.business_address);
        assign_optional(&mut self.business_phone, patch.business_phone);
        assign_optional(&mut self.business_email, patch.business_email);
        assign_optional(&mut self.logo_url, patch.logo_url);
        assign_optional(&mut self.primary_color, patch.primary_color);
        assign_optional(&mut self.secondary_color, patch.secondary_color);
        assign_optional(&mut self.form_title, patch.form_title);
        assign_optional(&mut self.form_subtitle, patch.form_subtitle);
        assign_optional(&mut self.business_email_template, patch.business_email_template);
        assign_optional(&mut self.customer_email_template, patch.customer_email_template);
        assign_optional(&mut self.outside_area_message, patch.outside_area_message);

        if let Some(emails) = patch.notification_emails {
            self.notification_emails = emails
                .into_iter()
                .map(|email| email.trim().to_string())
                .filter(|email| !email.is_empty())
                .collect();
        }
        if let Some(multipliers) = patch.story_multipliers {
            self.story_multipliers = multipliers;
        }
        if let Some(flat_fees) = patch.story_flat_fees {
            self.story_flat_fees = flat_fees;
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

fn story_lookup(table: &BTreeMap<String, Decimal>, stories: u32) -> Decimal {
    table.get(&stories.to_string()).copied().unwrap_or(Decimal::ZERO)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn assign_optional(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        let trimmed = value.trim();
        *target = if trimmed.is_empty() { None } else { Some(trimmed.to_string()) };
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettingsValidationError {
    #[error("Discount percentage must be between 0 and 50")]
    DiscountPercentage,
    #[error("Discount type must be either 'actual' or 'visual_only'")]
    DiscountType,
    #[error("Post-construction markup percentage must be between 0 and 100")]
    MarkupPercentage,
    #[error("Service radius must be a positive number of miles")]
    ServiceRadius,
    #[error("{field} must be a hex color such as #1a2b3c")]
    Color { field: &'static str },
    #[error("story pricing keys must be story counts, found `{0}`")]
    StoryKey(String),
    #[error("story pricing values must not be negative")]
    StoryValue,
}

/// A partial settings update as received from the admin editor. Numeric
/// fields arrive as loosely-typed JSON and are validated before anything is
/// applied.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SettingsPatch {
    pub business_name: Option<String>,
    pub business_address: Option<String>,
    pub business_phone: Option<String>,
    pub business_email: Option<String>,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub form_title: Option<String>,
    pub form_subtitle: Option<String>,
    pub notification_emails: Option<Vec<String>>,
    pub business_email_template: Option<String>,
    pub customer_email_template: Option<String>,
    pub discount_enabled: Option<bool>,
    pub discount_percentage: Option<Value>,
    pub discount_type: Option<String>,
    pub post_construction_markup_percentage: Option<Value>,
    pub service_radius_miles: Option<Value>,
    pub outside_area_message: Option<String>,
    pub story_multipliers: Option<BTreeMap<String, Decimal>>,
    pub story_flat_fees: Option<BTreeMap<String, Decimal>>,
}

impl SettingsPatch {
    pub fn validate(&self) -> Result<(), SettingsValidationError> {
        if let Some(value) = self.discount_percentage.as_ref() {
            parse_discount_percentage(value)?;
        }
        if let Some(value) = self.discount_type.as_deref() {
            value.parse::<DiscountType>()?;
        }
        if let Some(value) = self.post_construction_markup_percentage.as_ref() {
            parse_markup_percentage(value)?;
        }
        if let Some(value) = self.service_radius_miles.as_ref() {
            parse_radius(value)?;
        }
        for (field, color) in
            [("primary_color", &self.primary_color), ("secondary_color", &self.secondary_color)]
        {
            if let Some(color) = color.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                if !is_hex_color(color) {
                    return Err(SettingsValidationError::Color { field });
                }
            }
        }
        for table in [&self.story_multipliers, &self.story_flat_fees].into_iter().flatten() {
            for (key, value) in table {
                if key.trim().parse::<u32>().is_err() {
                    return Err(SettingsValidationError::StoryKey(key.clone()));
                }
                if value.is_sign_negative() && !value.is_zero() {
                    return Err(SettingsValidationError::StoryValue);
                }
            }
        }
        Ok(())
    }
}

fn loose_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Some(Decimal::from(integer))
            } else {
                number.as_f64().and_then(|float| Decimal::try_from(float).ok())
            }
        }
        Value::String(raw) => Decimal::from_str(raw.trim()).ok(),
        _ => None,
    }
}

fn parse_discount_percentage(value: &Value) -> Result<u32, SettingsValidationError> {
    let whole = loose_decimal(value)
        .map(|decimal| decimal.trunc())
        .ok_or(SettingsValidationError::DiscountPercentage)?;
    match whole.to_i64() {
        Some(percentage) if (0..=i64::from(MAX_DISCOUNT_PERCENTAGE)).contains(&percentage) => {
            u32::try_from(percentage).map_err(|_| SettingsValidationError::DiscountPercentage)
        }
        _ => Err(SettingsValidationError::DiscountPercentage),
    }
}

fn parse_markup_percentage(value: &Value) -> Result<Decimal, SettingsValidationError> {
    let markup = loose_decimal(value).ok_or(SettingsValidationError::MarkupPercentage)?;
    if markup < Decimal::ZERO || markup > Decimal::ONE_HUNDRED {
        return Err(SettingsValidationError::MarkupPercentage);
    }
    Ok(markup)
}

fn parse_radius(value: &Value) -> Result<Decimal, SettingsValidationError> {
    let radius = loose_decimal(value).ok_or(SettingsValidationError::ServiceRadius)?;
    if radius <= Decimal::ZERO {
        return Err(SettingsValidationError::ServiceRadius);
    }
    Ok(radius)
}

fn is_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6) && digits.chars().all(|ch| ch.is_ascii_hexdigit())
}
