use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Incomplete,
    Submitted,
    OutsideArea,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Submitted => "submitted",
            Self::OutsideArea => "outside_area",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Incomplete)
    }
}

impl FromStr for QuoteStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "incomplete" => Ok(Self::Incomplete),
            "submitted" => Ok(Self::Submitted),
            "outside_area" => Ok(Self::OutsideArea),
            other => Err(DomainError::InvariantViolation(format!("unknown quote status `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GridType {
    #[default]
    None,
    BetweenPanes,
    OnSurface,
}

impl GridType {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::None => "No grids",
            Self::BetweenPanes => "Grids between panes",
            Self::OnSurface => "Grids on surface",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanesPerWindow {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3+")]
    ThreePlus,
    #[serde(rename = "unknown")]
    Unknown,
}

impl PanesPerWindow {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::One => "1",
            Self::Two => "2",
            Self::ThreePlus => "3+",
            Self::Unknown => "unknown",
        }
    }
}

/// Out-of-band services the customer flagged interest in. None of these are
/// priced by the calculator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdditionalServices {
    pub home_washing: bool,
    pub roof_washing: bool,
    pub driveway_washing: bool,
    pub fence_deck_washing: bool,
    pub other_pressure_washing: bool,
    pub gutter_cleaning: bool,
    pub specialty_cleaning: bool,
}

impl AdditionalServices {
    pub fn selected_labels(&self) -> Vec<&'static str> {
        [
            (self.home_washing, "Home Washing"),
            (self.roof_washing, "Roof Washing"),
            (self.driveway_washing, "Driveway Washing"),
            (self.fence_deck_washing, "Fence/Deck Washing"),
            (self.other_pressure_washing, "Other Pressure Washing"),
            (self.gutter_cleaning, "Gutter Cleaning"),
            (self.specialty_cleaning, "Specialty Cleaning"),
        ]
        .into_iter()
        .filter_map(|(selected, label)| selected.then_some(label))
        .collect()
    }

    pub fn any(&self) -> bool {
        !self.selected_labels().is_empty()
    }
}

/// Window attributes that affect pricing or whether an on-site estimate is
/// needed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowDetails {
    pub is_post_construction: bool,
    pub grid_type: GridType,
    pub upper_windows_open_inside: bool,
    pub panes_per_window: PanesPerWindow,
    pub window_manufacturer: Option<String>,
}

impl WindowDetails {
    /// True when the online price may change after a site visit.
    pub fn needs_onsite_estimate(&self, stories: u32) -> bool {
        self.is_post_construction
            || self.grid_type != GridType::None
            || (stories > 1 && !self.upper_windows_open_inside)
            || matches!(self.panes_per_window, PanesPerWindow::ThreePlus | PanesPerWindow::Unknown)
            || self.window_manufacturer.as_deref().is_some_and(|value| !value.trim().is_empty())
    }
}

/// Every mutable column of a quote row. Each save writes all of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteFields {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub address: Option<String>,
    pub stories: Option<u32>,
    pub service_type: Option<String>,
    pub square_footage: Option<u32>,
    pub addons: Vec<String>,
    pub has_skylights: bool,
    pub additional_services: AdditionalServices,
    pub window_details: WindowDetails,
    pub distance: Option<Decimal>,
    pub final_price: Option<Decimal>,
    pub status: QuoteStatus,
    pub last_step_completed: u8,
    pub quote_data: Value,
}

impl Default for QuoteFields {
    fn default() -> Self {
        Self {
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            address: None,
            stories: None,
            service_type: None,
            square_footage: None,
            addons: Vec::new(),
            has_skylights: false,
            additional_services: AdditionalServices::default(),
            window_details: WindowDetails::default(),
            distance: None,
            final_price: None,
            status: QuoteStatus::Incomplete,
            last_step_completed: 1,
            quote_data: Value::Null,
        }
    }
}

impl QuoteFields {
    pub fn has_contact_identity(&self) -> bool {
        present(self.customer_name.as_deref()) && present(self.customer_email.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub id: QuoteId,
    #[serde(flatten)]
    pub fields: QuoteFields,
    pub followup_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuoteRecord {
    /// An abandoned draft older than `cutoff` that nobody has contacted yet.
    pub fn is_followup_candidate(&self, cutoff: DateTime<Utc>) -> bool {
        self.fields.status == QuoteStatus::Incomplete
            && self.created_at < cutoff
            && self.followup_sent_at.is_none()
            && self.fields.has_contact_identity()
    }

    /// True when `self` is a submitted quote that supersedes `candidate`:
    /// same email and phone, created no earlier than the candidate.
    pub fn supersedes(&self, candidate: &QuoteRecord) -> bool {
        self.fields.status == QuoteStatus::Submitted
            && self.fields.customer_email == candidate.fields.customer_email
            && self.fields.customer_phone == candidate.fields.customer_phone
            && self.created_at >= candidate.created_at
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveAction {
    Created,
    Updated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub id: QuoteId,
    pub action: SaveAction,
}

fn present(value: Option<&str>) -> bool {
    value.is_some_and(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::{
        AdditionalServices, GridType, PanesPerWindow, QuoteFields, QuoteId, QuoteRecord,
        QuoteStatus, WindowDetails,
    };

    fn record(status: QuoteStatus, minutes_old: i64) -> QuoteRecord {
        let created_at = Utc::now() - Duration::minutes(minutes_old);
        QuoteRecord {
            id: QuoteId::generate(),
            fields: QuoteFields {
                customer_name: Some("Dana Reyes".to_string()),
                customer_email: Some("dana@example.com".to_string()),
                customer_phone: Some("555-0100".to_string()),
                status,
                ..QuoteFields::default()
            },
            followup_sent_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn followup_candidate_requires_age_identity_and_no_prior_followup() {
        let cutoff = Utc::now() - Duration::minutes(10);

        assert!(record(QuoteStatus::Incomplete, 30).is_followup_candidate(cutoff));
        assert!(!record(QuoteStatus::Incomplete, 2).is_followup_candidate(cutoff));
        assert!(!record(QuoteStatus::Submitted, 30).is_followup_candidate(cutoff));

        let mut contacted = record(QuoteStatus::Incomplete, 30);
        contacted.followup_sent_at = Some(Utc::now());
        assert!(!contacted.is_followup_candidate(cutoff));

        let mut anonymous = record(QuoteStatus::Incomplete, 30);
        anonymous.fields.customer_name = Some("  ".to_string());
        assert!(!anonymous.is_followup_candidate(cutoff));
    }

    #[test]
    fn later_submission_with_same_contact_supersedes_draft() {
        let draft = record(QuoteStatus::Incomplete, 30);
        let submitted = record(QuoteStatus::Submitted, 5);
        assert!(submitted.supersedes(&draft));

        let earlier = record(QuoteStatus::Submitted, 60);
        assert!(!earlier.supersedes(&draft));

        let mut other_phone = record(QuoteStatus::Submitted, 5);
        other_phone.fields.customer_phone = Some("555-0199".to_string());
        assert!(!other_phone.supersedes(&draft));
    }

    #[test]
    fn onsite_estimate_flags() {
        let plain = WindowDetails { upper_windows_open_inside: true, ..WindowDetails::default() };
        assert!(!plain.needs_onsite_estimate(1));
        assert!(!plain.needs_onsite_estimate(2));

        let closed_upper = WindowDetails::default();
        assert!(closed_upper.needs_onsite_estimate(2));
        assert!(!closed_upper.needs_onsite_estimate(1));

        let grids = WindowDetails { grid_type: GridType::OnSurface, ..plain.clone() };
        assert!(grids.needs_onsite_estimate(1));

        let panes = WindowDetails { panes_per_window: PanesPerWindow::Unknown, ..plain.clone() };
        assert!(panes.needs_onsite_estimate(1));

        let branded =
            WindowDetails { window_manufacturer: Some("Andersen".to_string()), ..plain };
        assert!(branded.needs_onsite_estimate(1));
    }

    #[test]
    fn wire_formats_follow_calculator_vocabulary() {
        let details: WindowDetails = serde_json::from_value(json!({
            "grid_type": "between-panes",
            "panes_per_window": "3+"
        }))
        .expect("window details");
        assert_eq!(details.grid_type, GridType::BetweenPanes);
        assert_eq!(details.panes_per_window, PanesPerWindow::ThreePlus);

        let extras: AdditionalServices =
            serde_json::from_value(json!({ "gutterCleaning": true, "roofWashing": true }))
                .expect("additional services");
        assert_eq!(extras.selected_labels(), vec!["Roof Washing", "Gutter Cleaning"]);
        assert_eq!(
            serde_json::to_value(QuoteStatus::OutsideArea).expect("status json"),
            json!("outside_area")
        );
    }
}
