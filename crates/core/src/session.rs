use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::audit::{AuditContext, AuditSink};
use crate::domain::quote::{
    AdditionalServices, QuoteFields, QuoteId, QuoteStatus, SaveAction, SaveOutcome, WindowDetails,
};
use crate::domain::service::Service;
use crate::domain::settings::Settings;
use crate::flows::{
    FieldIssue, FlowContext, FlowDefinition, FlowEngine, FlowTransitionError, SessionAction,
    SessionEvent, SessionStep, TransitionOutcome,
};
use crate::pricing::{compute_price, DiscountPolicy, DisplayPrice, PriceQuote, PriceRequest};

pub const MIN_MANUAL_SQUARE_FOOTAGE: u32 = 500;
pub const MAX_MANUAL_SQUARE_FOOTAGE: u32 = 15_000;
/// Distance assumed when the address cannot be resolved; always outside the
/// service radius.
pub const UNREACHABLE_DISTANCE_MILES: i64 = 9999;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyEstimate {
    pub square_footage: u32,
    pub confidence: Option<f64>,
    pub source: String,
}

impl PropertyEstimate {
    pub fn manual(square_footage: u32) -> Self {
        Self { square_footage, confidence: None, source: "manual".to_string() }
    }
}

/// Everything the customer has typed into the calculator so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionForm {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub address: Option<String>,
    pub stories: Option<u32>,
    pub service_type: Option<String>,
    pub addons: Vec<String>,
    pub has_skylights: bool,
    pub additional_services: AdditionalServices,
    pub window_details: WindowDetails,
}

/// A partial form update. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormPatch {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub address: Option<String>,
    pub stories: Option<u32>,
    pub service_type: Option<String>,
    pub addons: Option<Vec<String>>,
    pub has_skylights: Option<bool>,
    pub additional_services: Option<AdditionalServices>,
    pub window_details: Option<WindowDetails>,
    pub square_footage: Option<String>,
}

impl FormPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    pub changed: Vec<&'static str>,
    pub actions: Vec<SessionAction>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteSession {
    pub id: SessionId,
    pub step: SessionStep,
    pub quote_id: Option<QuoteId>,
    pub form: SessionForm,
    pub property: Option<PropertyEstimate>,
    pub manual_square_footage_input: Option<String>,
    pub distance_miles: Option<Decimal>,
    pub price: PriceQuote,
    pub display_price: Option<DisplayPrice>,
    pub stalled_timer_armed: bool,
    pub stalled_notice_sent: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl QuoteSession {
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            step: SessionStep::PropertyInfo,
            quote_id: None,
            form: SessionForm::default(),
            property: None,
            manual_square_footage_input: None,
            distance_miles: None,
            price: PriceQuote::empty(),
            display_price: None,
            stalled_timer_armed: false,
            stalled_notice_sent: false,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    pub fn square_footage(&self) -> Option<u32> {
        self.property.as_ref().map(|property| property.square_footage)
    }

    pub fn update_fields(&mut self, patch: FormPatch) -> FieldUpdate {
        let mut changed = Vec::new();
        let form = &mut self.form;

        set_text(&mut form.customer_name, patch.customer_name, "customer_name", &mut changed);
        set_text(&mut form.customer_email, patch.customer_email, "customer_email", &mut changed);
        set_text(&mut form.customer_phone, patch.customer_phone, "customer_phone", &mut changed);
        set_text(&mut form.address, patch.address, "address", &mut changed);
        set_text(&mut form.service_type, patch.service_type, "service_type", &mut changed);
        set_value(&mut form.stories, patch.stories.map(Some), "stories", &mut changed);
        set_value(&mut form.addons, patch.addons, "addons", &mut changed);
        set_value(&mut form.has_skylights, patch.has_skylights, "has_skylights", &mut changed);
        set_value(
            &mut form.additional_services,
            patch.additional_services,
            "additional_services",
            &mut changed,
        );
        set_value(&mut form.window_details, patch.window_details, "window_details", &mut changed);
        if let Some(raw) = patch.square_footage {
            if self.manual_square_footage_input.as_deref() != Some(raw.as_str()) {
                self.manual_square_footage_input = Some(raw);
                changed.push("square_footage");
            }
        }

        let mut actions = Vec::new();
        if changed.is_empty() {
            return FieldUpdate { changed, actions };
        }
        if matches!(self.step, SessionStep::ServiceSelection | SessionStep::AddonsAndSubmit) {
            actions.push(SessionAction::RecomputePrice);
        }
        if self.autosave_eligible() {
            actions.push(SessionAction::PersistDraft { step_completed: self.step.number() - 1 });
        }
        if self.step == SessionStep::AddonsAndSubmit
            && !self.stalled_timer_armed
            && self.stalled_notice_ready()
        {
            self.stalled_timer_armed = true;
            actions.push(SessionAction::ArmStalledTimer);
        }
        FieldUpdate { changed, actions }
    }

    /// Records what the geocoding and estimation lookups returned. A failed
    /// distance lookup is treated as unreachable.
    pub fn resolve_property(&mut self, distance: Option<Decimal>, estimate: Option<PropertyEstimate>) {
        self.distance_miles =
            Some(distance.unwrap_or_else(|| Decimal::from(UNREACHABLE_DISTANCE_MILES)));
        self.property = estimate;
    }

    pub fn flow_context(&self, event: SessionEvent, settings: &Settings) -> FlowContext {
        let form = &self.form;
        let required: Vec<(&str, bool)> = match event {
            SessionEvent::PropertyResolved => vec![
                ("address", filled(&form.address)),
                ("stories", form.stories.is_some()),
                ("customer_name", filled(&form.customer_name)),
                ("customer_email", filled(&form.customer_email)),
            ],
            SessionEvent::ServiceSelected => vec![("service_type", filled(&form.service_type))],
            SessionEvent::SubmitRequested => vec![
                ("customer_name", filled(&form.customer_name)),
                ("customer_email", filled(&form.customer_email)),
                ("service_type", filled(&form.service_type)),
                ("square_footage", self.square_footage().is_some()),
            ],
            SessionEvent::OutsideAreaContactSubmitted => vec![
                ("customer_name", filled(&form.customer_name)),
                ("customer_email", filled(&form.customer_email)),
                ("customer_phone", filled(&form.customer_phone)),
            ],
            SessionEvent::ManualSquareFootageEntered | SessionEvent::BackRequested => vec![],
        };
        let missing_required_fields = required
            .iter()
            .filter(|(_, present)| !present)
            .map(|(field, _)| (*field).to_string())
            .collect();

        let mut invalid_fields = Vec::new();
        if event == SessionEvent::ManualSquareFootageEntered {
            if let Err(issue) =
                parse_manual_square_footage(self.manual_square_footage_input.as_deref().unwrap_or(""))
            {
                invalid_fields.push(issue);
            }
        }

        let outside_service_area =
            self.distance_miles.is_some_and(|distance| distance > settings.service_radius());

        FlowContext {
            missing_required_fields,
            invalid_fields,
            outside_service_area,
            square_footage_known: self.square_footage().is_some(),
            stalled_notice_ready: self.stalled_notice_ready(),
        }
    }

    /// Applies an event through the flow engine and moves the session to the
    /// resulting step.
    pub fn advance<F, S>(
        &mut self,
        engine: &FlowEngine<F>,
        event: SessionEvent,
        settings: &Settings,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        F: FlowDefinition,
        S: AuditSink + ?Sized,
    {
        let context = self.flow_context(event, settings);
        let outcome = engine.apply_with_audit(&self.step, &event, &context, sink, audit)?;

        if event == SessionEvent::ManualSquareFootageEntered {
            let raw = self.manual_square_footage_input.as_deref().unwrap_or("");
            if let Ok(square_footage) = parse_manual_square_footage(raw) {
                self.property = Some(PropertyEstimate::manual(square_footage));
            }
        }
        self.step = outcome.to;
        for action in &outcome.actions {
            match action {
                SessionAction::ArmStalledTimer => self.stalled_timer_armed = true,
                SessionAction::CancelStalledTimer => self.stalled_timer_armed = false,
                _ => {}
            }
        }
        Ok(outcome)
    }

    /// Re-prices the session against the current catalog and settings.
    pub fn recompute(&mut self, services: &[Service], settings: &Settings) -> &PriceQuote {
        self.price = match (self.square_footage(), self.form.service_type.as_deref()) {
            (Some(square_footage), Some(service_type)) => compute_price(
                &PriceRequest {
                    square_footage,
                    service_type,
                    stories: self.form.stories.unwrap_or(1),
                    addons: &self.form.addons,
                    is_post_construction: self.form.window_details.is_post_construction,
                },
                services,
                settings,
            ),
            _ => PriceQuote::empty(),
        };
        self.display_price = self
            .price
            .is_priced()
            .then(|| DiscountPolicy::from_settings(settings).apply(self.price.final_price));
        &self.price
    }

    /// Charged amount, after an actual discount, if a price exists.
    pub fn charged_price(&self) -> Option<Decimal> {
        self.display_price.map(|price| price.charged)
    }

    pub fn estimate_needed(&self) -> bool {
        self.form.window_details.needs_onsite_estimate(self.form.stories.unwrap_or(1))
    }

    pub fn has_contact_identity(&self) -> bool {
        filled(&self.form.customer_name) && filled(&self.form.customer_email)
    }

    /// Drafts are only written once the customer is past step 1 and has
    /// given a name and email.
    pub fn autosave_eligible(&self) -> bool {
        self.step.number() > 1 && !self.step.is_terminal() && self.has_contact_identity()
    }

    pub fn stalled_notice_ready(&self) -> bool {
        !self.stalled_notice_sent
            && self.has_contact_identity()
            && filled(&self.form.customer_phone)
            && filled(&self.form.address)
            && filled(&self.form.service_type)
    }

    pub fn mark_stalled_notice_sent(&mut self) {
        self.stalled_notice_sent = true;
        self.stalled_timer_armed = false;
    }

    /// Adopts the id returned by the first successful save. Later saves keep
    /// reusing it.
    pub fn record_save(&mut self, outcome: &SaveOutcome) {
        if self.quote_id.is_none() || outcome.action == SaveAction::Created {
            self.quote_id = Some(outcome.id.clone());
        }
    }

    pub fn quote_fields(
        &self,
        status: QuoteStatus,
        step_completed: u8,
        now: DateTime<Utc>,
    ) -> QuoteFields {
        let form = &self.form;
        QuoteFields {
            customer_name: form.customer_name.clone(),
            customer_email: form.customer_email.clone(),
            customer_phone: form.customer_phone.clone(),
            address: form.address.clone(),
            stories: form.stories,
            service_type: form.service_type.clone(),
            square_footage: self.square_footage(),
            addons: form.addons.clone(),
            has_skylights: form.has_skylights,
            additional_services: form.additional_services,
            window_details: form.window_details.clone(),
            distance: self.distance_miles,
            final_price: self.charged_price(),
            status,
            last_step_completed: step_completed,
            quote_data: self.snapshot(now),
        }
    }

    /// Audit snapshot stored alongside each save.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Value {
        let step = self.step.number();
        let details = &self.form.window_details;
        json!({
            "formStep": step,
            "timestamp": now.to_rfc3339(),
            "propertyData": self.property,
            "runningTotal": self.price.final_price,
            "quoteBreakdown": self.price.breakdown,
            "displayPrice": self.display_price,
            "progress": {
                "step1_completed": step > 1,
                "step2_completed": step > 2,
                "step3_completed": step > 3,
                "step4_completed": self.step.is_terminal(),
            },
            "isPostConstruction": details.is_post_construction,
            "gridType": details.grid_type,
            "upperWindowsOpenInside": details.upper_windows_open_inside,
            "panesPerWindow": details.panes_per_window,
            "windowManufacturer": details.window_manufacturer,
        })
    }
}

/// Parses a manually entered square footage, tolerating thousands separators.
pub fn parse_manual_square_footage(raw: &str) -> Result<u32, FieldIssue> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    let value: u32 = cleaned.parse().map_err(|_| FieldIssue {
        field: "square_footage".to_string(),
        reason: "Please enter a valid square footage".to_string(),
    })?;
    if !(MIN_MANUAL_SQUARE_FOOTAGE..=MAX_MANUAL_SQUARE_FOOTAGE).contains(&value) {
        return Err(FieldIssue {
            field: "square_footage".to_string(),
            reason: "Square footage must be between 500 and 15,000".to_string(),
        });
    }
    Ok(value)
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|value| !value.trim().is_empty())
}

fn set_text(
    slot: &mut Option<String>,
    incoming: Option<String>,
    name: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if let Some(incoming) = incoming {
        let trimmed = incoming.trim();
        let next = (!trimmed.is_empty()).then(|| trimmed.to_string());
        if *slot != next {
            *slot = next;
            changed.push(name);
        }
    }
}

fn set_value<T: PartialEq>(
    slot: &mut T,
    incoming: Option<T>,
    name: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if let Some(incoming) = incoming {
        if *slot != incoming {
            *slot = incoming;
            changed.push(name);
        }
    }
}
