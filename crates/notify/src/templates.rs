use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::warn;

use clearview_core::domain::quote::QuoteFields;
use clearview_core::domain::settings::Settings;
use clearview_core::pricing::{format_currency, DiscountMode, DiscountPolicy};

const BUSINESS_NOTIFICATION: &str = "business_notification.txt";
const CUSTOMER_CONFIRMATION: &str = "customer_confirmation.txt";
const FOLLOWUP: &str = "followup.html";
const STALLED_NOTICE: &str = "stalled_notice.txt";
const OUTSIDE_AREA: &str = "outside_area.txt";

const BUSINESS_NOTIFICATION_TEMPLATE: &str = "NEW WINDOW CLEANING QUOTE REQUEST

QUOTE AMOUNT: {{ finalPrice }}

CUSTOMER INFORMATION:
- Name: {{ customerName }}
- Email: {{ customerEmail }}
- Phone: {{ customerPhone }}
- Address: {{ address }}
  View on Google Maps: {{ mapsUrl }}

PROPERTY DETAILS:
- Square Footage: {{ squareFootage }} sq ft
- Number of Stories: {{ stories }}
- Service Type: {{ serviceType }}
{% if distance %}- Distance: {{ distance }} miles
{% endif %}
WINDOW DETAILS:
{{ windowDetails }}

SERVICES REQUESTED:
{{ services }}
{% if estimateNeeded %}
NOTE: Window details indicate the price may change after an on-site estimate.
{% endif %}
FINAL QUOTE: {{ finalPrice }}
Generated: {{ timestamp }}
";

const CUSTOMER_CONFIRMATION_TEMPLATE: &str = "Dear {{ customerName }},

Thank you for requesting a quote from {{ businessName }}.

YOUR QUOTE DETAILS:
- Service: {{ serviceType }}
- Property: {{ address }}
{% if originalPrice %}- Regular Price: {{ originalPrice }}
- Your Discount: {{ discountPercentage }}% off
{% endif %}- Total Quote: {{ finalPrice }}

WINDOW DETAILS:
{{ windowDetails }}

SERVICES:
{{ services }}
{% if estimateNeeded %}
Based on your window details, we may need to confirm the final price with a quick on-site estimate.
{% endif %}
Someone from our team will contact you within 24 hours to schedule your service.

Best regards,
{{ businessName }}
{{ businessPhone }} | {{ businessEmail }}
";

const FOLLOWUP_TEMPLATE: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2 style="color: #2563eb;">Hi {{ customerName }},</h2>
  <p>I noticed you started getting a quote for window cleaning services but didn't complete the process. I'd love to help you get the best service possible!</p>
  {% if hasPrice %}
  <div style="background: #f3f4f6; padding: 15px; border-radius: 8px; margin: 20px 0;">
    <h3 style="margin: 0 0 10px 0; color: #374151;">Your Quote Summary:</h3>
    <p style="margin: 5px 0;"><strong>Service:</strong> {{ serviceType }}</p>
    <p style="margin: 5px 0;"><strong>Address:</strong> {{ address }}</p>
    {% if hasSquareFootage %}<p style="margin: 5px 0;"><strong>Square Footage:</strong> {{ squareFootage }} sq ft</p>{% endif %}
    <p style="margin: 5px 0; font-size: 18px; color: #059669;"><strong>Estimated Price: {{ finalPrice }}</strong></p>
  </div>
  {% endif %}
  <h3 style="color: #374151;">Why Choose {{ businessName }}?</h3>
  <ul style="color: #6b7280;">
    <li>Fully insured and bonded</li>
    <li>100% satisfaction guarantee</li>
    <li>Competitive pricing with no hidden fees</li>
    <li>Professional, reliable service</li>
    <li>Free estimates</li>
  </ul>
  <div style="background: #fef3c7; border: 1px solid #f59e0b; padding: 15px; border-radius: 8px; margin: 20px 0;">
    <h3 style="margin: 0 0 10px 0; color: #92400e;">Special Offer Just for You!</h3>
    <p style="margin: 0; color: #92400e;"><strong>Get 10% off your first service</strong> when you book within the next 48 hours!</p>
  </div>
  <h3 style="color: #374151;">Common Questions We Get:</h3>
  <div style="color: #6b7280;">
    <p><strong>Q: Is the price competitive?</strong><br>A: We offer fair, transparent pricing with no surprises.</p>
    <p><strong>Q: Are you insured?</strong><br>A: Absolutely! We carry full liability insurance and are bonded for your peace of mind.</p>
    <p><strong>Q: What if I'm not satisfied?</strong><br>A: We guarantee your satisfaction. If you're not happy, we'll make it right or refund your money.</p>
  </div>
  <div style="text-align: center; margin: 30px 0;">
    <p style="font-size: 18px; color: #374151;"><strong>Ready to get started?</strong></p>
    <p style="color: #6b7280;">Reply to this email or call us at <strong>{{ businessPhone }}</strong></p>
  </div>
  <div style="border-top: 1px solid #e5e7eb; padding-top: 20px; margin-top: 30px; text-align: center; color: #9ca3af; font-size: 14px;">
    <p>{{ businessName }}<br>{{ businessPhone }} | {{ businessEmail }}</p>
  </div>
</div>
"#;

const STALLED_NOTICE_TEMPLATE: &str = "CUSTOMER STILL DECIDING (4+ MINUTES ON THE LAST STEP)

Current quote: {{ finalPrice }}

CUSTOMER INFORMATION:
- Name: {{ customerName }}
- Email: {{ customerEmail }}
- Phone: {{ customerPhone }}
- Address: {{ address }}

PROPERTY DETAILS:
- Square Footage: {{ squareFootage }} sq ft
- Number of Stories: {{ stories }}
- Service Type: {{ serviceType }}

WINDOW DETAILS:
{{ windowDetails }}

SERVICES SELECTED SO FAR:
{{ services }}

This customer has not submitted yet. A quick call may help close the job.
Generated: {{ timestamp }}
";

const OUTSIDE_AREA_TEMPLATE: &str = "OUTSIDE SERVICE AREA REQUEST

A customer outside the {{ serviceRadius }}-mile service area asked to be contacted.

- Name: {{ customerName }}
- Email: {{ customerEmail }}
- Phone: {{ customerPhone }}
- Address: {{ address }}
  View on Google Maps: {{ mapsUrl }}
{% if distance %}- Distance: {{ distance }} miles
{% endif %}
Generated: {{ timestamp }}
";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template render failed: {0}")]
    Render(#[from] tera::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Values every quote email can reference. Field names are the camelCase
/// placeholders admins use in custom templates (`{{customerName}}`).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteEmailContext {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub address: String,
    pub maps_url: String,
    pub service_type: String,
    pub square_footage: String,
    pub has_square_footage: bool,
    pub stories: String,
    pub distance: Option<String>,
    pub final_price: String,
    pub has_price: bool,
    pub original_price: Option<String>,
    pub discount_percentage: u32,
    pub services: String,
    pub window_details: String,
    pub estimate_needed: bool,
    pub business_name: String,
    pub business_phone: String,
    pub business_email: String,
    pub service_radius: String,
    pub timestamp: String,
}

impl QuoteEmailContext {
    pub fn new(fields: &QuoteFields, settings: &Settings, now: DateTime<Utc>) -> Self {
        let final_price = fields.final_price.filter(|price| *price > Decimal::ZERO);
        let policy = DiscountPolicy::from_settings(settings);
        let original_price = final_price
            .filter(|_| policy.mode() != DiscountMode::None)
            .map(|price| format_currency(policy.original_for_display(price)));
        let stories = fields.stories.unwrap_or(1);
        let address = text_or_na(fields.address.as_deref());

        Self {
            customer_name: text_or_na(fields.customer_name.as_deref()),
            customer_email: text_or_na(fields.customer_email.as_deref()),
            customer_phone: text_or_na(fields.customer_phone.as_deref()),
            maps_url: maps_url(fields.address.as_deref().unwrap_or_default()),
            address,
            service_type: text_or_na(fields.service_type.as_deref()),
            square_footage: fields
                .square_footage
                .map_or_else(|| "N/A".to_string(), |sqft| sqft.to_string()),
            has_square_footage: fields.square_footage.is_some_and(|sqft| sqft > 0),
            stories: fields.stories.map_or_else(|| "N/A".to_string(), |value| value.to_string()),
            distance: fields.distance.map(|distance| distance.round_dp(1).normalize().to_string()),
            final_price: format_currency(final_price.unwrap_or_default()),
            has_price: final_price.is_some(),
            original_price,
            discount_percentage: policy.percentage(),
            services: services_summary(fields),
            window_details: window_details_summary(fields),
            estimate_needed: fields.window_details.needs_onsite_estimate(stories),
            business_name: settings.display_business_name().to_string(),
            business_phone: settings.display_business_phone().to_string(),
            business_email: settings.display_business_email().to_string(),
            service_radius: settings.service_radius().normalize().to_string(),
            timestamp: now.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

fn text_or_na(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| "N/A".to_string(), str::to_string)
}

fn maps_url(address: &str) -> String {
    let mut encoded = String::with_capacity(address.len());
    for byte in address.trim().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b' ' => encoded.push('+'),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    format!("https://www.google.com/maps/search/?api=1&query={encoded}")
}

fn services_summary(fields: &QuoteFields) -> String {
    let mut lines: Vec<String> = if fields.addons.is_empty() {
        vec!["- Standard window cleaning only".to_string()]
    } else {
        fields.addons.iter().map(|addon| format!("- {addon}")).collect()
    };

    if fields.has_skylights {
        lines.push(String::new());
        lines.push(
            "SPECIAL NOTE: Customer has skylights or hard-to-reach glass that needs a separate quote on-site."
                .to_string(),
        );
    }

    let extras = fields.additional_services.selected_labels();
    if !extras.is_empty() {
        lines.push(String::new());
        lines.push("ADDITIONAL SERVICES REQUESTED (NEEDS SEPARATE QUOTE):".to_string());
        lines.extend(extras.into_iter().map(|label| format!("- {label}")));
    }

    lines.join("\n")
}

fn window_details_summary(fields: &QuoteFields) -> String {
    let details = &fields.window_details;
    let yes_no = |flag: bool| if flag { "YES" } else { "NO" };

    let mut lines = vec![
        format!("- Post-Construction Job: {}", yes_no(details.is_post_construction)),
        format!("- Window Grids: {}", details.grid_type.describe()),
    ];
    if fields.stories.is_some_and(|stories| stories > 1) {
        lines.push(format!(
            "- Upper Windows Open Inward: {}",
            yes_no(details.upper_windows_open_inside)
        ));
    }
    lines.push(format!("- Panes Per Window: {}", details.panes_per_window.describe()));
    if let Some(manufacturer) =
        details.window_manufacturer.as_deref().map(str::trim).filter(|value| !value.is_empty())
    {
        lines.push(format!("- Window Manufacturer: {manufacturer}"));
    }
    lines.join("\n")
}

/// Built-in message templates plus per-business overrides from settings.
pub struct EmailTemplates {
    tera: Tera,
}

impl EmailTemplates {
    pub fn new() -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (BUSINESS_NOTIFICATION, BUSINESS_NOTIFICATION_TEMPLATE),
            (CUSTOMER_CONFIRMATION, CUSTOMER_CONFIRMATION_TEMPLATE),
            (FOLLOWUP, FOLLOWUP_TEMPLATE),
            (STALLED_NOTICE, STALLED_NOTICE_TEMPLATE),
            (OUTSIDE_AREA, OUTSIDE_AREA_TEMPLATE),
        ])?;
        Ok(Self { tera })
    }

    pub fn business_notification(
        &self,
        context: &QuoteEmailContext,
        settings: &Settings,
    ) -> Result<RenderedEmail, TemplateError> {
        let body = self.render_with_override(
            BUSINESS_NOTIFICATION,
            settings.business_email_template.as_deref(),
            context,
        )?;
        Ok(RenderedEmail {
            subject: format!(
                "New Window Cleaning Quote Request - {} - {}",
                context.final_price, context.customer_name
            ),
            body,
        })
    }

    pub fn customer_confirmation(
        &self,
        context: &QuoteEmailContext,
        settings: &Settings,
    ) -> Result<RenderedEmail, TemplateError> {
        let body = self.render_with_override(
            CUSTOMER_CONFIRMATION,
            settings.customer_email_template.as_deref(),
            context,
        )?;
        Ok(RenderedEmail {
            subject: format!(
                "Quote Confirmation - {} - {}",
                context.business_name, context.final_price
            ),
            body,
        })
    }

    /// HTML re-engagement email for an abandoned draft.
    pub fn followup(&self, context: &QuoteEmailContext) -> Result<RenderedEmail, TemplateError> {
        Ok(RenderedEmail {
            subject: format!("{}, how can we win your business?", context.customer_name),
            body: self.render(FOLLOWUP, context)?,
        })
    }

    pub fn stalled_notice(
        &self,
        context: &QuoteEmailContext,
    ) -> Result<RenderedEmail, TemplateError> {
        Ok(RenderedEmail {
            subject: format!(
                "Customer Still Deciding - {} - {}",
                context.customer_name, context.final_price
            ),
            body: self.render(STALLED_NOTICE, context)?,
        })
    }

    pub fn outside_area(&self, context: &QuoteEmailContext) -> Result<RenderedEmail, TemplateError> {
        Ok(RenderedEmail {
            subject: format!(
                "Outside Service Area Request - {} - {}",
                context.customer_name, context.address
            ),
            body: self.render(OUTSIDE_AREA, context)?,
        })
    }

    fn render(&self, name: &str, context: &QuoteEmailContext) -> Result<String, TemplateError> {
        let context = Context::from_serialize(context)?;
        Ok(self.tera.render(name, &context)?)
    }

    /// Renders an admin template when one is configured. A broken admin
    /// template falls back to the built-in one so the customer still gets mail.
    fn render_with_override(
        &self,
        builtin: &str,
        custom: Option<&str>,
        context: &QuoteEmailContext,
    ) -> Result<String, TemplateError> {
        let Some(custom) = custom.filter(|template| !template.trim().is_empty()) else {
            return self.render(builtin, context);
        };

        let tera_context = Context::from_serialize(context)?;
        match Tera::one_off(custom, &tera_context, false) {
            Ok(body) => Ok(body),
            Err(error) => {
                warn!(
                    event_name = "notify.template.override_failed",
                    template = builtin,
                    error = %error,
                    "custom email template failed to render; using built-in template"
                );
                self.render(builtin, context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use clearview_core::domain::quote::{AdditionalServices, GridType, QuoteFields, WindowDetails};
    use clearview_core::domain::settings::{DiscountType, Settings};

    use super::{maps_url, EmailTemplates, QuoteEmailContext};

    fn fields() -> QuoteFields {
        QuoteFields {
            customer_name: Some("Dana Reyes".to_string()),
            customer_email: Some("dana@example.com".to_string()),
            customer_phone: Some("555-0100".to_string()),
            address: Some("12 Harbor Lane, Austin TX".to_string()),
            stories: Some(2),
            service_type: Some("Exterior Only Cleaning".to_string()),
            square_footage: Some(2000),
            addons: vec!["Screen Cleaning".to_string()],
            has_skylights: true,
            additional_services: AdditionalServices { gutter_cleaning: true, ..Default::default() },
            window_details: WindowDetails {
                grid_type: GridType::BetweenPanes,
                upper_windows_open_inside: true,
                ..WindowDetails::default()
            },
            final_price: Some(Decimal::from(1240)),
            ..QuoteFields::default()
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 15, 30, 0).single().expect("valid timestamp")
    }

    #[test]
    fn business_notification_lists_everything_staff_needs() {
        let templates = EmailTemplates::new().expect("templates");
        let settings = Settings::default();
        let context = QuoteEmailContext::new(&fields(), &settings, now());

        let email = templates.business_notification(&context, &settings).expect("render");

        assert_eq!(email.subject, "New Window Cleaning Quote Request - $1,240 - Dana Reyes");
        assert!(email.body.contains("- Name: Dana Reyes"));
        assert!(email.body.contains("- Screen Cleaning"));
        assert!(email.body.contains("skylights"));
        assert!(email.body.contains("- Gutter Cleaning"));
        assert!(email.body.contains("Window Grids: Grids between panes"));
        assert!(email.body.contains("Upper Windows Open Inward: YES"));
        assert!(email.body.contains("on-site estimate"));
        assert!(email.body.contains("query=12+Harbor+Lane%2C+Austin+TX"));
    }

    #[test]
    fn customer_confirmation_shows_crossed_out_price_when_discounting() {
        let templates = EmailTemplates::new().expect("templates");
        let settings = Settings {
            discount_enabled: true,
            discount_type: DiscountType::Actual,
            discount_percentage: 15,
            ..Settings::default()
        };
        let mut quote = fields();
        quote.final_price = Some(Decimal::from(204));
        let context = QuoteEmailContext::new(&quote, &settings, now());

        let email = templates.customer_confirmation(&context, &settings).expect("render");

        assert_eq!(email.subject, "Quote Confirmation - Window Cleaning Service - $204");
        assert!(email.body.contains("Regular Price: $240"));
        assert!(email.body.contains("15% off"));
        assert!(email.body.contains("Total Quote: $204"));
    }

    #[test]
    fn admin_template_uses_camel_case_placeholders() {
        let templates = EmailTemplates::new().expect("templates");
        let settings = Settings {
            customer_email_template: Some(
                "Hi {{customerName}}, your {{serviceType}} quote is {{finalPrice}}.".to_string(),
            ),
            ..Settings::default()
        };
        let context = QuoteEmailContext::new(&fields(), &settings, now());

        let email = templates.customer_confirmation(&context, &settings).expect("render");
        assert_eq!(email.body, "Hi Dana Reyes, your Exterior Only Cleaning quote is $1,240.");
    }

    #[test]
    fn broken_admin_template_falls_back_to_builtin() {
        let templates = EmailTemplates::new().expect("templates");
        let settings = Settings {
            business_email_template: Some("{{ customerName ".to_string()),
            ..Settings::default()
        };
        let context = QuoteEmailContext::new(&fields(), &settings, now());

        let email = templates.business_notification(&context, &settings).expect("render");
        assert!(email.body.starts_with("NEW WINDOW CLEANING QUOTE REQUEST"));
    }

    #[test]
    fn followup_includes_summary_offer_and_footer() {
        let templates = EmailTemplates::new().expect("templates");
        let settings = Settings {
            business_name: "Sparkle Panes".to_string(),
            ..Settings::default()
        };
        let context = QuoteEmailContext::new(&fields(), &settings, now());

        let email = templates.followup(&context).expect("render");

        assert_eq!(email.subject, "Dana Reyes, how can we win your business?");
        assert!(email.body.contains("Your Quote Summary"));
        assert!(email.body.contains("Estimated Price: $1,240"));
        assert!(email.body.contains("Why Choose Sparkle Panes?"));
        assert!(email.body.contains("10% off your first service"));
        assert!(email.body.contains("48 hours"));
        assert!(email.body.contains("(555) 123-4567 | info@windowcleaning.com"));
    }

    #[test]
    fn followup_without_price_omits_summary() {
        let templates = EmailTemplates::new().expect("templates");
        let mut quote = fields();
        quote.final_price = None;
        let context = QuoteEmailContext::new(&quote, &Settings::default(), now());

        let email = templates.followup(&context).expect("render");
        assert!(!email.body.contains("Your Quote Summary"));
    }

    #[test]
    fn followup_escapes_customer_supplied_html() {
        let templates = EmailTemplates::new().expect("templates");
        let mut quote = fields();
        quote.customer_name = Some("<b>Eve</b>".to_string());
        let context = QuoteEmailContext::new(&quote, &Settings::default(), now());

        let email = templates.followup(&context).expect("render");
        assert!(!email.body.contains("<b>Eve</b>"));
        assert!(email.body.contains("&lt;b&gt;Eve&lt;&#x2F;b&gt;"));
    }

    #[test]
    fn outside_area_mentions_radius_and_contact() {
        let templates = EmailTemplates::new().expect("templates");
        let mut quote = fields();
        quote.distance = Some(Decimal::new(253, 1));
        let context = QuoteEmailContext::new(&quote, &Settings::default(), now());

        let email = templates.outside_area(&context).expect("render");
        assert!(email.subject.starts_with("Outside Service Area Request - Dana Reyes"));
        assert!(email.body.contains("20-mile service area"));
        assert!(email.body.contains("- Distance: 25.3 miles"));
        assert!(email.body.contains("- Phone: 555-0100"));
    }

    #[test]
    fn maps_url_encodes_reserved_characters() {
        assert_eq!(
            maps_url("1 Main St #2"),
            "https://www.google.com/maps/search/?api=1&query=1+Main+St+%232"
        );
    }
}
