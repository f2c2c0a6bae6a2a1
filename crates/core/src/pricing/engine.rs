use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::service::{active_in_category, find_active, Service, ServiceCategory};
use crate::domain::settings::Settings;
use crate::pricing::discount::DiscountPolicy;

/// Inputs the calculator collects before a price can be shown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceRequest<'a> {
    pub square_footage: u32,
    pub service_type: &'a str,
    pub stories: u32,
    pub addons: &'a [String],
    pub is_post_construction: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCost {
    pub rate: Decimal,
    pub flat: Decimal,
    pub cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonCharge {
    pub name: String,
    pub cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCalculations {
    pub main_service: String,
    pub addons: Vec<String>,
    pub minimum_applied: Option<String>,
}

/// Presentational detail behind a price. Only `PriceQuote::final_price` is
/// authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub square_footage: u32,
    pub service_type: String,
    pub stories: u32,
    pub story_multiplier: Decimal,
    pub story_flat_fee: Decimal,
    pub main_service_cost: Decimal,
    pub post_construction_markup_percentage: Option<Decimal>,
    pub addons: Vec<AddonCharge>,
    pub total_before_minimum: Decimal,
    pub minimum: Option<Decimal>,
    pub minimum_applied: bool,
    pub calculations: PriceCalculations,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub final_price: Decimal,
    pub breakdown: Option<PriceBreakdown>,
}

impl PriceQuote {
    pub fn empty() -> Self {
        Self { final_price: Decimal::ZERO, breakdown: None }
    }

    /// False for the degenerate zero result produced when no main service
    /// matched; such a quote must not be shown to a customer.
    pub fn is_priced(&self) -> bool {
        self.breakdown.is_some()
    }
}

/// Cost of a single service at a given square footage. Story adjustments are
/// only applied to main services and only when a story count is supplied.
pub fn service_cost(
    service: &Service,
    square_footage: Decimal,
    stories: Option<u32>,
    settings: &Settings,
) -> ServiceCost {
    let (mut rate, mut flat) = if service.use_both_pricing {
        (service.per_sqft_price.unwrap_or_default(), service.flat_fee.unwrap_or_default())
    } else if let Some(per_sqft) = service.per_sqft_price {
        (per_sqft, Decimal::ZERO)
    } else if let Some(flat_fee) = service.flat_fee {
        (Decimal::ZERO, flat_fee)
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };

    if let (ServiceCategory::Main, Some(stories)) = (service.category, stories) {
        rate += settings.story_multiplier(stories);
        flat += settings.story_flat_fee(stories);
    }

    ServiceCost { rate, flat, cost: rate * square_footage + flat }
}

pub fn compute_price(request: &PriceRequest<'_>, services: &[Service], settings: &Settings) -> PriceQuote {
    if request.square_footage == 0 {
        return PriceQuote::empty();
    }
    let Some(main) = find_active(services, request.service_type, ServiceCategory::Main) else {
        return PriceQuote::empty();
    };

    let square_footage = Decimal::from(request.square_footage);
    let main_cost = service_cost(main, square_footage, Some(request.stories), settings);
    let mut total = main_cost.cost;

    let markup = request
        .is_post_construction
        .then_some(settings.post_construction_markup_percentage);
    if let Some(percentage) = markup {
        total *= Decimal::ONE + percentage / Decimal::ONE_HUNDRED;
    }

    let mut addons = Vec::new();
    for name in request.addons {
        let Some(addon) = find_active(services, name, ServiceCategory::Addon) else {
            continue;
        };
        let cost = service_cost(addon, square_footage, None, settings).cost;
        total += cost;
        addons.push(AddonCharge { name: addon.name.clone(), cost });
    }

    let minimum = main.minimum_price;
    let floor = minimum.unwrap_or_default();
    let minimum_applied = floor > total;
    let final_price = round_currency(total.max(floor));

    let calculations = PriceCalculations {
        main_service: describe_main_service(main, request, settings),
        addons: addons
            .iter()
            .map(|charge| format!("{}: {}", charge.name, format_currency(charge.cost)))
            .collect(),
        minimum_applied: minimum_applied
            .then(|| format!("Minimum of {} applied", format_currency(floor))),
    };

    PriceQuote {
        final_price,
        breakdown: Some(PriceBreakdown {
            square_footage: request.square_footage,
            service_type: main.name.clone(),
            stories: request.stories,
            story_multiplier: settings.story_multiplier(request.stories),
            story_flat_fee: settings.story_flat_fee(request.stories),
            main_service_cost: main_cost.cost,
            post_construction_markup_percentage: markup,
            addons,
            total_before_minimum: total,
            minimum,
            minimum_applied,
            calculations,
        }),
    }
}

fn describe_main_service(main: &Service, request: &PriceRequest<'_>, settings: &Settings) -> String {
    let per_sqft = main.per_sqft_price.unwrap_or_default();
    let flat = main.flat_fee.unwrap_or_default();
    let story_rate = settings.story_multiplier(request.stories);
    let story_flat = settings.story_flat_fee(request.stories);
    let square_footage = Decimal::from(request.square_footage);
    let rate = per_sqft + story_rate;
    let per_sqft_line = format!(
        "{} sq ft × {}/sq ft = {}",
        request.square_footage,
        format_rate(rate),
        format_currency(rate * square_footage)
    );

    if main.use_both_pricing {
        if flat > Decimal::ZERO || story_flat > Decimal::ZERO {
            return format!("{per_sqft_line} + Flat Fee: {}", format_currency(flat + story_flat));
        }
        return per_sqft_line;
    }
    if per_sqft > Decimal::ZERO {
        if story_flat > Decimal::ZERO {
            return format!("{per_sqft_line} + Story Flat Fee: {}", format_currency(story_flat));
        }
        return per_sqft_line;
    }
    if flat > Decimal::ZERO {
        return format!("Flat Fee: {}", format_currency(flat + story_flat));
    }
    String::new()
}

/// Price listed beside one selectable service for the current property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionPrice {
    pub service_id: String,
    pub name: String,
    pub category: ServiceCategory,
    pub listed_price: Decimal,
}

/// Listed prices for every active main service and add-on. Main services are
/// priced at the given story count and floored at their minimum; add-ons
/// carry no story adjustment.
pub fn option_prices(
    services: &[Service],
    square_footage: u32,
    stories: u32,
    settings: &Settings,
    policy: &DiscountPolicy,
) -> Vec<OptionPrice> {
    let square_footage = Decimal::from(square_footage);
    let mains = active_in_category(services, ServiceCategory::Main).into_iter().map(|service| {
        let cost = service_cost(service, square_footage, Some(stories), settings).cost;
        (service, cost.max(service.minimum_price.unwrap_or_default()))
    });
    let addons = active_in_category(services, ServiceCategory::Addon)
        .into_iter()
        .map(|service| (service, service_cost(service, square_footage, None, settings).cost));

    mains
        .chain(addons)
        .map(|(service, cost)| OptionPrice {
            service_id: service.id.0.clone(),
            name: service.name.clone(),
            category: service.category,
            listed_price: policy.listed_price(cost),
        })
        .collect()
}

/// Rounds to whole currency units, halves away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// `$1,240` style whole-dollar formatting.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = round_currency(amount);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{sign}${}", group_thousands(&rounded.abs().trunc().to_string()))
}

fn format_rate(rate: Decimal) -> String {
    format!("${:.2}", rate.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
