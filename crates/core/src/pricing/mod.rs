pub mod discount;
pub mod engine;

pub use discount::{DiscountMode, DiscountPolicy, DisplayPrice};
pub use engine::{
    compute_price, format_currency, option_prices, round_currency, service_cost, AddonCharge,
    OptionPrice, PriceBreakdown, PriceCalculations, PriceQuote, PriceRequest, ServiceCost,
};
