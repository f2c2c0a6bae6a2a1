use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::settings::{DiscountType, Settings, MAX_DISCOUNT_PERCENTAGE};
use crate::pricing::engine::round_currency;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountMode {
    None,
    Actual,
    VisualOnly,
}

/// What the customer is charged versus what is shown crossed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPrice {
    pub charged: Decimal,
    pub original: Decimal,
    pub mode: DiscountMode,
    pub percentage: u32,
}

impl DisplayPrice {
    pub fn savings(&self) -> Decimal {
        self.original - self.charged
    }
}

/// Discount policy applied at the display and persistence boundary.
///
/// `Actual` lowers the charged amount. `VisualOnly` never changes what is
/// charged; it inflates the crossed-out "original" instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscountPolicy {
    mode: DiscountMode,
    percentage: u32,
}

impl DiscountPolicy {
    pub fn none() -> Self {
        Self { mode: DiscountMode::None, percentage: 0 }
    }

    pub fn new(mode: DiscountMode, percentage: u32) -> Self {
        if mode == DiscountMode::None {
            return Self::none();
        }
        Self { mode, percentage: percentage.min(MAX_DISCOUNT_PERCENTAGE) }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        if !settings.discount_enabled {
            return Self::none();
        }
        let mode = match settings.discount_type {
            DiscountType::Actual => DiscountMode::Actual,
            DiscountType::VisualOnly => DiscountMode::VisualOnly,
        };
        Self::new(mode, settings.discount_percentage)
    }

    pub fn mode(&self) -> DiscountMode {
        self.mode
    }

    pub fn percentage(&self) -> u32 {
        self.percentage
    }

    fn keep_fraction(&self) -> Decimal {
        Decimal::ONE - Decimal::from(self.percentage) / Decimal::ONE_HUNDRED
    }

    /// Amount persisted as the quote's final price.
    pub fn charged_price(&self, computed: Decimal) -> Decimal {
        match self.mode {
            DiscountMode::Actual => round_currency(computed * self.keep_fraction()),
            DiscountMode::VisualOnly | DiscountMode::None => computed,
        }
    }

    pub fn apply(&self, computed: Decimal) -> DisplayPrice {
        let original = match self.mode {
            DiscountMode::VisualOnly => round_currency(computed / self.keep_fraction()),
            DiscountMode::Actual | DiscountMode::None => computed,
        };
        DisplayPrice {
            charged: self.charged_price(computed),
            original,
            mode: self.mode,
            percentage: self.percentage,
        }
    }

    /// Recovers the crossed-out figure from an already-charged price.
    pub fn original_for_display(&self, final_price: Decimal) -> Decimal {
        match self.mode {
            DiscountMode::Actual | DiscountMode::VisualOnly => {
                round_currency(final_price / self.keep_fraction())
            }
            DiscountMode::None => final_price,
        }
    }

    /// Per-option prices listed next to each service choice. Visual-only
    /// discounts list the inflated figure so the savings stay consistent.
    pub fn listed_price(&self, amount: Decimal) -> Decimal {
        match self.mode {
            DiscountMode::VisualOnly => round_currency(amount / self.keep_fraction()),
            DiscountMode::Actual | DiscountMode::None => round_currency(amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{DiscountMode, DiscountPolicy};
    use crate::domain::settings::{DiscountType, Settings};

    fn settings(enabled: bool, kind: DiscountType, percentage: u32) -> Settings {
        Settings {
            discount_enabled: enabled,
            discount_type: kind,
            discount_percentage: percentage,
            ..Settings::default()
        }
    }

    #[test]
    fn actual_discount_reduces_charged_price() {
        let policy = DiscountPolicy::from_settings(&settings(true, DiscountType::Actual, 15));
        let price = policy.apply(Decimal::from(240));

        assert_eq!(price.charged, Decimal::from(204));
        assert_eq!(price.original, Decimal::from(240));
        assert_eq!(price.savings(), Decimal::from(36));
        assert_eq!(policy.original_for_display(price.charged), Decimal::from(240));
    }

    #[test]
    fn actual_discount_round_trip_is_within_one_unit() {
        for percentage in [0_u32, 5, 10, 15, 20, 33, 50] {
            let policy = DiscountPolicy::new(DiscountMode::Actual, percentage);
            for computed in [99_i64, 150, 240, 387, 1001, 4999] {
                let computed = Decimal::from(computed);
                let charged = policy.charged_price(computed);
                let recovered = policy.original_for_display(charged);
                assert!(
                    (recovered - computed).abs() <= Decimal::ONE,
                    "pct={percentage} computed={computed} recovered={recovered}"
                );
            }
        }
    }

    #[test]
    fn visual_only_never_changes_charged_amount() {
        for percentage in [0_u32, 10, 15, 25, 50] {
            let policy = DiscountPolicy::new(DiscountMode::VisualOnly, percentage);
            for computed in [0_i64, 240, 301, 1875] {
                let computed = Decimal::from(computed);
                assert_eq!(policy.charged_price(computed), computed);
                assert_eq!(policy.apply(computed).charged, computed);
            }
        }

        let policy = DiscountPolicy::new(DiscountMode::VisualOnly, 15);
        assert_eq!(policy.apply(Decimal::from(240)).original, Decimal::from(282));
    }

    #[test]
    fn disabled_discount_is_identity() {
        let policy = DiscountPolicy::from_settings(&settings(false, DiscountType::Actual, 40));
        assert_eq!(policy.mode(), DiscountMode::None);
        let price = policy.apply(Decimal::from(240));
        assert_eq!((price.charged, price.original), (Decimal::from(240), Decimal::from(240)));
        assert_eq!(policy.original_for_display(Decimal::from(240)), Decimal::from(240));
    }

    #[test]
    fn percentage_is_capped() {
        let policy = DiscountPolicy::new(DiscountMode::Actual, 90);
        assert_eq!(policy.percentage(), 50);
        assert_eq!(policy.charged_price(Decimal::from(200)), Decimal::from(100));
    }

    #[test]
    fn listed_price_inflates_only_for_visual_discounts() {
        let visual = DiscountPolicy::new(DiscountMode::VisualOnly, 20);
        assert_eq!(visual.listed_price(Decimal::from(80)), Decimal::from(100));

        let actual = DiscountPolicy::new(DiscountMode::Actual, 20);
        assert_eq!(actual.listed_price(Decimal::new(805, 1)), Decimal::from(81));
    }
}
