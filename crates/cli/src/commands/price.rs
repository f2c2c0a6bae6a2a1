use clearview_core::domain::service::Service;
use clearview_core::domain::settings::Settings;
use clearview_core::pricing::{compute_price, format_currency, DiscountPolicy, PriceRequest};
use clearview_db::repositories::{
    ServiceRepository, SettingsRepository, SqlServiceRepository, SqlSettingsRepository,
};
use serde_json::json;

use crate::commands::{open_migrated, prepare, CommandResult, Failure, EXIT_INPUT, EXIT_MIGRATION};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceArgs {
    pub square_footage: u32,
    pub service: String,
    pub stories: u32,
    pub addons: Vec<String>,
    pub post_construction: bool,
}

/// Prices a hypothetical quote against the live catalog and settings.
pub fn run(args: PriceArgs) -> CommandResult {
    if args.square_footage == 0 {
        return CommandResult::failure(
            "price",
            "invalid_input",
            "square footage must be greater than zero",
            EXIT_INPUT,
        );
    }

    let (config, runtime) = match prepare() {
        Ok(prepared) => prepared,
        Err(failure) => return CommandResult::from_failure("price", failure),
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let catalog = SqlServiceRepository::new(pool.clone())
            .list()
            .await
            .map_err(|error| ("catalog_read", error.to_string(), EXIT_MIGRATION));
        let settings = SqlSettingsRepository::new(pool.clone())
            .get_or_init()
            .await
            .map_err(|error| ("catalog_read", error.to_string(), EXIT_MIGRATION));
        pool.close().await;
        Ok::<(Vec<Service>, Settings), Failure>((catalog?, settings?))
    });

    match result {
        Ok((catalog, settings)) => price_against(&args, &catalog, &settings),
        Err(failure) => CommandResult::from_failure("price", failure),
    }
}

fn price_against(args: &PriceArgs, catalog: &[Service], settings: &Settings) -> CommandResult {
    let request = PriceRequest {
        square_footage: args.square_footage,
        service_type: &args.service,
        stories: args.stories,
        addons: &args.addons,
        is_post_construction: args.post_construction,
    };
    let quote = compute_price(&request, catalog, settings);
    if !quote.is_priced() {
        return CommandResult::failure(
            "price",
            "invalid_input",
            format!("no active main service named `{}`", args.service),
            EXIT_INPUT,
        );
    }

    let display = DiscountPolicy::from_settings(settings).apply(quote.final_price);
    let message = if display.original > display.charged {
        format!(
            "{} (was {}, {}% off)",
            format_currency(display.charged),
            format_currency(display.original),
            display.percentage
        )
    } else {
        format_currency(display.charged)
    };

    CommandResult::success_with_data(
        "price",
        message,
        Some(json!({
            "final_price": display.charged,
            "display_price": display,
            "breakdown": quote.breakdown,
        })),
    )
}
