use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use clearview_core::domain::settings::{DiscountType, Settings};

use super::{
    parse_decimal, parse_enum, parse_json, parse_timestamp, timestamp, to_json, RepositoryError,
    SettingsRepository,
};
use crate::DbPool;

/// Key of the single settings row.
pub const SETTINGS_ROW_ID: &str = "default";

pub struct SqlSettingsRepository {
    pool: DbPool,
}

impl SqlSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self) -> Result<Option<Settings>, RepositoryError> {
        let row = sqlx::query(
            "SELECT business_name, business_address, business_phone, business_email, logo_url,
                    primary_color, secondary_color, form_title, form_subtitle,
                    notification_emails, business_email_template, customer_email_template,
                    discount_enabled, discount_percentage, discount_type,
                    post_construction_markup_percentage, service_radius_miles,
                    outside_area_message, story_multipliers, story_flat_fees, updated_at
             FROM business_settings WHERE id = ?",
        )
        .bind(SETTINGS_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_settings(r)?)),
            None => Ok(None),
        }
    }
}

fn row_to_settings(row: &SqliteRow) -> Result<Settings, RepositoryError> {
    let text = |column: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
    };

    let business_name: String =
        row.try_get("business_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let notification_emails: String =
        row.try_get("notification_emails").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let discount_enabled: bool =
        row.try_get("discount_enabled").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let discount_percentage: i64 =
        row.try_get("discount_percentage").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let discount_type: String =
        row.try_get("discount_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let markup: String = row
        .try_get("post_construction_markup_percentage")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let radius: String =
        row.try_get("service_radius_miles").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let story_multipliers: String =
        row.try_get("story_multipliers").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let story_flat_fees: String =
        row.try_get("story_flat_fees").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Settings {
        business_name,
        business_address: text("business_address")?,
        business_phone: text("business_phone")?,
        business_email: text("business_email")?,
        logo_url: text("logo_url")?,
        primary_color: text("primary_color")?,
        secondary_color: text("secondary_color")?,
        form_title: text("form_title")?,
        form_subtitle: text("form_subtitle")?,
        notification_emails: parse_json("notification_emails", &notification_emails)?,
        business_email_template: text("business_email_template")?,
        customer_email_template: text("customer_email_template")?,
        discount_enabled,
        discount_percentage: u32::try_from(discount_percentage)
            .map_err(|e| RepositoryError::Decode(format!("discount_percentage: {e}")))?,
        discount_type: parse_enum::<DiscountType>("discount_type", &discount_type)?,
        post_construction_markup_percentage: required_decimal(
            "post_construction_markup_percentage",
            markup,
        )?,
        service_radius_miles: required_decimal("service_radius_miles", radius)?,
        outside_area_message: text("outside_area_message")?,
        story_multipliers: parse_json("story_multipliers", &story_multipliers)?,
        story_flat_fees: parse_json("story_flat_fees", &story_flat_fees)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn required_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    parse_decimal(column, Some(value))?
        .ok_or_else(|| RepositoryError::Decode(format!("{column}: missing value")))
}

#[async_trait::async_trait]
impl SettingsRepository for SqlSettingsRepository {
    async fn get_or_init(&self) -> Result<Settings, RepositoryError> {
        if let Some(settings) = self.fetch().await? {
            return Ok(settings);
        }

        let defaults = Settings::default();
        self.save(&defaults).await?;
        // A concurrent initializer may have won; read back whichever row stuck.
        self.fetch()
            .await?
            .ok_or_else(|| RepositoryError::Decode("settings row missing after init".to_string()))
    }

    async fn save(&self, settings: &Settings) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO business_settings (id, business_name, business_address, business_phone,
                                            business_email, logo_url, primary_color,
                                            secondary_color, form_title, form_subtitle,
                                            notification_emails, business_email_template,
                                            customer_email_template, discount_enabled,
                                            discount_percentage, discount_type,
                                            post_construction_markup_percentage,
                                            service_radius_miles, outside_area_message,
                                            story_multipliers, story_flat_fees, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                business_name = excluded.business_name,
                business_address = excluded.business_address,
                business_phone = excluded.business_phone,
                business_email = excluded.business_email,
                logo_url = excluded.logo_url,
                primary_color = excluded.primary_color,
                secondary_color = excluded.secondary_color,
                form_title = excluded.form_title,
                form_subtitle = excluded.form_subtitle,
                notification_emails = excluded.notification_emails,
                business_email_template = excluded.business_email_template,
                customer_email_template = excluded.customer_email_template,
                discount_enabled = excluded.discount_enabled,
                discount_percentage = excluded.discount_percentage,
                discount_type = excluded.discount_type,
                post_construction_markup_percentage = excluded.post_construction_markup_percentage,
                service_radius_miles = excluded.service_radius_miles,
                outside_area_message = excluded.outside_area_message,
                story_multipliers = excluded.story_multipliers,
                story_flat_fees = excluded.story_flat_fees,
                updated_at = excluded.updated_at",
        )
        .bind(SETTINGS_ROW_ID)
        .bind(&settings.business_name)
        .bind(&settings.business_address)
        .bind(&settings.business_phone)
        .bind(&settings.business_email)
        .bind(&settings.logo_url)
        .bind(&settings.primary_color)
        .bind(&settings.secondary_color)
        .bind(&settings.form_title)
        .bind(&settings.form_subtitle)
        .bind(to_json("notification_emails", &settings.notification_emails)?)
        .bind(&settings.business_email_template)
        .bind(&settings.customer_email_template)
        .bind(settings.discount_enabled)
        .bind(i64::from(settings.discount_percentage))
        .bind(settings.discount_type.as_str())
        .bind(settings.post_construction_markup_percentage.to_string())
        .bind(settings.service_radius_miles.to_string())
        .bind(&settings.outside_area_message)
        .bind(to_json("story_multipliers", &settings.story_multipliers)?)
        .bind(to_json("story_flat_fees", &settings.story_flat_fees)?)
        .bind(timestamp(settings.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
