use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use clearview_core::domain::service::{Service, ServiceCategory, ServiceId};

use super::{parse_decimal, parse_enum, parse_timestamp, timestamp, RepositoryError, ServiceRepository};
use crate::DbPool;

pub struct SqlServiceRepository {
    pool: DbPool,
}

impl SqlServiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_service(row: &SqliteRow) -> Result<Service, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: Option<String> =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let category: String =
        row.try_get("category").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let per_sqft_price: Option<String> =
        row.try_get("per_sqft_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let flat_fee: Option<String> =
        row.try_get("flat_fee").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let use_both_pricing: bool =
        row.try_get("use_both_pricing").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let minimum_price: Option<String> =
        row.try_get("minimum_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_active: bool =
        row.try_get("is_active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let display_order: i64 =
        row.try_get("display_order").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Service {
        id: ServiceId(id),
        name,
        description,
        category: parse_enum::<ServiceCategory>("category", &category)?,
        per_sqft_price: parse_decimal("per_sqft_price", per_sqft_price)?,
        flat_fee: parse_decimal("flat_fee", flat_fee)?,
        use_both_pricing,
        minimum_price: parse_decimal("minimum_price", minimum_price)?,
        is_active,
        display_order: i32::try_from(display_order)
            .map_err(|e| RepositoryError::Decode(format!("display_order: {e}")))?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait::async_trait]
impl ServiceRepository for SqlServiceRepository {
    async fn list(&self) -> Result<Vec<Service>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT id, name, description, category, per_sqft_price, flat_fee, use_both_pricing,
                    minimum_price, is_active, display_order, created_at, updated_at
             FROM services
             ORDER BY CASE category WHEN 'main' THEN 0 WHEN 'addon' THEN 1 ELSE 2 END,
                      display_order, name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_service).collect::<Result<Vec<_>, _>>()
    }

    async fn find_by_id(&self, id: &ServiceId) -> Result<Option<Service>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, category, per_sqft_price, flat_fee, use_both_pricing,
                    minimum_price, is_active, display_order, created_at, updated_at
             FROM services WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_service(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, service: Service) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO services (id, name, description, category, per_sqft_price, flat_fee,
                                   use_both_pricing, minimum_price, is_active, display_order,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                category = excluded.category,
                per_sqft_price = excluded.per_sqft_price,
                flat_fee = excluded.flat_fee,
                use_both_pricing = excluded.use_both_pricing,
                minimum_price = excluded.minimum_price,
                is_active = excluded.is_active,
                display_order = excluded.display_order,
                updated_at = excluded.updated_at",
        )
        .bind(&service.id.0)
        .bind(&service.name)
        .bind(&service.description)
        .bind(service.category.as_str())
        .bind(service.per_sqft_price.map(|value| value.to_string()))
        .bind(service.flat_fee.map(|value| value.to_string()))
        .bind(service.use_both_pricing)
        .bind(service.minimum_price.map(|value| value.to_string()))
        .bind(service.is_active)
        .bind(i64::from(service.display_order))
        .bind(timestamp(service.created_at))
        .bind(timestamp(service.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict(format!(
                "a {} service named `{}` already exists",
                service.category.as_str(),
                service.name
            ))),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, id: &ServiceId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
