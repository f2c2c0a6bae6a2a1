use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use clearview_core::domain::quote::{
    GridType, PanesPerWindow, QuoteFields, QuoteId, QuoteRecord, QuoteStatus, SaveAction,
    SaveOutcome, WindowDetails,
};

use super::{
    parse_decimal, parse_enum, parse_json, parse_timestamp, timestamp, to_json, QuoteRepository,
    RepositoryError,
};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, customer_name, customer_email, customer_phone, address, stories,
    service_type, square_footage, addons, has_skylights, additional_services,
    is_post_construction, grid_type, upper_windows_open_inside, panes_per_window,
    window_manufacturer, distance, final_price, quote_data, status, last_step_completed,
    followup_sent_at, created_at, updated_at";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        id: &QuoteId,
        columns: &BoundColumns,
        now: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO quotes (id, customer_name, customer_email, customer_phone, address,
                                 stories, service_type, square_footage, addons, has_skylights,
                                 additional_services, is_post_construction, grid_type,
                                 upper_windows_open_inside, panes_per_window, window_manufacturer,
                                 distance, final_price, quote_data, status, last_step_completed,
                                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(&columns.fields.customer_name)
        .bind(&columns.fields.customer_email)
        .bind(&columns.fields.customer_phone)
        .bind(&columns.fields.address)
        .bind(columns.fields.stories.map(i64::from))
        .bind(&columns.fields.service_type)
        .bind(columns.fields.square_footage.map(i64::from))
        .bind(&columns.addons)
        .bind(columns.fields.has_skylights)
        .bind(&columns.additional_services)
        .bind(columns.fields.window_details.is_post_construction)
        .bind(&columns.grid_type)
        .bind(columns.fields.window_details.upper_windows_open_inside)
        .bind(&columns.panes_per_window)
        .bind(&columns.fields.window_details.window_manufacturer)
        .bind(columns.fields.distance.map(|value| value.to_string()))
        .bind(columns.fields.final_price.map(|value| value.to_string()))
        .bind(&columns.quote_data)
        .bind(columns.fields.status.as_str())
        .bind(i64::from(columns.fields.last_step_completed))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(
        &self,
        id: &QuoteId,
        columns: &BoundColumns,
        now: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE quotes SET
                 customer_name = ?, customer_email = ?, customer_phone = ?, address = ?,
                 stories = ?, service_type = ?, square_footage = ?, addons = ?,
                 has_skylights = ?, additional_services = ?, is_post_construction = ?,
                 grid_type = ?, upper_windows_open_inside = ?, panes_per_window = ?,
                 window_manufacturer = ?, distance = ?, final_price = ?, quote_data = ?,
                 status = ?, last_step_completed = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&columns.fields.customer_name)
        .bind(&columns.fields.customer_email)
        .bind(&columns.fields.customer_phone)
        .bind(&columns.fields.address)
        .bind(columns.fields.stories.map(i64::from))
        .bind(&columns.fields.service_type)
        .bind(columns.fields.square_footage.map(i64::from))
        .bind(&columns.addons)
        .bind(columns.fields.has_skylights)
        .bind(&columns.additional_services)
        .bind(columns.fields.window_details.is_post_construction)
        .bind(&columns.grid_type)
        .bind(columns.fields.window_details.upper_windows_open_inside)
        .bind(&columns.panes_per_window)
        .bind(&columns.fields.window_details.window_manufacturer)
        .bind(columns.fields.distance.map(|value| value.to_string()))
        .bind(columns.fields.final_price.map(|value| value.to_string()))
        .bind(&columns.quote_data)
        .bind(columns.fields.status.as_str())
        .bind(i64::from(columns.fields.last_step_completed))
        .bind(now)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Column values that need encoding before binding.
struct BoundColumns {
    fields: QuoteFields,
    addons: String,
    additional_services: String,
    grid_type: String,
    panes_per_window: String,
    quote_data: String,
}

impl BoundColumns {
    fn encode(fields: QuoteFields) -> Result<Self, RepositoryError> {
        Ok(Self {
            addons: to_json("addons", &fields.addons)?,
            additional_services: to_json("additional_services", &fields.additional_services)?,
            grid_type: enum_text("grid_type", &fields.window_details.grid_type)?,
            panes_per_window: enum_text("panes_per_window", &fields.window_details.panes_per_window)?,
            quote_data: to_json("quote_data", &fields.quote_data)?,
            fields,
        })
    }
}

fn enum_text<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(value) {
        Ok(Value::String(text)) => Ok(text),
        Ok(other) => Err(RepositoryError::Decode(format!("{column}: unexpected encoding {other}"))),
        Err(e) => Err(RepositoryError::Decode(format!("{column}: {e}"))),
    }
}

fn text_enum<T: serde::de::DeserializeOwned>(column: &str, value: String) -> Result<T, RepositoryError> {
    serde_json::from_value(Value::String(value))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn optional_u32(column: &str, value: Option<i64>) -> Result<Option<u32>, RepositoryError> {
    value
        .map(|raw| u32::try_from(raw).map_err(|e| RepositoryError::Decode(format!("{column}: {e}"))))
        .transpose()
}

pub(crate) fn row_to_quote(row: &SqliteRow) -> Result<QuoteRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_name: Option<String> =
        row.try_get("customer_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_email: Option<String> =
        row.try_get("customer_email").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_phone: Option<String> =
        row.try_get("customer_phone").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let address: Option<String> =
        row.try_get("address").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let stories: Option<i64> =
        row.try_get("stories").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let service_type: Option<String> =
        row.try_get("service_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let square_footage: Option<i64> =
        row.try_get("square_footage").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let addons: String =
        row.try_get("addons").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let has_skylights: bool =
        row.try_get("has_skylights").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let additional_services: String =
        row.try_get("additional_services").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_post_construction: bool =
        row.try_get("is_post_construction").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let grid_type: String =
        row.try_get("grid_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let upper_windows_open_inside: bool = row
        .try_get("upper_windows_open_inside")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let panes_per_window: String =
        row.try_get("panes_per_window").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let window_manufacturer: Option<String> =
        row.try_get("window_manufacturer").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let distance: Option<String> =
        row.try_get("distance").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let final_price: Option<String> =
        row.try_get("final_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quote_data: String =
        row.try_get("quote_data").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let last_step_completed: i64 =
        row.try_get("last_step_completed").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let followup_sent_at: Option<String> =
        row.try_get("followup_sent_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let grid_type: GridType = text_enum("grid_type", grid_type)?;
    let panes_per_window: PanesPerWindow = text_enum("panes_per_window", panes_per_window)?;

    Ok(QuoteRecord {
        id: QuoteId(id),
        fields: QuoteFields {
            customer_name,
            customer_email,
            customer_phone,
            address,
            stories: optional_u32("stories", stories)?,
            service_type,
            square_footage: optional_u32("square_footage", square_footage)?,
            addons: parse_json("addons", &addons)?,
            has_skylights,
            additional_services: parse_json("additional_services", &additional_services)?,
            window_details: WindowDetails {
                is_post_construction,
                grid_type,
                upper_windows_open_inside,
                panes_per_window,
                window_manufacturer,
            },
            distance: parse_decimal("distance", distance)?,
            final_price: parse_decimal("final_price", final_price)?,
            status: parse_enum::<QuoteStatus>("status", &status)?,
            last_step_completed: u8::try_from(last_step_completed)
                .map_err(|e| RepositoryError::Decode(format!("last_step_completed: {e}")))?,
            quote_data: parse_json("quote_data", &quote_data)?,
        },
        followup_sent_at: followup_sent_at
            .as_deref()
            .map(|value| parse_timestamp("followup_sent_at", value))
            .transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<QuoteRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_quote(r)?)),
            None => Ok(None),
        }
    }

    async fn save_draft(
        &self,
        existing: Option<&QuoteId>,
        fields: QuoteFields,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome, RepositoryError> {
        let columns = BoundColumns::encode(fields)?;
        let now = timestamp(now);

        if let Some(id) = existing {
            if self.update(id, &columns, &now).await? {
                return Ok(SaveOutcome { id: id.clone(), action: SaveAction::Updated });
            }
        }

        let id = QuoteId::generate();
        self.insert(&id, &columns, &now).await?;
        Ok(SaveOutcome { id, action: SaveAction::Created })
    }

    async fn list(
        &self,
        status: Option<QuoteStatus>,
        limit: u32,
    ) -> Result<Vec<QuoteRecord>, RepositoryError> {
        let rows: Vec<SqliteRow> = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {QUOTE_COLUMNS} FROM quotes
                 WHERE status = ?
                 ORDER BY created_at DESC
                 LIMIT ?"
            ))
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {QUOTE_COLUMNS} FROM quotes
                 ORDER BY created_at DESC
                 LIMIT ?"
            ))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_quote).collect::<Result<Vec<_>, _>>()
    }

    async fn followup_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QuoteRecord>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes
             WHERE status = 'incomplete'
               AND created_at < ?
               AND followup_sent_at IS NULL
               AND TRIM(IFNULL(customer_email, '')) != ''
               AND TRIM(IFNULL(customer_name, '')) != ''
             ORDER BY created_at ASC"
        ))
        .bind(timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_quote).collect::<Result<Vec<_>, _>>()
    }

    async fn has_later_submission(&self, candidate: &QuoteRecord) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM quotes
             WHERE status = 'submitted'
               AND customer_email IS ?
               AND customer_phone IS ?
               AND created_at >= ?",
        )
        .bind(&candidate.fields.customer_email)
        .bind(&candidate.fields.customer_phone)
        .bind(timestamp(candidate.created_at))
        .fetch_one(&self.pool)
        .await?
        .try_get("count")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(count > 0)
    }

    async fn mark_followup_sent(
        &self,
        id: &QuoteId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE quotes SET followup_sent_at = ? WHERE id = ? AND followup_sent_at IS NULL",
        )
        .bind(timestamp(at))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use clearview_core::domain::quote::{
        GridType, PanesPerWindow, QuoteFields, QuoteId, QuoteStatus, SaveAction, WindowDetails,
    };

    use super::SqlQuoteRepository;
    use crate::repositories::QuoteRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, SqlQuoteRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        (pool.clone(), SqlQuoteRepository::new(pool))
    }

    fn draft(email: &str, phone: &str) -> QuoteFields {
        QuoteFields {
            customer_name: Some("Dana Reyes".to_string()),
            customer_email: Some(email.to_string()),
            customer_phone: Some(phone.to_string()),
            address: Some("12 Harbor Lane".to_string()),
            stories: Some(2),
            service_type: Some("Exterior Only Cleaning".to_string()),
            square_footage: Some(2000),
            addons: vec!["Screen Cleaning".to_string()],
            window_details: WindowDetails {
                grid_type: GridType::BetweenPanes,
                panes_per_window: PanesPerWindow::ThreePlus,
                window_manufacturer: Some("Pella".to_string()),
                ..WindowDetails::default()
            },
            distance: Some(Decimal::new(125, 1)),
            final_price: Some(Decimal::from(240)),
            quote_data: json!({ "formStep": 2 }),
            last_step_completed: 1,
            ..QuoteFields::default()
        }
    }

    #[tokio::test]
    async fn save_draft_creates_then_updates_in_place() {
        let (_pool, repo) = setup().await;
        let t0 = Utc::now();

        let created = repo.save_draft(None, draft("dana@example.com", "555-0100"), t0).await
            .expect("create");
        assert_eq!(created.action, SaveAction::Created);

        let first = repo.find_by_id(&created.id).await.expect("find").expect("row exists");
        assert_eq!(first.fields.window_details.grid_type, GridType::BetweenPanes);
        assert_eq!(first.fields.window_details.panes_per_window, PanesPerWindow::ThreePlus);
        assert_eq!(first.fields.distance, Some(Decimal::new(125, 1)));
        assert_eq!(first.fields.addons, vec!["Screen Cleaning".to_string()]);

        let mut next = draft("dana@example.com", "555-0100");
        next.last_step_completed = 2;
        next.final_price = Some(Decimal::from(262));
        let updated = repo
            .save_draft(Some(&created.id), next, t0 + Duration::seconds(5))
            .await
            .expect("update");
        assert_eq!(updated.action, SaveAction::Updated);
        assert_eq!(updated.id, created.id);

        let second = repo.find_by_id(&created.id).await.expect("find").expect("row exists");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.fields.last_step_completed, 2);
        assert_eq!(second.fields.final_price, Some(Decimal::from(262)));
        assert_eq!(repo.list(None, 50).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn retrying_the_same_save_is_idempotent() {
        let (_pool, repo) = setup().await;
        let now = Utc::now();
        let created =
            repo.save_draft(None, draft("a@example.com", "1"), now).await.expect("create");

        for _ in 0..3 {
            repo.save_draft(Some(&created.id), draft("a@example.com", "1"), now)
                .await
                .expect("retry");
        }

        let rows = repo.list(None, 50).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields, draft("a@example.com", "1"));
    }

    #[tokio::test]
    async fn unknown_existing_id_creates_a_new_row() {
        let (_pool, repo) = setup().await;
        let missing = QuoteId("does-not-exist".to_string());

        let outcome = repo
            .save_draft(Some(&missing), draft("b@example.com", "2"), Utc::now())
            .await
            .expect("save");

        assert_eq!(outcome.action, SaveAction::Created);
        assert_ne!(outcome.id, missing);
    }

    #[tokio::test]
    async fn followup_candidates_exclude_recent_contacted_and_anonymous_drafts() {
        let (_pool, repo) = setup().await;
        let now = Utc::now();
        let old = now - Duration::minutes(30);

        let eligible = repo.save_draft(None, draft("old@example.com", "1"), old).await.expect("old");
        repo.save_draft(None, draft("new@example.com", "2"), now).await.expect("recent");
        let contacted =
            repo.save_draft(None, draft("done@example.com", "3"), old).await.expect("contacted");
        repo.mark_followup_sent(&contacted.id, now).await.expect("mark");
        let mut anonymous = draft("", "4");
        anonymous.customer_email = None;
        repo.save_draft(None, anonymous, old).await.expect("anonymous");
        let mut submitted = draft("sub@example.com", "5");
        submitted.status = QuoteStatus::Submitted;
        repo.save_draft(None, submitted, old).await.expect("submitted");

        let candidates =
            repo.followup_candidates(now - Duration::minutes(10)).await.expect("candidates");
        let ids: Vec<_> = candidates.iter().map(|quote| quote.id.clone()).collect();
        assert_eq!(ids, vec![eligible.id]);
    }

    #[tokio::test]
    async fn later_submission_with_same_contact_is_detected() {
        let (_pool, repo) = setup().await;
        let t0 = Utc::now() - Duration::minutes(30);

        let draft_outcome =
            repo.save_draft(None, draft("dana@example.com", "555-0100"), t0).await.expect("draft");
        let candidate = repo.find_by_id(&draft_outcome.id).await.expect("find").expect("row");
        assert!(!repo.has_later_submission(&candidate).await.expect("check"));

        let mut other_phone = draft("dana@example.com", "555-0199");
        other_phone.status = QuoteStatus::Submitted;
        repo.save_draft(None, other_phone, t0 + Duration::minutes(1)).await.expect("other");
        assert!(!repo.has_later_submission(&candidate).await.expect("check"));

        let mut submitted = draft("dana@example.com", "555-0100");
        submitted.status = QuoteStatus::Submitted;
        repo.save_draft(None, submitted, t0 + Duration::minutes(2)).await.expect("submitted");
        assert!(repo.has_later_submission(&candidate).await.expect("check"));
    }

    #[tokio::test]
    async fn followup_mark_is_set_exactly_once() {
        let (_pool, repo) = setup().await;
        let created =
            repo.save_draft(None, draft("c@example.com", "3"), Utc::now()).await.expect("create");

        assert!(repo.mark_followup_sent(&created.id, Utc::now()).await.expect("first mark"));
        assert!(!repo.mark_followup_sent(&created.id, Utc::now()).await.expect("second mark"));

        let stored = repo.find_by_id(&created.id).await.expect("find").expect("row");
        assert!(stored.followup_sent_at.is_some());
    }

    #[tokio::test]
    async fn list_filters_by_status_newest_first() {
        let (_pool, repo) = setup().await;
        let t0 = Utc::now();
        let older = repo.save_draft(None, draft("1@example.com", "1"), t0).await.expect("older");
        let newer = repo
            .save_draft(None, draft("2@example.com", "2"), t0 + Duration::seconds(1))
            .await
            .expect("newer");
        let mut outside = draft("3@example.com", "3");
        outside.status = QuoteStatus::OutsideArea;
        repo.save_draft(None, outside, t0).await.expect("outside");

        let incomplete = repo.list(Some(QuoteStatus::Incomplete), 10).await.expect("list");
        let ids: Vec<_> = incomplete.into_iter().map(|quote| quote.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        let outside_rows = repo.list(Some(QuoteStatus::OutsideArea), 10).await.expect("list");
        assert_eq!(outside_rows.len(), 1);
    }
}
