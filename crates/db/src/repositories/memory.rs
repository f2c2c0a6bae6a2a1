use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use clearview_core::domain::quote::{
    QuoteFields, QuoteId, QuoteRecord, QuoteStatus, SaveAction, SaveOutcome,
};
use clearview_core::domain::service::{Service, ServiceId};
use clearview_core::domain::settings::Settings;

use super::{QuoteRepository, RepositoryError, ServiceRepository, SettingsRepository};

#[derive(Default)]
pub struct InMemoryQuoteRepository {
    quotes: RwLock<HashMap<String, QuoteRecord>>,
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<QuoteRecord>, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(&id.0).cloned())
    }

    async fn save_draft(
        &self,
        existing: Option<&QuoteId>,
        fields: QuoteFields,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome, RepositoryError> {
        let mut quotes = self.quotes.write().await;

        if let Some(record) = existing.and_then(|id| quotes.get_mut(&id.0)) {
            record.fields = fields;
            record.updated_at = now;
            return Ok(SaveOutcome { id: record.id.clone(), action: SaveAction::Updated });
        }

        let id = QuoteId::generate();
        quotes.insert(
            id.0.clone(),
            QuoteRecord {
                id: id.clone(),
                fields,
                followup_sent_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(SaveOutcome { id, action: SaveAction::Created })
    }

    async fn list(
        &self,
        status: Option<QuoteStatus>,
        limit: u32,
    ) -> Result<Vec<QuoteRecord>, RepositoryError> {
        let quotes = self.quotes.read().await;
        let mut matching: Vec<QuoteRecord> = quotes
            .values()
            .filter(|quote| status.map_or(true, |status| quote.fields.status == status))
            .cloned()
            .collect();
        matching.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn followup_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QuoteRecord>, RepositoryError> {
        let quotes = self.quotes.read().await;
        let mut candidates: Vec<QuoteRecord> =
            quotes.values().filter(|quote| quote.is_followup_candidate(cutoff)).cloned().collect();
        candidates.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(candidates)
    }

    async fn has_later_submission(&self, candidate: &QuoteRecord) -> Result<bool, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.values().any(|quote| quote.supersedes(candidate)))
    }

    async fn mark_followup_sent(
        &self,
        id: &QuoteId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut quotes = self.quotes.write().await;
        match quotes.get_mut(&id.0) {
            Some(quote) if quote.followup_sent_at.is_none() => {
                quote.followup_sent_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryServiceRepository {
    services: RwLock<HashMap<String, Service>>,
}

impl InMemoryServiceRepository {
    pub fn with_services(services: impl IntoIterator<Item = Service>) -> Self {
        Self {
            services: RwLock::new(
                services.into_iter().map(|service| (service.id.0.clone(), service)).collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl ServiceRepository for InMemoryServiceRepository {
    async fn list(&self) -> Result<Vec<Service>, RepositoryError> {
        let services = self.services.read().await;
        let mut all: Vec<Service> = services.values().cloned().collect();
        all.sort_by(|left, right| {
            category_rank(left)
                .cmp(&category_rank(right))
                .then_with(|| left.display_order.cmp(&right.display_order))
                .then_with(|| left.name.cmp(&right.name))
        });
        Ok(all)
    }

    async fn find_by_id(&self, id: &ServiceId) -> Result<Option<Service>, RepositoryError> {
        let services = self.services.read().await;
        Ok(services.get(&id.0).cloned())
    }

    async fn save(&self, service: Service) -> Result<(), RepositoryError> {
        let mut services = self.services.write().await;
        let clash = services.values().any(|existing| {
            existing.id != service.id
                && existing.category == service.category
                && existing.name == service.name
        });
        if clash {
            return Err(RepositoryError::Conflict(format!(
                "a {} service named `{}` already exists",
                service.category.as_str(),
                service.name
            )));
        }
        let created_at =
            services.get(&service.id.0).map(|existing| existing.created_at);
        let mut service = service;
        if let Some(created_at) = created_at {
            service.created_at = created_at;
        }
        services.insert(service.id.0.clone(), service);
        Ok(())
    }

    async fn delete(&self, id: &ServiceId) -> Result<bool, RepositoryError> {
        let mut services = self.services.write().await;
        Ok(services.remove(&id.0).is_some())
    }
}

fn category_rank(service: &Service) -> u8 {
    use clearview_core::domain::service::ServiceCategory;
    match service.category {
        ServiceCategory::Main => 0,
        ServiceCategory::Addon => 1,
        ServiceCategory::Upsell => 2,
    }
}

#[derive(Default)]
pub struct InMemorySettingsRepository {
    settings: RwLock<Option<Settings>>,
}

impl InMemorySettingsRepository {
    pub fn with_settings(settings: Settings) -> Self {
        Self { settings: RwLock::new(Some(settings)) }
    }
}

#[async_trait::async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn get_or_init(&self) -> Result<Settings, RepositoryError> {
        let mut settings = self.settings.write().await;
        Ok(settings.get_or_insert_with(Settings::default).clone())
    }

    async fn save(&self, settings: &Settings) -> Result<(), RepositoryError> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use clearview_core::domain::quote::{QuoteFields, QuoteId, QuoteStatus, SaveAction};
    use clearview_core::domain::service::{Service, ServiceCategory, ServiceId};

    use crate::repositories::{
        InMemoryQuoteRepository, InMemoryServiceRepository, InMemorySettingsRepository,
        QuoteRepository, RepositoryError, ServiceRepository, SettingsRepository,
    };

    fn contact(email: &str) -> QuoteFields {
        QuoteFields {
            customer_name: Some("Sam Ortiz".to_string()),
            customer_email: Some(email.to_string()),
            customer_phone: Some("555-0142".to_string()),
            ..QuoteFields::default()
        }
    }

    #[tokio::test]
    async fn in_memory_quote_repo_upserts_and_preserves_created_at() {
        let repo = InMemoryQuoteRepository::default();
        let t0 = Utc::now();

        let created = repo.save_draft(None, contact("sam@example.com"), t0).await.expect("create");
        let updated = repo
            .save_draft(Some(&created.id), contact("sam@example.com"), t0 + Duration::seconds(3))
            .await
            .expect("update");
        assert_eq!(updated.action, SaveAction::Updated);

        let stored = repo.find_by_id(&created.id).await.expect("find").expect("row");
        assert_eq!(stored.created_at, t0);
        assert_eq!(stored.updated_at, t0 + Duration::seconds(3));

        let stranger = repo
            .save_draft(Some(&QuoteId("missing".to_string())), contact("x@example.com"), t0)
            .await
            .expect("save");
        assert_eq!(stranger.action, SaveAction::Created);
        assert_eq!(repo.list(None, 10).await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn in_memory_followup_flow_matches_sql_semantics() {
        let repo = InMemoryQuoteRepository::default();
        let now = Utc::now();
        let old = now - Duration::minutes(20);

        let draft = repo.save_draft(None, contact("sam@example.com"), old).await.expect("draft");
        let candidates = repo.followup_candidates(now - Duration::minutes(10)).await.expect("c");
        assert_eq!(candidates.len(), 1);
        assert!(!repo.has_later_submission(&candidates[0]).await.expect("later"));

        let mut submitted = contact("sam@example.com");
        submitted.status = QuoteStatus::Submitted;
        repo.save_draft(None, submitted, old + Duration::minutes(1)).await.expect("submit");
        assert!(repo.has_later_submission(&candidates[0]).await.expect("later"));

        assert!(repo.mark_followup_sent(&draft.id, now).await.expect("mark"));
        assert!(!repo.mark_followup_sent(&draft.id, now).await.expect("mark again"));
        assert!(repo.followup_candidates(now).await.expect("after").is_empty());
    }

    #[tokio::test]
    async fn in_memory_service_repo_rejects_duplicate_names() {
        let now = Utc::now();
        let screen = |id: &str| Service {
            id: ServiceId(id.to_string()),
            name: "Screen Cleaning".to_string(),
            description: None,
            category: ServiceCategory::Addon,
            per_sqft_price: None,
            flat_fee: Some(Decimal::from(40)),
            use_both_pricing: false,
            minimum_price: None,
            is_active: true,
            display_order: 1,
            created_at: now,
            updated_at: now,
        };
        let repo = InMemoryServiceRepository::with_services([screen("a")]);

        let error = repo.save(screen("b")).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict(_)));
        repo.save(screen("a")).await.expect("same id is an update");
        assert!(repo.delete(&ServiceId("a".to_string())).await.expect("delete"));
    }

    #[tokio::test]
    async fn in_memory_settings_initialize_lazily() {
        let repo = InMemorySettingsRepository::default();
        let mut settings = repo.get_or_init().await.expect("init");
        assert_eq!(settings.discount_percentage, 15);

        settings.discount_percentage = 25;
        repo.save(&settings).await.expect("save");
        assert_eq!(repo.get_or_init().await.expect("reload").discount_percentage, 25);
    }
}
