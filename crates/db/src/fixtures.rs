use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Services the starter catalog must contain after seeding.
const SEED_SERVICES: &[SeedServiceContract] = &[
    SeedServiceContract {
        id: "svc-exterior",
        name: "Exterior Only Cleaning",
        category: "main",
        description: "Default main service; 0.10/sqft with a 150 minimum",
    },
    SeedServiceContract {
        id: "svc-interior-exterior",
        name: "Interior & Exterior Cleaning",
        category: "main",
        description: "Both sides; 0.18/sqft with a 250 minimum",
    },
    SeedServiceContract {
        id: "svc-screens",
        name: "Screen Cleaning",
        category: "addon",
        description: "Flat 40",
    },
    SeedServiceContract {
        id: "svc-tracks",
        name: "Track Cleaning",
        category: "addon",
        description: "Flat 40",
    },
    SeedServiceContract {
        id: "svc-skylights",
        name: "Skylight Cleaning",
        category: "addon",
        description: "Flat 25",
    },
    SeedServiceContract {
        id: "svc-hard-water",
        name: "Hard Water Stain Removal",
        category: "upsell",
        description: "0.05/sqft",
    },
];

const SETTINGS_ROW_ID: &str = crate::repositories::settings::SETTINGS_ROW_ID;

/// Starter catalog and business settings for a fresh install.
///
/// Loading is idempotent: rows that already exist (by id, or by name inside a
/// category) are left untouched, so an admin's edits survive a re-seed.
pub struct DefaultCatalogSeed;

impl DefaultCatalogSeed {
    pub const SQL: &str = include_str!("../../../config/fixtures/default_catalog.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let before = Self::service_count(pool).await?;

        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let after = Self::service_count(pool).await?;
        let services_inserted = usize::try_from(after - before)
            .map_err(|e| RepositoryError::Decode(format!("service count: {e}")))?;

        Ok(SeedResult {
            services_inserted,
            services: SEED_SERVICES
                .iter()
                .map(|service| ServiceSeedInfo {
                    id: service.id,
                    name: service.name,
                    category: service.category,
                    description: service.description,
                })
                .collect(),
        })
    }

    /// Checks that every starter service and the settings row are present.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for service in SEED_SERVICES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM services WHERE name = ?1 AND category = ?2)",
            )
            .bind(service.name)
            .bind(service.category)
            .fetch_one(pool)
            .await?;
            checks.push((service.id, present == 1));
        }

        let settings_present: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM business_settings WHERE id = ?1)")
                .bind(SETTINGS_ROW_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("business-settings", settings_present == 1));

        let active_main: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM services WHERE category = 'main' AND is_active = 1",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("active-main-service", active_main > 0));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the starter rows. Test databases only.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        for service in SEED_SERVICES {
            sqlx::query("DELETE FROM services WHERE id = ?1")
                .bind(service.id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM business_settings WHERE id = ?1")
            .bind(SETTINGS_ROW_ID)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn service_count(pool: &DbPool) -> Result<i64, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT COUNT(1) FROM services").fetch_one(pool).await?)
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedServiceContract {
    id: &'static str,
    name: &'static str,
    category: &'static str,
    description: &'static str,
}

#[derive(Debug)]
pub struct SeedResult {
    pub services_inserted: usize,
    pub services: Vec<ServiceSeedInfo>,
}

#[derive(Debug)]
pub struct ServiceSeedInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
