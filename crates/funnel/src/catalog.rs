use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use clearview_core::domain::service::{Service, ServiceId};
use clearview_core::domain::settings::Settings;
use clearview_db::repositories::{RepositoryError, ServiceRepository, SettingsRepository};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogChange {
    SettingsUpdated,
    ServiceSaved(ServiceId),
    ServiceDeleted(ServiceId),
}

/// Fan-out of admin edits to anything holding a cached catalog.
#[derive(Clone)]
pub struct CatalogEvents {
    sender: broadcast::Sender<CatalogChange>,
}

impl Default for CatalogEvents {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl CatalogEvents {
    /// Returns how many subscribers saw the change.
    pub fn publish(&self, change: CatalogChange) -> usize {
        debug!(event_name = "funnel.catalog.changed", change = ?change, "catalog change published");
        self.sender.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogChange> {
        self.sender.subscribe()
    }
}

/// Services and settings as one pricing input.
#[derive(Clone, Debug)]
pub struct Catalog {
    pub services: Vec<Service>,
    pub settings: Settings,
}

/// Read-through cache of the catalog. Any published change marks it stale and
/// the next read goes back to the repositories.
pub struct CatalogCache {
    services: Arc<dyn ServiceRepository>,
    settings: Arc<dyn SettingsRepository>,
    current: RwLock<Option<Arc<Catalog>>>,
    changes: Mutex<broadcast::Receiver<CatalogChange>>,
}

impl CatalogCache {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        settings: Arc<dyn SettingsRepository>,
        events: &CatalogEvents,
    ) -> Self {
        Self {
            services,
            settings,
            current: RwLock::new(None),
            changes: Mutex::new(events.subscribe()),
        }
    }

    pub async fn current(&self) -> Result<Arc<Catalog>, RepositoryError> {
        if !self.drain_changes().await {
            if let Some(catalog) = self.current.read().await.clone() {
                return Ok(catalog);
            }
        }

        let catalog = Arc::new(Catalog {
            services: self.services.list().await?,
            settings: self.settings.get_or_init().await?,
        });
        *self.current.write().await = Some(catalog.clone());
        Ok(catalog)
    }

    async fn drain_changes(&self) -> bool {
        let mut changes = self.changes.lock().await;
        let mut stale = false;
        loop {
            match changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => stale = true,
                Err(TryRecvError::Empty) => return stale,
                Err(TryRecvError::Closed) => return true,
            }
        }
    }
}
