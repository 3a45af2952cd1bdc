use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::gateway::{StoreError, TabularStore};

struct Entry {
    sections: Vec<String>,
    fetched_at: Instant,
}

/// Freshness-window cache of section names per warehouse.
///
/// Only display menus read from it. When a refresh fails and an older copy
/// exists, the older copy is served.
pub struct ListingCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn sections(
        &self,
        warehouse: &str,
        store: &dyn TabularStore,
    ) -> Result<Vec<String>, StoreError> {
        if let Some(entry) = self.entries.read().await.get(warehouse) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!(event_name = "listing.cache_hit", warehouse, "serving cached sections");
                return Ok(entry.sections.clone());
            }
        }

        match fetch(warehouse, store).await {
            Ok(sections) => {
                self.entries.write().await.insert(
                    warehouse.to_owned(),
                    Entry { sections: sections.clone(), fetched_at: Instant::now() },
                );
                Ok(sections)
            }
            Err(error) => match self.entries.read().await.get(warehouse) {
                Some(stale) => {
                    warn!(
                        event_name = "listing.refresh_failed",
                        warehouse,
                        error = %error,
                        "serving stale section listing"
                    );
                    Ok(stale.sections.clone())
                }
                None => Err(error),
            },
        }
    }

    pub async fn invalidate(&self, warehouse: &str) {
        self.entries.write().await.remove(warehouse);
    }
}

async fn fetch(warehouse: &str, store: &dyn TabularStore) -> Result<Vec<String>, StoreError> {
    match store.find_container(warehouse).await? {
        Some(container) => store.list_sections(&container).await,
        None => Ok(Vec::new()),
    }
}
