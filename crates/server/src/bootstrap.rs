use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use stocktake_core::catalog::{CatalogError, CategoryTree};
use stocktake_core::config::{AppConfig, ConfigError, LoadOptions, StoreBackend};
use stocktake_core::conversation::{ConversationService, ServiceSettings};
use stocktake_core::gateway::TabularStore;
use stocktake_store::{
    connect_with_settings, migrations, DbPool, InMemoryTabularStore, SqliteTabularStore,
};
use stocktake_telegram::events::conversation_dispatcher;
use stocktake_telegram::gateway::LoopbackGateway;
use stocktake_telegram::polling::{ChannelUpdateTransport, PollingRunner, ReconnectPolicy};
use stocktake_telegram::updates::Update;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::health::StoreProbe;

const UPDATE_QUEUE_CAPACITY: usize = 256;

pub struct Application {
    pub config: AppConfig,
    pub store_probe: StoreProbe,
    pub gateway: Arc<LoopbackGateway>,
    pub conversation: Arc<ConversationService>,
    pub runner: PollingRunner,
    /// Feeds the polling runner; dropping it ends the update stream.
    pub updates: mpsc::Sender<Update>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("store connection failed: {0}")]
    StoreConnect(#[source] sqlx::Error),
    #[error("store migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("catalog could not be loaded: {0}")]
    Catalog(#[from] CatalogError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let (store, store_probe) = open_store(&config).await?;

    let catalog = match &config.inventory.catalog_path {
        Some(path) => CategoryTree::load(path)?,
        None => CategoryTree::builtin(),
    };
    let catalog_source = config
        .inventory
        .catalog_path
        .as_deref()
        .map_or_else(|| "builtin".to_owned(), |path| path.display().to_string());
    info!(
        event_name = "system.bootstrap.catalog_loaded",
        correlation_id = "bootstrap",
        root_categories = catalog.root_categories().len(),
        source = %catalog_source,
        "category catalog loaded"
    );

    let gateway = Arc::new(LoopbackGateway::new());
    let settings = ServiceSettings {
        store_timeout: Duration::from_secs(config.store.timeout_secs),
        listing_ttl: Duration::from_secs(config.inventory.listing_cache_ttl_secs),
        ..ServiceSettings::default()
    };
    let conversation = Arc::new(ConversationService::new(
        gateway.clone(),
        store,
        Arc::new(catalog),
        config.inventory.warehouses.clone(),
        settings,
    ));

    let (updates, transport) = ChannelUpdateTransport::new(UPDATE_QUEUE_CAPACITY);
    let runner = PollingRunner::new(
        Arc::new(transport),
        conversation_dispatcher(conversation.clone()),
        ReconnectPolicy::default(),
    );
    info!(
        event_name = "system.bootstrap.transport_ready",
        correlation_id = "bootstrap",
        transport_mode = "loopback",
        bot_token_configured = token_configured(&config),
        "telegram transport initialized"
    );

    Ok(Application { config, store_probe, gateway, conversation, runner, updates })
}

fn token_configured(config: &AppConfig) -> bool {
    !config.telegram.bot_token.expose_secret().is_empty()
}

async fn open_store(
    config: &AppConfig,
) -> Result<(Arc<dyn TabularStore>, StoreProbe), BootstrapError> {
    match config.store.backend() {
        StoreBackend::Memory => {
            info!(
                event_name = "system.bootstrap.store_ready",
                correlation_id = "bootstrap",
                backend = "memory",
                "in-memory tabular store ready"
            );
            Ok((Arc::new(InMemoryTabularStore::default()), StoreProbe::Memory))
        }
        StoreBackend::Sqlite => {
            let pool = connect(config).await?;
            Ok((Arc::new(SqliteTabularStore::new(pool.clone())), StoreProbe::Sqlite(pool)))
        }
    }
}

async fn connect(config: &AppConfig) -> Result<DbPool, BootstrapError> {
    let pool = connect_with_settings(
        &config.store.url,
        config.store.max_connections,
        config.store.timeout_secs,
    )
    .await
    .map_err(BootstrapError::StoreConnect)?;
    info!(
        event_name = "system.bootstrap.store_connected",
        correlation_id = "bootstrap",
        backend = "sqlite",
        "store connection established"
    );

    migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "store migrations applied"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stocktake_core::config::{ConfigOverrides, LoadOptions, MEMORY_STORE_URL};
    use stocktake_core::domain::session::ChatId;
    use stocktake_telegram::updates::Update;

    use crate::bootstrap::bootstrap;
    use crate::health::StoreProbe;

    fn options(store_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                store_url: Some(store_url.to_string()),
                warehouses: Some(vec!["Central".to_string(), "North".to_string()]),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_a_malformed_bot_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                bot_token: Some("not-a-token".to_string()),
                ..options(MEMORY_STORE_URL).overrides
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("telegram.bot_token"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn sqlite_bootstrap_applies_migrations() {
        let app = bootstrap(options("sqlite::memory:?cache=shared")).await.expect("bootstrap");
        let StoreProbe::Sqlite(pool) = &app.store_probe else {
            panic!("sqlite URL should open the sqlite store");
        };

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('container', 'section', 'section_row')",
        )
        .fetch_one(pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 3);

        pool.close().await;
    }

    #[tokio::test]
    async fn updates_fed_to_the_runner_reach_the_loopback_chat() {
        let app = bootstrap(options(MEMORY_STORE_URL)).await.expect("bootstrap");
        let gateway = app.gateway.clone();
        let runner = app.runner;
        let runner = tokio::spawn(async move { runner.start().await });

        let update: Update = serde_json::from_str(
            r#"{"update_id": 1, "message": {"message_id": 1, "from": {"id": 7},
                "chat": {"id": 7}, "text": "/start"}}"#,
        )
        .expect("update");
        app.updates.send(update).await.expect("enqueue");
        drop(app.updates);

        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("runner drains")
            .expect("runner task")
            .expect("runner result");

        let transcript = gateway.transcript(ChatId(7)).await;
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].message.text.starts_with("Welcome"));
    }
}
