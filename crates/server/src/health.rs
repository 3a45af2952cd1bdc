use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use stocktake_core::session_store::SessionStore;
use stocktake_store::{ping, DbPool};
use tracing::{error, info};

/// How the health endpoint reaches the configured Tabular Store.
#[derive(Clone)]
pub enum StoreProbe {
    Sqlite(DbPool),
    Memory,
}

#[derive(Clone)]
pub struct HealthState {
    store: StoreProbe,
    sessions: SessionStore,
}

impl HealthState {
    pub fn new(store: StoreProbe, sessions: SessionStore) -> Self {
        Self { store, sessions }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub store: HealthCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_check(&state.store).await;
    let ready = store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "stocktake-server runtime initialized".to_string(),
        },
        store,
        active_sessions: state.sessions.active_sessions().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn store_check(probe: &StoreProbe) -> HealthCheck {
    match probe {
        StoreProbe::Memory => {
            HealthCheck { status: "ready", detail: "in-memory store".to_string() }
        }
        StoreProbe::Sqlite(pool) => match ping(pool).await {
            Ok(()) => HealthCheck { status: "ready", detail: "store query succeeded".to_string() },
            Err(error) => {
                HealthCheck { status: "degraded", detail: format!("store query failed: {error}") }
            }
        },
    }
}
