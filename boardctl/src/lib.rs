//! boardctl: quota-gated report intake and analysis service.
//!
//! Users draft free-form reports, submit them for synchronous analysis by an
//! OpenAI-compatible backend, and optionally have the resulting card proposals
//! materialized as actionable cards. Every analysis and card creation draws
//! from a per-user daily quota ledger.
//!
//! The crate is organized as:
//!
//! - [`api`]: axum handlers and their request/response models
//! - [`db`]: sqlx repositories over SQLite and their row models
//! - [`analyzer`]: the analysis backend gateway
//! - [`auth`]: proxy-header identity resolution
//! - [`config`]: figment-based configuration loading

pub mod analyzer;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::{
    analyzer::AnalyzerGateway,
    config::QuotaDefaultsSeedConfig,
    db::handlers::{Quotas, Repository, Users},
    db::models::{
        quotas::QuotaDefaultsUpdateDBRequest,
        users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    openapi::ApiDoc,
};
use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};
use bon::Builder;
pub use config::Config;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{CardId, ReportEventId, ReportId, UserId};

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub analyzer: Arc<dyn AnalyzerGateway>,
}

/// Get the boardctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Ensure the configured admin user exists and is an admin.
///
/// Idempotent; called at every startup. An existing non-admin row for the
/// configured email is promoted rather than duplicated.
#[instrument(skip_all)]
pub async fn ensure_admin_user(email: &str, db: &SqlitePool) -> errors::Result<UserId> {
    let mut tx = db.begin().await.map_err(|e| errors::Error::Database(e.into()))?;
    let mut users = Users::new(&mut tx);

    if let Some(existing) = users.get_user_by_email(email).await? {
        if !existing.is_admin {
            users
                .update(
                    existing.id,
                    &UserUpdateDBRequest {
                        display_name: None,
                        is_admin: Some(true),
                    },
                )
                .await?;
            info!(user_id = %existing.id, "promoted existing user to admin");
        }
        tx.commit().await.map_err(|e| errors::Error::Database(e.into()))?;
        return Ok(existing.id);
    }

    let created = users
        .create(&UserCreateDBRequest {
            username: email.to_string(),
            email: email.to_string(),
            display_name: None,
            is_admin: true,
            auth_source: "system".to_string(),
        })
        .await?;
    tx.commit().await.map_err(|e| errors::Error::Database(e.into()))?;

    info!(user_id = %created.id, "created admin user");
    Ok(created.id)
}

/// Write configured deployment quota defaults over the defaults row.
///
/// Absent fields keep the deployment's current values.
#[instrument(skip_all)]
async fn apply_quota_seed(seed: &QuotaDefaultsSeedConfig, db: &SqlitePool) -> errors::Result<()> {
    let mut conn = db.acquire().await.map_err(|e| errors::Error::Database(e.into()))?;
    let mut quotas = Quotas::new(&mut conn);

    let current = quotas.get_or_init_defaults().await?;
    let updated = quotas
        .update_defaults(&QuotaDefaultsUpdateDBRequest {
            card_creation_limit: seed
                .card_creation_limit
                .unwrap_or(current.card_creation_limit)
                .max(0),
            evaluation_limit: seed.evaluation_limit.unwrap_or(current.evaluation_limit).max(0),
            report_analysis_limit: seed
                .report_analysis_limit
                .unwrap_or(current.report_analysis_limit)
                .max(0),
        })
        .await?;

    info!(
        card_creation = updated.card_creation_limit,
        evaluation = updated.evaluation_limit,
        report_analysis = updated.report_analysis_limit,
        "applied configured quota defaults"
    );
    Ok(())
}

/// Build the complete application router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Reports
        .route("/reports", post(api::handlers::reports::create_report))
        .route("/reports", get(api::handlers::reports::list_reports))
        .route("/reports/{id}", get(api::handlers::reports::get_report))
        .route("/reports/{id}", patch(api::handlers::reports::update_report))
        .route("/reports/{id}/submit", post(api::handlers::reports::submit_report))
        .route("/reports/{id}/retry", post(api::handlers::reports::retry_report))
        // Cards
        .route("/cards", post(api::handlers::cards::create_card))
        .route("/cards", get(api::handlers::cards::list_cards))
        .route("/cards/{id}", get(api::handlers::cards::get_card))
        // Quota policy and usage
        .route("/quotas/defaults", get(api::handlers::quotas::get_quota_defaults))
        .route("/quotas/defaults", put(api::handlers::quotas::update_quota_defaults))
        .route("/quotas/usage", get(api::handlers::quotas::get_quota_usage))
        .route(
            "/users/{id}/quota-overrides",
            get(api::handlers::quotas::list_quota_overrides),
        )
        .route(
            "/users/{id}/quota-overrides/{kind}",
            put(api::handlers::quotas::set_quota_override),
        )
        .route(
            "/users/{id}/quota-overrides/{kind}",
            delete(api::handlers::quotas::clear_quota_override),
        )
        // Users
        .route("/users", get(api::handlers::users::list_users))
        .route("/users/me", get(api::handlers::users::get_current_user))
        .with_state(state);

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route(
            "/api-docs/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        )
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    // The service runs behind a trusted fronting proxy which owns the real
    // origin policy
    router.layer(CorsLayer::permissive()).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// The running application: an initialized router plus the resources behind
/// it.
///
/// Lifecycle:
///
/// 1. **Create**: [`Application::new`] opens the database, runs migrations,
///    ensures the admin user and applies configured quota defaults
/// 2. **Serve**: [`Application::serve`] binds a TCP port and handles requests
///    until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: SqlitePool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting boardctl with configuration: {:#?}", config);

        let options = SqliteConnectOptions::from_str(&config.database.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect_with(options)
            .await?;

        migrator().run(&pool).await?;

        ensure_admin_user(&config.admin_email, &pool).await?;
        if let Some(seed) = &config.quotas {
            apply_quota_seed(seed, &pool).await?;
        }

        let analyzer = analyzer::create_analyzer(&config.analysis);
        if !analyzer.is_available() {
            warn!("no analyzer endpoint configured; report submissions will be rejected");
        }

        let state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .analyzer(analyzer)
            .build();
        let router = build_router(state);

        Ok(Self { router, config, pool })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("boardctl listening on http://{bind_addr}");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
