//! Test utilities for integration testing.
//!
//! Exposed behind the `test-utils` feature so downstream integration suites
//! can spin up an in-memory app the same way the crate's own tests do.

use crate::analyzer::{AnalyzerGateway, DisabledAnalyzer};
use crate::config::Config;
use crate::db::handlers::{Repository, Users};
use crate::db::models::users::{UserCreateDBRequest, UserDBResponse};
use crate::{AppState, build_router};
use axum_test::TestServer;
use sqlx::SqlitePool;
use std::sync::Arc;

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        ..Config::default()
    }
}

/// Build a test server over the given pool with no analyzer configured.
///
/// Submissions against this app are rejected as unavailable; tests exercising
/// the analysis path use [`create_test_app_with_analyzer`].
pub async fn create_test_app(pool: SqlitePool) -> (TestServer, AppState) {
    create_test_app_with_analyzer(pool, Arc::new(DisabledAnalyzer)).await
}

pub async fn create_test_app_with_analyzer(
    pool: SqlitePool,
    analyzer: Arc<dyn AnalyzerGateway>,
) -> (TestServer, AppState) {
    let state = AppState::builder()
        .db(pool)
        .config(create_test_config())
        .analyzer(analyzer)
        .build();

    let server = TestServer::new(build_router(state.clone())).expect("Failed to build test server");
    (server, state)
}

pub async fn create_test_user(pool: &SqlitePool, email: &str) -> UserDBResponse {
    create_user(pool, email, false).await
}

pub async fn create_test_admin_user(pool: &SqlitePool) -> UserDBResponse {
    create_user(pool, "admin@test.com", true).await
}

async fn create_user(pool: &SqlitePool, email: &str, is_admin: bool) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users = Users::new(&mut conn);

    let username = email.split('@').next().unwrap_or(email).to_string();
    users
        .create(&UserCreateDBRequest {
            username,
            email: email.to_string(),
            display_name: None,
            is_admin,
            auth_source: "test".to_string(),
        })
        .await
        .expect("Failed to create test user")
}

/// The identity header pair a trusted proxy would inject for this user.
pub fn auth_header(user: &UserDBResponse) -> (String, String) {
    let config = create_test_config();
    (config.auth.header_name, user.email.clone())
}
