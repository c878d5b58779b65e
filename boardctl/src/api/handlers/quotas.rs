use crate::{
    AppState,
    api::models::{
        quotas::{
            QuotaDefaultsResponse, QuotaDefaultsUpdateRequest, QuotaKindUsage,
            QuotaOverrideResponse, QuotaOverrideUpdateRequest, QuotaUsageResponse,
        },
        users::CurrentUser,
    },
    auth::require_admin,
    db::{
        handlers::{Quotas, Repository, Users},
        models::quotas::QuotaKind,
    },
    errors::{Error, Result},
    types::UserId,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;

/// Get the deployment default limits
#[utoipa::path(
    get,
    path = "/quotas/defaults",
    tag = "quotas",
    summary = "Get default quota limits",
    description = "Deployment-wide daily limits per quota kind. 0 means unlimited.",
    responses(
        (status = 200, description = "Current defaults", body = QuotaDefaultsResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_quota_defaults(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> Result<Json<QuotaDefaultsResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut quotas = Quotas::new(&mut conn);

    let defaults = quotas.get_or_init_defaults().await?;
    Ok(Json(QuotaDefaultsResponse::from(defaults)))
}

/// Replace the deployment default limits (admin only)
#[utoipa::path(
    put,
    path = "/quotas/defaults",
    tag = "quotas",
    summary = "Update default quota limits",
    description = "Replace all deployment-wide daily limits. Negative values are clamped to 0 (unlimited).",
    responses(
        (status = 200, description = "Updated defaults", body = QuotaDefaultsResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires admin"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_quota_defaults(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<QuotaDefaultsUpdateRequest>,
) -> Result<Json<QuotaDefaultsResponse>> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut quotas = Quotas::new(&mut conn);

    let defaults = quotas.update_defaults(&request.into()).await?;
    Ok(Json(QuotaDefaultsResponse::from(defaults)))
}

/// Get the caller's quota usage for today
#[utoipa::path(
    get,
    path = "/quotas/usage",
    tag = "quotas",
    summary = "Get today's quota usage",
    description = "Used and remaining units for the caller, per quota kind, against effective limits",
    responses(
        (status = 200, description = "Per-kind usage for the current UTC day", body = QuotaUsageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn get_quota_usage(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<QuotaUsageResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut quotas = Quotas::new(&mut conn);

    let today = Utc::now().date_naive();
    let mut kinds = Vec::with_capacity(QuotaKind::ALL.len());
    for kind in QuotaKind::ALL {
        let limit = quotas.effective_limit(current_user.id, kind).await?;
        let used = quotas.used_on(current_user.id, today, kind).await?;
        let remaining = if limit == 0 {
            None
        } else {
            Some((limit - used).max(0))
        };
        kinds.push(QuotaKindUsage {
            kind,
            limit,
            used,
            remaining,
        });
    }

    Ok(Json(QuotaUsageResponse {
        quota_date: today,
        kinds,
    }))
}

/// List a user's quota overrides (admin only)
#[utoipa::path(
    get,
    path = "/users/{id}/quota-overrides",
    tag = "quotas",
    summary = "List quota overrides",
    params(
        ("id" = String, Path, description = "User ID (UUID)"),
    ),
    responses(
        (status = 200, description = "The user's override rows", body = [QuotaOverrideResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires admin"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_quota_overrides(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<QuotaOverrideResponse>>> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    ensure_user_exists(&mut conn, user_id).await?;

    let mut quotas = Quotas::new(&mut conn);
    let overrides = quotas.list_overrides(user_id).await?;

    Ok(Json(
        overrides.into_iter().map(QuotaOverrideResponse::from).collect(),
    ))
}

/// Set a per-user quota override (admin only)
#[utoipa::path(
    put,
    path = "/users/{id}/quota-overrides/{kind}",
    tag = "quotas",
    summary = "Set a quota override",
    description = "Give one user their own daily limit for one kind. 0 means unlimited; negative values are clamped to 0.",
    params(
        ("id" = String, Path, description = "User ID (UUID)"),
        ("kind" = QuotaKind, Path, description = "Quota kind"),
    ),
    responses(
        (status = 200, description = "The override row", body = QuotaOverrideResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires admin"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(kind = %kind))]
pub async fn set_quota_override(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((user_id, kind)): Path<(UserId, QuotaKind)>,
    Json(request): Json<QuotaOverrideUpdateRequest>,
) -> Result<Json<QuotaOverrideResponse>> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    ensure_user_exists(&mut conn, user_id).await?;

    let mut quotas = Quotas::new(&mut conn);
    let row = quotas
        .set_override(user_id, kind, request.daily_limit.max(0))
        .await?;

    Ok(Json(QuotaOverrideResponse::from(row)))
}

/// Clear a per-user quota override (admin only)
#[utoipa::path(
    delete,
    path = "/users/{id}/quota-overrides/{kind}",
    tag = "quotas",
    summary = "Clear a quota override",
    description = "Remove an override so the user inherits the deployment default again",
    params(
        ("id" = String, Path, description = "User ID (UUID)"),
        ("kind" = QuotaKind, Path, description = "Quota kind"),
    ),
    responses(
        (status = 204, description = "Override removed (or none existed)"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires admin"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(kind = %kind))]
pub async fn clear_quota_override(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((user_id, kind)): Path<(UserId, QuotaKind)>,
) -> Result<StatusCode> {
    require_admin(&current_user)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    ensure_user_exists(&mut conn, user_id).await?;

    let mut quotas = Quotas::new(&mut conn);
    quotas.clear_override(user_id, kind).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_user_exists(conn: &mut sqlx::SqliteConnection, user_id: UserId) -> Result<()> {
    let mut users = Users::new(conn);
    if users.get_by_id(user_id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{auth_header, create_test_admin_user, create_test_app, create_test_user};
    use axum::http::StatusCode;
    use serde_json::json;
    use sqlx::SqlitePool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_defaults_lazily_created_from_constants(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "q@example.com").await;

        let (name, value) = auth_header(&user);
        let response = server.get("/api/v1/quotas/defaults").add_header(name, value).await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["card_creation_limit"], 50);
        assert_eq!(body["evaluation_limit"], 20);
        assert_eq!(body["report_analysis_limit"], 10);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_defaults_admin_only_with_clamping(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "q@example.com").await;
        let admin = create_test_admin_user(&pool).await;

        let body = json!({
            "card_creation_limit": 5,
            "evaluation_limit": -2,
            "report_analysis_limit": 0
        });

        let (name, value) = auth_header(&user);
        let response = server
            .put("/api/v1/quotas/defaults")
            .add_header(name, value)
            .json(&body)
            .await;
        response.assert_status(StatusCode::FORBIDDEN);

        let (name, value) = auth_header(&admin);
        let response = server
            .put("/api/v1/quotas/defaults")
            .add_header(name, value)
            .json(&body)
            .await;
        response.assert_status_ok();

        let updated: serde_json::Value = response.json();
        assert_eq!(updated["card_creation_limit"], 5);
        // Negative clamps to 0 (unlimited)
        assert_eq!(updated["evaluation_limit"], 0);
        assert_eq!(updated["report_analysis_limit"], 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_override_set_takes_precedence_and_clear_restores(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "q@example.com").await;
        let admin = create_test_admin_user(&pool).await;

        let (admin_name, admin_value) = auth_header(&admin);
        let response = server
            .put(&format!("/api/v1/users/{}/quota-overrides/report_analysis", user.id))
            .add_header(admin_name.clone(), admin_value.clone())
            .json(&json!({"daily_limit": 5}))
            .await;
        response.assert_status_ok();

        let (name, value) = auth_header(&user);
        let response = server
            .get("/api/v1/quotas/usage")
            .add_header(name.clone(), value.clone())
            .await;
        let usage: serde_json::Value = response.json();
        let report_analysis = usage["kinds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|k| k["kind"] == "report_analysis")
            .unwrap();
        assert_eq!(report_analysis["limit"], 5);
        assert_eq!(report_analysis["used"], 0);
        assert_eq!(report_analysis["remaining"], 5);

        let response = server
            .delete(&format!("/api/v1/users/{}/quota-overrides/report_analysis", user.id))
            .add_header(admin_name.clone(), admin_value.clone())
            .await;
        response.assert_status(StatusCode::NO_CONTENT);

        let response = server.get("/api/v1/quotas/usage").add_header(name, value).await;
        let usage: serde_json::Value = response.json();
        let report_analysis = usage["kinds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|k| k["kind"] == "report_analysis")
            .unwrap();
        assert_eq!(report_analysis["limit"], 10);

        let response = server
            .get(&format!("/api/v1/users/{}/quota-overrides", user.id))
            .add_header(admin_name, admin_value)
            .await;
        let overrides: serde_json::Value = response.json();
        assert_eq!(overrides.as_array().unwrap().len(), 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_override_for_unknown_user_is_not_found(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;

        let (name, value) = auth_header(&admin);
        let response = server
            .put(&format!(
                "/api/v1/users/{}/quota-overrides/card_creation",
                uuid::Uuid::new_v4()
            ))
            .add_header(name, value)
            .json(&json!({"daily_limit": 1}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_usage_reflects_consumption(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "q@example.com").await;
        let (name, value) = auth_header(&user);

        server
            .post("/api/v1/cards")
            .add_header(name.clone(), value.clone())
            .json(&json!({"title": "consume one"}))
            .await
            .assert_status(StatusCode::CREATED);

        let response = server.get("/api/v1/quotas/usage").add_header(name, value).await;
        let usage: serde_json::Value = response.json();
        let card_creation = usage["kinds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|k| k["kind"] == "card_creation")
            .unwrap();
        assert_eq!(card_creation["used"], 1);
        assert_eq!(card_creation["remaining"], 49);
    }
}
