use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        users::{CurrentUser, ListUsersQuery, UserResponse},
    },
    auth::require_admin,
    db::handlers::{Repository, Users, users::UserFilter},
    errors::{Error, Result},
};
use axum::{
    extract::{Query, State},
    response::Json,
};

/// Get the authenticated caller's identity
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    summary = "Get current user",
    description = "Echo the identity resolved from the proxy header",
    responses(
        (status = 200, description = "The authenticated user", body = CurrentUser),
        (status = 401, description = "Unauthorized"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_current_user(current_user: CurrentUser) -> Result<Json<CurrentUser>> {
    Ok(Json(current_user))
}

/// List users (admin only)
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    description = "Paginated user listing, mainly for addressing quota overrides",
    params(
        ListUsersQuery
    ),
    responses(
        (status = 200, description = "Paginated list of users", body = PaginatedResponse<UserResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires admin"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<PaginatedResponse<UserResponse>>> {
    require_admin(&current_user)?;

    let (skip, limit) = query.pagination.params();
    let mut filter = UserFilter::new(skip, limit);
    if let Some(search) = query.search {
        filter = filter.search(search);
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut conn);

    let total_count = repo.count(&filter).await?;
    let users = repo.list(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        users.into_iter().map(UserResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{auth_header, create_test_admin_user, create_test_app, create_test_user};
    use axum::http::StatusCode;
    use sqlx::SqlitePool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_me_echoes_identity(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "echo@example.com").await;

        let (name, value) = auth_header(&user);
        let response = server.get("/api/v1/users/me").add_header(name, value).await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["email"], "echo@example.com");
        assert_eq!(body["is_admin"], false);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_me_requires_identity_header(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool).await;

        let response = server.get("/api/v1/users/me").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_users_is_admin_only(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "pleb@example.com").await;
        let admin = create_test_admin_user(&pool).await;

        let (name, value) = auth_header(&user);
        let response = server.get("/api/v1/users").add_header(name, value).await;
        response.assert_status(StatusCode::FORBIDDEN);

        let (name, value) = auth_header(&admin);
        let response = server.get("/api/v1/users").add_header(name, value).await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["total_count"], 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_users_search(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        create_test_user(&pool, "alpha@example.com").await;
        create_test_user(&pool, "beta@example.com").await;
        let admin = create_test_admin_user(&pool).await;

        let (name, value) = auth_header(&admin);
        let response = server
            .get("/api/v1/users")
            .add_query_param("search", "alpha")
            .add_header(name, value)
            .await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["data"][0]["email"], "alpha@example.com");
    }
}
