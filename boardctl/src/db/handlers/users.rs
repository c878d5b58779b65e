//! Database repository for users.

use crate::types::{abbrev_uuid, UserId};
use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
};
use chrono::Utc;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// Filter for listing users
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub search: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            search: None,
            skip,
            limit,
        }
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }
}

pub struct Users<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, email), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Number of users matching the filter, ignoring pagination.
    pub async fn count(&mut self, filter: &UserFilter) -> Result<i64> {
        let mut query = sqlx::QueryBuilder::new("SELECT COUNT(*) FROM users WHERE 1=1");
        if let Some(search) = &filter.search {
            query.push(" AND (username LIKE ");
            query.push_bind(format!("%{}%", search));
            query.push(" OR email LIKE ");
            query.push_bind(format!("%{}%", search));
            query.push(")");
        }
        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        // Always generate a new ID for users
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (id, username, email, display_name, is_admin, auth_source, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(request.is_admin)
        .bind(&request.auth_source)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = sqlx::QueryBuilder::new("SELECT * FROM users WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        query.push(")");

        let users = query
            .build_query_as::<UserDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = sqlx::QueryBuilder::new("SELECT * FROM users WHERE 1=1");

        if let Some(search) = &filter.search {
            query.push(" AND (username LIKE ");
            query.push_bind(format!("%{}%", search));
            query.push(" OR email LIKE ");
            query.push_bind(format!("%{}%", search));
            query.push(")");
        }

        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let users = query
            .build_query_as::<UserDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;

        Ok(users)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users SET
                display_name = COALESCE(?, display_name),
                is_admin = COALESCE(?, is_admin),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&request.display_name)
        .bind(request.is_admin)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::super::repository::Repository;
    use super::*;
    use sqlx::SqlitePool;

    fn create_request(username: &str, email: &str) -> UserCreateDBRequest {
        UserCreateDBRequest {
            username: username.to_string(),
            email: email.to_string(),
            display_name: None,
            is_admin: false,
            auth_source: "proxy-header".to_string(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_user(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let user = repo
            .create(&UserCreateDBRequest {
                username: "testuser".to_string(),
                email: "test@example.com".to_string(),
                display_name: Some("Test User".to_string()),
                is_admin: false,
                auth_source: "proxy-header".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(user.username, "testuser");
        assert_eq!(user.email, "test@example.com");
        assert_eq!(user.display_name, Some("Test User".to_string()));
        assert!(!user.is_admin);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_duplicate_email_is_unique_violation(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        repo.create(&create_request("first", "dup@example.com")).await.unwrap();
        let err = repo
            .create(&create_request("second", "dup@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_user_by_email(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let created = repo
            .create(&create_request("findme", "findme@example.com"))
            .await
            .unwrap();

        let found = repo.get_user_by_email("findme@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(created.id));

        let missing = repo.get_user_by_email("nobody@example.com").await.unwrap();
        assert!(missing.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_users_with_search(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        repo.create(&create_request("alpha", "alpha@example.com")).await.unwrap();
        repo.create(&create_request("beta", "beta@example.com")).await.unwrap();

        let all = repo.list(&UserFilter::new(0, 10)).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = repo.list(&UserFilter::new(0, 10).search("alph")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].username, "alpha");

        assert_eq!(repo.count(&UserFilter::new(0, 10).search("alph")).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_user(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let user = repo.create(&create_request("upd", "upd@example.com")).await.unwrap();

        let updated = repo
            .update(
                user.id,
                &UserUpdateDBRequest {
                    display_name: Some("New Name".to_string()),
                    is_admin: Some(true),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.display_name, Some("New Name".to_string()));
        assert!(updated.is_admin);

        let err = repo
            .update(Uuid::new_v4(), &UserUpdateDBRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}
