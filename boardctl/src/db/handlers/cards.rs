//! Database repository for cards.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::cards::{CardCreateDBRequest, CardDBResponse, CardOrigin, CardStatus},
};
use crate::types::{abbrev_uuid, CardId, UserId};
use chrono::{NaiveDate, Utc};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// Filter for listing cards
#[derive(Debug, Clone)]
pub struct CardFilter {
    pub owner_id: UserId,
    pub origin: Option<CardOrigin>,
    pub skip: i64,
    pub limit: i64,
}

impl CardFilter {
    pub fn new(owner_id: UserId, skip: i64, limit: i64) -> Self {
        Self {
            owner_id,
            origin: None,
            skip,
            limit,
        }
    }

    pub fn origin(mut self, origin: CardOrigin) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Database request for updating a card's workflow fields
#[derive(Debug, Clone, Default)]
pub struct CardUpdateDBRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub status: Option<CardStatus>,
    pub due_date: Option<NaiveDate>,
}

pub struct Cards<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Cards<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Fetch a card only if it belongs to the given owner.
    pub async fn get_for_owner(
        &mut self,
        owner_id: UserId,
        id: CardId,
    ) -> Result<Option<CardDBResponse>> {
        let card =
            sqlx::query_as::<_, CardDBResponse>("SELECT * FROM cards WHERE id = ? AND owner_id = ?")
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&mut *self.db)
                .await?;

        Ok(card)
    }

    /// Number of cards matching the filter, ignoring pagination.
    pub async fn count(&mut self, filter: &CardFilter) -> Result<i64> {
        let mut query = sqlx::QueryBuilder::new("SELECT COUNT(*) FROM cards WHERE owner_id = ");
        query.push_bind(filter.owner_id);
        if let Some(origin) = filter.origin {
            query.push(" AND origin = ");
            query.push_bind(origin);
        }
        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Cards<'c> {
    type CreateRequest = CardCreateDBRequest;
    type UpdateRequest = CardUpdateDBRequest;
    type Response = CardDBResponse;
    type Id = CardId;
    type Filter = CardFilter;

    #[instrument(skip(self, request), fields(title = %request.title), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let card_id = Uuid::new_v4();
        let now = Utc::now();

        let card = sqlx::query_as::<_, CardDBResponse>(
            r#"
            INSERT INTO cards (id, owner_id, title, summary, status, priority, due_date, labels, origin, source_report_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(card_id)
        .bind(request.owner_id)
        .bind(&request.title)
        .bind(&request.summary)
        .bind(request.status)
        .bind(request.priority)
        .bind(request.due_date)
        .bind(sqlx::types::Json(&request.labels))
        .bind(request.origin)
        .bind(request.source_report_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(card)
    }

    #[instrument(skip(self), fields(card_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let card = sqlx::query_as::<_, CardDBResponse>("SELECT * FROM cards WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(card)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = sqlx::QueryBuilder::new("SELECT * FROM cards WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        query.push(")");

        let cards = query
            .build_query_as::<CardDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;

        Ok(cards.into_iter().map(|c| (c.id, c)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = sqlx::QueryBuilder::new("SELECT * FROM cards WHERE owner_id = ");
        query.push_bind(filter.owner_id);

        if let Some(origin) = filter.origin {
            query.push(" AND origin = ");
            query.push_bind(origin);
        }

        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let cards = query
            .build_query_as::<CardDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;

        Ok(cards)
    }

    #[instrument(skip(self), fields(card_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cards WHERE id = ?")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(card_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let card = sqlx::query_as::<_, CardDBResponse>(
            r#"
            UPDATE cards SET
                title = COALESCE(?, title),
                summary = COALESCE(?, summary),
                status = COALESCE(?, status),
                due_date = COALESCE(?, due_date),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&request.title)
        .bind(&request.summary)
        .bind(request.status)
        .bind(request.due_date)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(card)
    }
}
