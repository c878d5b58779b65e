//! Database repository for reports, their event log and card links.
//!
//! Lifecycle transitions are conditional single-statement writes keyed on the
//! status the caller last observed, so a transition silently turns into a
//! no-op (returns `false`) when a concurrent request moved the report first.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::reports::{
        ReportCardLinkDBResponse, ReportCreateDBRequest, ReportDBResponse, ReportEventDBResponse,
        ReportEventType, ReportStatus, ReportUpdateDBRequest,
    },
};
use crate::types::{abbrev_uuid, CardId, ReportId, UserId};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// Filter for listing reports
#[derive(Debug, Clone)]
pub struct ReportFilter {
    pub owner_id: UserId,
    pub status: Option<ReportStatus>,
    pub skip: i64,
    pub limit: i64,
}

impl ReportFilter {
    pub fn new(owner_id: UserId, skip: i64, limit: i64) -> Self {
        Self {
            owner_id,
            status: None,
            skip,
            limit,
        }
    }

    pub fn status(mut self, status: ReportStatus) -> Self {
        self.status = Some(status);
        self
    }
}

pub struct Reports<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Reports<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Fetch a report only if it belongs to the given owner.
    pub async fn get_for_owner(
        &mut self,
        owner_id: UserId,
        id: ReportId,
    ) -> Result<Option<ReportDBResponse>> {
        let report = sqlx::query_as::<_, ReportDBResponse>(
            "SELECT * FROM reports WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(report)
    }

    /// Number of reports matching the filter, ignoring pagination.
    pub async fn count(&mut self, filter: &ReportFilter) -> Result<i64> {
        let mut query = sqlx::QueryBuilder::new("SELECT COUNT(*) FROM reports WHERE owner_id = ");
        query.push_bind(filter.owner_id);
        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status);
        }
        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    /// Move a report into PROCESSING, keyed on the status the caller loaded.
    ///
    /// Returns `false` when another request already transitioned the report.
    #[instrument(skip(self), fields(report_id = %abbrev_uuid(&id), from = %from), err)]
    pub async fn begin_processing(
        &mut self,
        id: ReportId,
        from: ReportStatus,
        started_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = ?, analysis_started_at = ?, failure_reason = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ReportStatus::Processing)
        .bind(started_at)
        .bind(started_at)
        .bind(id)
        .bind(from)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a PROCESSING report to FAILED, recording the reason.
    #[instrument(skip(self, meta), fields(report_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_failed(
        &mut self,
        id: ReportId,
        reason: &str,
        meta: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = ?, failure_reason = ?, processing_meta = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ReportStatus::Failed)
        .bind(reason)
        .bind(meta)
        .bind(Utc::now())
        .bind(id)
        .bind(ReportStatus::Processing)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fail a PROCESSING report, but only if its analysis still carries the
    /// start timestamp the caller observed. Used to take over a run whose
    /// process died mid-call: keying on the exact timestamp means a fresh
    /// concurrent submission is never clobbered.
    #[instrument(skip(self, meta), fields(report_id = %abbrev_uuid(&id)), err)]
    pub async fn fail_stale(
        &mut self,
        id: ReportId,
        started_at: DateTime<Utc>,
        reason: &str,
        meta: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = ?, failure_reason = ?, processing_meta = ?, updated_at = ?
            WHERE id = ? AND status = ? AND analysis_started_at = ?
            "#,
        )
        .bind(ReportStatus::Failed)
        .bind(reason)
        .bind(meta)
        .bind(Utc::now())
        .bind(id)
        .bind(ReportStatus::Processing)
        .bind(started_at)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a PROCESSING report to COMPLETED with its analysis results.
    #[instrument(skip(self, meta), fields(report_id = %abbrev_uuid(&id), model), err)]
    pub async fn mark_completed(
        &mut self,
        id: ReportId,
        model: &str,
        confidence: Option<f64>,
        completed_at: DateTime<Utc>,
        meta: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = ?, analysis_model = ?, confidence = ?, analysis_completed_at = ?,
                processing_meta = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ReportStatus::Completed)
        .bind(model)
        .bind(confidence)
        .bind(completed_at)
        .bind(meta)
        .bind(completed_at)
        .bind(id)
        .bind(ReportStatus::Processing)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Append an entry to the report's event log.
    pub async fn add_event(
        &mut self,
        report_id: ReportId,
        event_type: ReportEventType,
        payload: serde_json::Value,
    ) -> Result<ReportEventDBResponse> {
        let event = sqlx::query_as::<_, ReportEventDBResponse>(
            r#"
            INSERT INTO report_events (report_id, event_type, payload, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(report_id)
        .bind(event_type)
        .bind(payload)
        .bind(Utc::now())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(event)
    }

    /// Events in emission order; the autoincrement id breaks created_at ties.
    pub async fn list_events(&mut self, report_id: ReportId) -> Result<Vec<ReportEventDBResponse>> {
        let events = sqlx::query_as::<_, ReportEventDBResponse>(
            "SELECT * FROM report_events WHERE report_id = ? ORDER BY created_at, id",
        )
        .bind(report_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(events)
    }

    pub async fn add_card_link(
        &mut self,
        report_id: ReportId,
        card_id: CardId,
        link_role: &str,
        confidence: Option<f64>,
    ) -> Result<ReportCardLinkDBResponse> {
        let link = sqlx::query_as::<_, ReportCardLinkDBResponse>(
            r#"
            INSERT INTO report_card_links (report_id, card_id, link_role, confidence, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(report_id)
        .bind(card_id)
        .bind(link_role)
        .bind(confidence)
        .bind(Utc::now())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(link)
    }

    pub async fn list_card_links(
        &mut self,
        report_id: ReportId,
    ) -> Result<Vec<ReportCardLinkDBResponse>> {
        let links = sqlx::query_as::<_, ReportCardLinkDBResponse>(
            "SELECT * FROM report_card_links WHERE report_id = ? ORDER BY created_at",
        )
        .bind(report_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(links)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Reports<'c> {
    type CreateRequest = ReportCreateDBRequest;
    type UpdateRequest = ReportUpdateDBRequest;
    type Response = ReportDBResponse;
    type Id = ReportId;
    type Filter = ReportFilter;

    #[instrument(skip(self, request), fields(owner_id = %abbrev_uuid(&request.owner_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let report_id = Uuid::new_v4();
        let now = Utc::now();

        let report = sqlx::query_as::<_, ReportDBResponse>(
            r#"
            INSERT INTO reports (id, owner_id, status, tags, sections, auto_ticket_enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(report_id)
        .bind(request.owner_id)
        .bind(ReportStatus::Draft)
        .bind(sqlx::types::Json(&request.tags))
        .bind(sqlx::types::Json(&request.sections))
        .bind(request.auto_ticket_enabled)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(report)
    }

    #[instrument(skip(self), fields(report_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let report = sqlx::query_as::<_, ReportDBResponse>("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(report)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = sqlx::QueryBuilder::new("SELECT * FROM reports WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        query.push(")");

        let reports = query
            .build_query_as::<ReportDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;

        Ok(reports.into_iter().map(|r| (r.id, r)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = sqlx::QueryBuilder::new("SELECT * FROM reports WHERE owner_id = ");
        query.push_bind(filter.owner_id);

        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status);
        }

        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let reports = query
            .build_query_as::<ReportDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;

        Ok(reports)
    }

    #[instrument(skip(self), fields(report_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        // Events and card links go with the report via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(report_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let report = sqlx::query_as::<_, ReportDBResponse>(
            r#"
            UPDATE reports SET
                tags = COALESCE(?, tags),
                sections = COALESCE(?, sections),
                auto_ticket_enabled = COALESCE(?, auto_ticket_enabled),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(request.tags.as_ref().map(sqlx::types::Json))
        .bind(request.sections.as_ref().map(sqlx::types::Json))
        .bind(request.auto_ticket_enabled)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(report)
    }
}
