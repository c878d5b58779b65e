//! Report lifecycle handlers.
//!
//! Submission is the interesting path: it resolves and reserves quota, moves
//! the report into PROCESSING, calls the analyzer synchronously (no
//! transaction or connection held across the network call), and then either
//! persists a FAILED report or returns a final detail snapshot and deletes the
//! row. A PROCESSING report whose analysis started longer ago than the
//! configured staleness window is failed in-request and taken over.

use crate::{
    AppState,
    api::models::{
        cards::CardResponse,
        pagination::PaginatedResponse,
        reports::{
            LinkedCardResponse, ListReportsQuery, ReportCreateRequest, ReportDetailResponse,
            ReportResponse, ReportUpdateRequest, normalize_tags,
        },
        users::CurrentUser,
    },
    db::{
        handlers::{Cards, Quotas, Reports, Repository, reports::ReportFilter},
        models::{
            cards::{CardCreateDBRequest, CardOrigin, CardPriority, CardStatus},
            quotas::QuotaKind,
            reports::{
                ReportCreateDBRequest, ReportDBResponse, ReportEventType, ReportStatus,
                ReportUpdateDBRequest, normalize_sections,
            },
        },
    },
    errors::{Error, Result},
    types::ReportId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde_json::json;
use sqlx::SqliteConnection;

const STALE_FAILURE_REASON: &str = "analysis timed out";

/// What initiated an analysis run. Submit and retry share the handler body
/// and differ only in their eligibility set.
#[derive(Debug, Clone, Copy)]
enum SubmitTrigger {
    Submit,
    Retry,
}

impl SubmitTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Retry => "retry",
        }
    }

    fn eligible_from(self, status: ReportStatus) -> bool {
        match self {
            Self::Submit => matches!(
                status,
                ReportStatus::Draft | ReportStatus::Failed | ReportStatus::Completed
            ),
            Self::Retry => matches!(status, ReportStatus::Failed | ReportStatus::Completed),
        }
    }
}

/// Create a report draft
#[utoipa::path(
    post,
    path = "/reports",
    tag = "reports",
    summary = "Create a report draft",
    description = "Sections are trimmed and empty ones dropped; a report with no remaining content is rejected",
    responses(
        (status = 201, description = "Draft created", body = ReportDetailResponse),
        (status = 400, description = "No analyzable content"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn create_report(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ReportCreateRequest>,
) -> Result<(StatusCode, Json<ReportDetailResponse>)> {
    let sections = normalize_sections(request.sections);
    if sections.is_empty() {
        return Err(Error::BadRequest {
            message: "Report must contain at least one section with a non-empty body".to_string(),
        });
    }
    let tags = normalize_tags(request.tags);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Reports::new(&mut conn);

    let report = repo
        .create(&ReportCreateDBRequest {
            owner_id: current_user.id,
            tags,
            sections,
            auto_ticket_enabled: request.auto_ticket_enabled,
        })
        .await?;
    repo.add_event(
        report.id,
        ReportEventType::DraftCreated,
        json!({"sections": report.sections.0.len(), "tags": report.tags.0}),
    )
    .await?;

    let detail = assemble_detail(&mut conn, report).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// List own reports
#[utoipa::path(
    get,
    path = "/reports",
    tag = "reports",
    summary = "List reports",
    params(
        ListReportsQuery
    ),
    responses(
        (status = 200, description = "Paginated list of the caller's reports", body = PaginatedResponse<ReportResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn list_reports(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListReportsQuery>,
) -> Result<Json<PaginatedResponse<ReportResponse>>> {
    let (skip, limit) = query.pagination.params();
    let mut filter = ReportFilter::new(current_user.id, skip, limit);
    if let Some(status) = query.status {
        filter = filter.status(status);
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Reports::new(&mut conn);

    let total_count = repo.count(&filter).await?;
    let reports = repo.list(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        reports.into_iter().map(ReportResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Get a report's detail view
#[utoipa::path(
    get,
    path = "/reports/{id}",
    tag = "reports",
    summary = "Get a report",
    description = "Full detail: content, analysis metadata, linked cards, the ordered event log and any pending proposals",
    params(
        ("id" = String, Path, description = "Report ID (UUID)"),
    ),
    responses(
        (status = 200, description = "The report", body = ReportDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Report not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn get_report(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ReportId>,
) -> Result<Json<ReportDetailResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Reports::new(&mut conn);

    let report = repo
        .get_for_owner(current_user.id, id)
        .await?
        .ok_or_else(|| report_not_found(id))?;

    let detail = assemble_detail(&mut conn, report).await?;
    Ok(Json(detail))
}

/// Update a report draft
#[utoipa::path(
    patch,
    path = "/reports/{id}",
    tag = "reports",
    summary = "Update a report",
    description = "Patch sections, tags or the auto-ticket flag. Only DRAFT and FAILED reports are editable.",
    params(
        ("id" = String, Path, description = "Report ID (UUID)"),
    ),
    responses(
        (status = 200, description = "Updated report", body = ReportDetailResponse),
        (status = 400, description = "No analyzable content"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is not editable in its current status"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn update_report(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ReportId>,
    Json(request): Json<ReportUpdateRequest>,
) -> Result<Json<ReportDetailResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Reports::new(&mut conn);

    let report = repo
        .get_for_owner(current_user.id, id)
        .await?
        .ok_or_else(|| report_not_found(id))?;

    if !matches!(report.status, ReportStatus::Draft | ReportStatus::Failed) {
        return Err(Error::Conflict {
            message: format!("Cannot update a report in status {}", report.status),
        });
    }

    let sections = request.sections.map(normalize_sections);
    if let Some(sections) = &sections {
        if sections.is_empty() {
            return Err(Error::BadRequest {
                message: "Report must contain at least one section with a non-empty body"
                    .to_string(),
            });
        }
    }
    let tags = request.tags.map(normalize_tags);

    let mut fields = Vec::new();
    if sections.is_some() {
        fields.push("sections");
    }
    if tags.is_some() {
        fields.push("tags");
    }
    if request.auto_ticket_enabled.is_some() {
        fields.push("auto_ticket_enabled");
    }

    let updated = repo
        .update(
            report.id,
            &ReportUpdateDBRequest {
                tags,
                sections,
                auto_ticket_enabled: request.auto_ticket_enabled,
            },
        )
        .await?;
    repo.add_event(report.id, ReportEventType::Updated, json!({"fields": fields}))
        .await?;

    let detail = assemble_detail(&mut conn, updated).await?;
    Ok(Json(detail))
}

/// Submit a report for analysis
#[utoipa::path(
    post,
    path = "/reports/{id}/submit",
    tag = "reports",
    summary = "Submit a report for analysis",
    description = "Reserves one unit of the report_analysis daily quota, runs the analyzer synchronously \
        and returns the outcome. On success the report is deleted and this response is its last trace; \
        on analyzer failure the report persists as FAILED and can be retried.",
    params(
        ("id" = String, Path, description = "Report ID (UUID)"),
    ),
    responses(
        (status = 200, description = "Analysis outcome (completed snapshot or persisted failure)", body = ReportDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is already processing or not submittable"),
        (status = 429, description = "Daily report_analysis quota exhausted"),
        (status = 503, description = "No analyzer backend configured"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id, report_id = %id))]
pub async fn submit_report(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ReportId>,
) -> Result<Json<ReportDetailResponse>> {
    run_analysis(state, current_user, id, SubmitTrigger::Submit).await
}

/// Retry a failed analysis
#[utoipa::path(
    post,
    path = "/reports/{id}/retry",
    tag = "reports",
    summary = "Retry a failed analysis",
    description = "Same flow as submit, restricted to reports whose last analysis failed",
    params(
        ("id" = String, Path, description = "Report ID (UUID)"),
    ),
    responses(
        (status = 200, description = "Analysis outcome (completed snapshot or persisted failure)", body = ReportDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report is not retryable in its current status"),
        (status = 429, description = "Daily report_analysis quota exhausted"),
        (status = 503, description = "No analyzer backend configured"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id, report_id = %id))]
pub async fn retry_report(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ReportId>,
) -> Result<Json<ReportDetailResponse>> {
    run_analysis(state, current_user, id, SubmitTrigger::Retry).await
}

async fn run_analysis(
    state: AppState,
    current_user: CurrentUser,
    id: ReportId,
    trigger: SubmitTrigger,
) -> Result<Json<ReportDetailResponse>> {
    let max_proposals = state.config.analysis.max_proposals;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Reports::new(&mut conn);

    let mut report = repo
        .get_for_owner(current_user.id, id)
        .await?
        .ok_or_else(|| report_not_found(id))?;

    // A PROCESSING report blocks new runs unless its analysis is stale, in
    // which case this request fails it and continues as from FAILED. Keying
    // the takeover on the observed start timestamp means a fresh concurrent
    // submission is never clobbered.
    if report.status == ReportStatus::Processing {
        let started_at = report.analysis_started_at.ok_or_else(|| Error::Internal {
            operation: "read the analysis start time of a processing report".to_string(),
        })?;
        let stale_after = chrono::Duration::from_std(state.config.analysis.stale_after)
            .map_err(|e| anyhow::anyhow!("staleness window out of range: {e}"))?;

        if Utc::now().signed_duration_since(started_at) <= stale_after {
            return Err(Error::Conflict {
                message: "Report is already processing".to_string(),
            });
        }

        let taken_over = repo
            .fail_stale(
                report.id,
                started_at,
                STALE_FAILURE_REASON,
                &json!({"last_error": STALE_FAILURE_REASON}),
            )
            .await?;
        if !taken_over {
            return Err(Error::Conflict {
                message: "Report is already processing".to_string(),
            });
        }
        tracing::warn!(report_id = %report.id, "took over stale analysis");
        repo.add_event(
            report.id,
            ReportEventType::AnalysisFailed,
            json!({"reason": STALE_FAILURE_REASON}),
        )
        .await?;

        report = repo
            .get_for_owner(current_user.id, id)
            .await?
            .ok_or_else(|| report_not_found(id))?;
    }

    if !trigger.eligible_from(report.status) {
        return Err(Error::Conflict {
            message: format!(
                "Cannot {} a report in status {}",
                trigger.as_str(),
                report.status
            ),
        });
    }

    // An unconfigured analyzer rejects here, before any quota or state change
    if !state.analyzer.is_available() {
        return Err(Error::AnalyzerUnavailable {
            message: "no analyzer backend configured".to_string(),
        });
    }

    // Reserve quota before the transition. Grants are never returned, so a
    // lost transition race below still costs the caller a unit.
    let mut quotas = Quotas::new(&mut conn);
    let limit = quotas
        .effective_limit(current_user.id, QuotaKind::ReportAnalysis)
        .await?;
    let today = Utc::now().date_naive();
    if !quotas
        .reserve(current_user.id, today, QuotaKind::ReportAnalysis, limit)
        .await?
    {
        return Err(Error::QuotaExceeded {
            kind: QuotaKind::ReportAnalysis,
            limit,
        });
    }

    let started_at = Utc::now();
    let mut repo = Reports::new(&mut conn);
    if !repo
        .begin_processing(report.id, report.status, started_at)
        .await?
    {
        return Err(Error::Conflict {
            message: "Report is already processing".to_string(),
        });
    }
    repo.add_event(
        report.id,
        ReportEventType::Submitted,
        json!({"trigger": trigger.as_str()}),
    )
    .await?;
    repo.add_event(
        report.id,
        ReportEventType::AnalysisStarted,
        json!({"max_proposals": max_proposals}),
    )
    .await?;

    let prompt = compose_prompt(&report);

    // Release the connection for the duration of the network call
    drop(conn);

    let outcome = state.analyzer.analyze(&prompt, max_proposals).await;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match outcome {
        Err(e) => {
            let reason = e.to_string();
            tracing::warn!(report_id = %report.id, %reason, "analysis failed");

            let mut repo = Reports::new(&mut conn);
            if repo
                .mark_failed(report.id, &reason, &json!({"last_error": reason}))
                .await?
            {
                repo.add_event(
                    report.id,
                    ReportEventType::AnalysisFailed,
                    json!({"reason": reason}),
                )
                .await?;
            }

            // Failure is data, not an HTTP error: return the persisted report
            let failed = repo
                .get_for_owner(current_user.id, id)
                .await?
                .ok_or_else(|| report_not_found(id))?;
            let detail = assemble_detail(&mut conn, failed).await?;
            Ok(Json(detail))
        }
        Ok(mut analysis) => {
            analysis.proposals.truncate(max_proposals);
            let completed_at = Utc::now();

            let mut repo = Reports::new(&mut conn);
            let completed = repo
                .mark_completed(
                    report.id,
                    &analysis.model,
                    analysis.confidence,
                    completed_at,
                    &json!({"proposals": analysis.proposals}),
                )
                .await?;
            if !completed {
                // Another request failed this run as stale while we waited
                return Err(Error::Conflict {
                    message: "Analysis was taken over by another request".to_string(),
                });
            }
            repo.add_event(
                report.id,
                ReportEventType::ProposalsRecorded,
                json!({"count": analysis.proposals.len()}),
            )
            .await?;
            repo.add_event(
                report.id,
                ReportEventType::AnalysisCompleted,
                json!({"model": analysis.model, "confidence": analysis.confidence}),
            )
            .await?;

            if report.auto_ticket_enabled {
                let mut card_ids = Vec::with_capacity(analysis.proposals.len());
                for proposal in &analysis.proposals {
                    let due_date = proposal
                        .due_in_days
                        .map(|days| completed_at.date_naive() + chrono::Duration::days(days));

                    let mut cards = Cards::new(&mut conn);
                    let card = cards
                        .create(&CardCreateDBRequest {
                            owner_id: current_user.id,
                            title: proposal.title.clone(),
                            summary: proposal.summary.clone(),
                            status: proposal.status.unwrap_or(CardStatus::Open),
                            priority: proposal.priority.unwrap_or(CardPriority::Medium),
                            due_date,
                            labels: proposal.labels.clone(),
                            origin: CardOrigin::Analysis,
                            source_report_id: Some(report.id),
                        })
                        .await?;

                    let mut repo = Reports::new(&mut conn);
                    repo.add_card_link(report.id, card.id, "primary", analysis.confidence)
                        .await?;
                    card_ids.push(card.id);
                }

                let mut repo = Reports::new(&mut conn);
                repo.add_event(
                    report.id,
                    ReportEventType::CardsLinked,
                    json!({"card_ids": card_ids}),
                )
                .await?;
            }

            // Snapshot the full detail, then destroy the report. The response
            // is the last trace of it; created cards persist on their own.
            let mut repo = Reports::new(&mut conn);
            let final_report = repo
                .get_for_owner(current_user.id, id)
                .await?
                .ok_or_else(|| report_not_found(id))?;
            let detail = assemble_detail(&mut conn, final_report).await?;

            let mut repo = Reports::new(&mut conn);
            repo.delete(report.id).await?;
            tracing::info!(report_id = %report.id, cards = detail.linked_cards.len(), "analysis completed, report destroyed");

            Ok(Json(detail))
        }
    }
}

/// Flatten a report into the analyzer prompt: one tag line, then each section
/// in stored order.
fn compose_prompt(report: &ReportDBResponse) -> String {
    let mut parts = Vec::with_capacity(report.sections.0.len() + 1);
    if !report.tags.0.is_empty() {
        parts.push(format!("Tags: {}", report.tags.0.join(", ")));
    }
    for section in &report.sections.0 {
        match &section.title {
            Some(title) => parts.push(format!("{}:\n{}", title, section.body)),
            None => parts.push(section.body.clone()),
        }
    }
    parts.join("\n\n")
}

/// Detail view for one report: event log in emission order plus linked cards
/// in link order.
async fn assemble_detail(
    conn: &mut SqliteConnection,
    report: ReportDBResponse,
) -> Result<ReportDetailResponse> {
    let mut repo = Reports::new(&mut *conn);
    let events = repo.list_events(report.id).await?;
    let links = repo.list_card_links(report.id).await?;

    let mut cards = Cards::new(&mut *conn);
    let mut card_map = cards.get_bulk(links.iter().map(|l| l.card_id).collect()).await?;

    let linked_cards = links
        .iter()
        .filter_map(|link| {
            card_map
                .remove(&link.card_id)
                .map(|card| LinkedCardResponse::new(CardResponse::from(card), link))
        })
        .collect();

    Ok(ReportDetailResponse::assemble(report, events, linked_cards))
}

fn report_not_found(id: ReportId) -> Error {
    Error::NotFound {
        resource: "Report".to_string(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::compose_prompt;
    use crate::analyzer::scripted::ScriptedAnalyzer;
    use crate::db::handlers::{Quotas, Reports};
    use crate::db::models::quotas::QuotaKind;
    use crate::db::models::reports::{ReportSection, ReportStatus};
    use crate::test_utils::{
        auth_header, create_test_app, create_test_app_with_analyzer, create_test_user,
    };
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::Utc;
    use serde_json::json;
    use sqlx::SqlitePool;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn create_draft(
        server: &TestServer,
        header: &(String, String),
        auto_ticket: bool,
    ) -> serde_json::Value {
        let response = server
            .post("/api/v1/reports")
            .add_header(header.0.clone(), header.1.clone())
            .json(&json!({
                "sections": [
                    {"title": "Summary", "body": "Pump pressure dropped overnight"},
                    {"body": "Filter looks clogged"}
                ],
                "tags": ["shift-a", "pump"],
                "auto_ticket_enabled": auto_ticket
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    #[test]
    fn test_compose_prompt_tag_line_and_section_order() {
        let report = crate::db::models::reports::ReportDBResponse {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            status: ReportStatus::Draft,
            tags: sqlx::types::Json(vec!["shift-a".to_string(), "pump".to_string()]),
            sections: sqlx::types::Json(vec![
                ReportSection {
                    title: Some("Summary".to_string()),
                    body: "Pressure dropped".to_string(),
                },
                ReportSection {
                    title: None,
                    body: "Filter clogged".to_string(),
                },
            ]),
            auto_ticket_enabled: false,
            analysis_model: None,
            analysis_started_at: None,
            analysis_completed_at: None,
            failure_reason: None,
            confidence: None,
            processing_meta: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(
            compose_prompt(&report),
            "Tags: shift-a, pump\n\nSummary:\nPressure dropped\n\nFilter clogged"
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_draft_normalizes_and_logs_event(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let response = server
            .post("/api/v1/reports")
            .add_header(header.0.clone(), header.1.clone())
            .json(&json!({
                "sections": [
                    {"title": "  Summary  ", "body": "  trimmed  "},
                    {"body": "   "}
                ],
                "tags": ["a", "a", " b "]
            }))
            .await;
        response.assert_status(StatusCode::CREATED);

        let report: serde_json::Value = response.json();
        assert_eq!(report["status"], "draft");
        assert_eq!(report["sections"].as_array().unwrap().len(), 1);
        assert_eq!(report["sections"][0]["body"], "trimmed");
        assert_eq!(report["tags"], json!(["a", "b"]));
        assert_eq!(report["events"][0]["event_type"], "draft_created");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_draft_with_no_content_is_rejected(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let response = server
            .post("/api/v1/reports")
            .add_header(header.0, header.1)
            .json(&json!({"sections": [{"body": "   "}]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_foreign_report_reads_as_not_found(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "owner@example.com").await;
        let other = create_test_user(&pool, "other@example.com").await;

        let report = create_draft(&server, &auth_header(&user), false).await;

        let header = auth_header(&other);
        let response = server
            .get(&format!("/api/v1/reports/{}", report["id"].as_str().unwrap()))
            .add_header(header.0, header.1)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_editable_only_from_draft_or_failed(pool: SqlitePool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, false).await;
        let id: Uuid = report["id"].as_str().unwrap().parse().unwrap();

        let response = server
            .patch(&format!("/api/v1/reports/{id}"))
            .add_header(header.0.clone(), header.1.clone())
            .json(&json!({"tags": ["replaced"]}))
            .await;
        response.assert_status_ok();
        let updated: serde_json::Value = response.json();
        assert_eq!(updated["tags"], json!(["replaced"]));
        // The original sections survive a tags-only patch
        assert_eq!(updated["sections"].as_array().unwrap().len(), 2);

        // Force PROCESSING and verify the patch conflicts
        {
            let mut conn = pool.acquire().await.unwrap();
            let mut repo = Reports::new(&mut conn);
            assert!(repo
                .begin_processing(id, ReportStatus::Draft, Utc::now())
                .await
                .unwrap());
        }

        let response = server
            .patch(&format!("/api/v1/reports/{id}"))
            .add_header(header.0, header.1)
            .json(&json!({"tags": ["nope"]}))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_submit_success_returns_snapshot_and_destroys_report(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        analyzer.push_single_proposal("Check the intake filter");
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer.clone()).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, false).await;
        let id = report["id"].as_str().unwrap();

        let response = server
            .post(&format!("/api/v1/reports/{id}/submit"))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status_ok();

        let snapshot: serde_json::Value = response.json();
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["analysis_model"], "scripted-model");
        assert_eq!(snapshot["pending_proposals"][0]["title"], "Check the intake filter");

        let types: Vec<&str> = snapshot["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(
            types,
            vec![
                "draft_created",
                "submitted",
                "analysis_started",
                "proposals_recorded",
                "analysis_completed",
            ]
        );

        // The prompt carried the tag line and both sections
        let prompts = analyzer.prompts();
        assert!(prompts[0].starts_with("Tags: shift-a, pump"));
        assert!(prompts[0].contains("Summary:\nPump pressure dropped overnight"));

        // Completion is destructive
        let response = server
            .get(&format!("/api/v1/reports/{id}"))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        // One unit of quota was consumed
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);
        let used = quotas
            .used_on(user.id, Utc::now().date_naive(), QuotaKind::ReportAnalysis)
            .await
            .unwrap();
        assert_eq!(used, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_submit_with_auto_ticket_materializes_cards(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        analyzer.push_success(crate::analyzer::Analysis {
            model: "scripted-model".to_string(),
            confidence: Some(0.8),
            proposals: vec![
                crate::analyzer::CardProposal {
                    title: "Replace filter".to_string(),
                    summary: Some("Intake filter is clogged".to_string()),
                    status: None,
                    priority: Some(crate::db::models::cards::CardPriority::High),
                    due_in_days: Some(3),
                    labels: vec!["maintenance".to_string()],
                    subtasks: vec![],
                },
                crate::analyzer::CardProposal {
                    title: "Inspect pump seals".to_string(),
                    summary: None,
                    status: None,
                    priority: None,
                    due_in_days: None,
                    labels: vec![],
                    subtasks: vec![],
                },
            ],
        });
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, true).await;
        let id = report["id"].as_str().unwrap();

        let response = server
            .post(&format!("/api/v1/reports/{id}/submit"))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status_ok();

        let snapshot: serde_json::Value = response.json();
        assert_eq!(snapshot["linked_cards"].as_array().unwrap().len(), 2);
        assert_eq!(snapshot["linked_cards"][0]["card"]["title"], "Replace filter");
        assert_eq!(snapshot["linked_cards"][0]["link_role"], "primary");
        assert_eq!(snapshot["linked_cards"][0]["confidence"], 0.8);
        let types: Vec<&str> = snapshot["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert!(types.contains(&"cards_linked"));

        // Cards outlive the destroyed report
        let response = server
            .get("/api/v1/cards")
            .add_query_param("origin", "analysis")
            .add_header(header.0, header.1)
            .await;
        let cards: serde_json::Value = response.json();
        assert_eq!(cards["total_count"], 2);
        assert_eq!(cards["data"][0]["source_report_id"], json!(id));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_submit_failure_persists_failed_report_and_allows_retry(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        analyzer.push_failure("backend exploded");
        analyzer.push_single_proposal("Second time lucky");
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, false).await;
        let id = report["id"].as_str().unwrap();

        let response = server
            .post(&format!("/api/v1/reports/{id}/submit"))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        // Analyzer failure is data, not an HTTP error
        response.assert_status_ok();

        let failed: serde_json::Value = response.json();
        assert_eq!(failed["status"], "failed");
        assert!(failed["failure_reason"]
            .as_str()
            .unwrap()
            .contains("backend exploded"));

        // The report is still there
        let response = server
            .get(&format!("/api/v1/reports/{id}"))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status_ok();

        let response = server
            .post(&format!("/api/v1/reports/{id}/retry"))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status_ok();
        let snapshot: serde_json::Value = response.json();
        assert_eq!(snapshot["status"], "completed");

        // Both runs consumed quota
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);
        let used = quotas
            .used_on(user.id, Utc::now().date_naive(), QuotaKind::ReportAnalysis)
            .await
            .unwrap();
        assert_eq!(used, 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_retry_from_draft_conflicts(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, false).await;
        let id = report["id"].as_str().unwrap();

        let response = server
            .post(&format!("/api/v1/reports/{id}/retry"))
            .add_header(header.0, header.1)
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_submit_without_analyzer_is_unavailable_and_free(pool: SqlitePool) {
        // Default test app carries the disabled analyzer
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, false).await;
        let id = report["id"].as_str().unwrap();

        let response = server
            .post(&format!("/api/v1/reports/{id}/submit"))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        // No state change, no quota consumed
        let response = server
            .get(&format!("/api/v1/reports/{id}"))
            .add_header(header.0, header.1)
            .await;
        let detail: serde_json::Value = response.json();
        assert_eq!(detail["status"], "draft");
        assert_eq!(detail["events"].as_array().unwrap().len(), 1);

        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);
        let used = quotas
            .used_on(user.id, Utc::now().date_naive(), QuotaKind::ReportAnalysis)
            .await
            .unwrap();
        assert_eq!(used, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_submit_while_processing_conflicts_without_events(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        analyzer.push_single_proposal("unused");
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, false).await;
        let id: Uuid = report["id"].as_str().unwrap().parse().unwrap();

        {
            let mut conn = pool.acquire().await.unwrap();
            let mut repo = Reports::new(&mut conn);
            assert!(repo
                .begin_processing(id, ReportStatus::Draft, Utc::now())
                .await
                .unwrap());
        }

        let response = server
            .post(&format!("/api/v1/reports/{id}/submit"))
            .add_header(header.0, header.1)
            .await;
        response.assert_status(StatusCode::CONFLICT);

        // Only the draft_created event exists
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Reports::new(&mut conn);
        let events = repo.list_events(id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_stale_processing_is_taken_over(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        analyzer.push_single_proposal("After takeover");
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        let report = create_draft(&server, &header, false).await;
        let id: Uuid = report["id"].as_str().unwrap().parse().unwrap();

        // An analysis that started an hour ago is well past the 10m window
        {
            let mut conn = pool.acquire().await.unwrap();
            let mut repo = Reports::new(&mut conn);
            let started_at = Utc::now() - chrono::Duration::hours(1);
            assert!(repo
                .begin_processing(id, ReportStatus::Draft, started_at)
                .await
                .unwrap());
        }

        let response = server
            .post(&format!("/api/v1/reports/{id}/submit"))
            .add_header(header.0, header.1)
            .await;
        response.assert_status_ok();

        let snapshot: serde_json::Value = response.json();
        assert_eq!(snapshot["status"], "completed");

        // The takeover left its trace before the fresh run's events
        let types: Vec<&str> = snapshot["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(
            types,
            vec![
                "draft_created",
                "analysis_failed",
                "submitted",
                "analysis_started",
                "proposals_recorded",
                "analysis_completed",
            ]
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_submit_denied_at_quota_limit_leaves_report_untouched(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        analyzer.push_single_proposal("only one");
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        {
            let mut conn = pool.acquire().await.unwrap();
            let mut quotas = Quotas::new(&mut conn);
            quotas
                .set_override(user.id, QuotaKind::ReportAnalysis, 1)
                .await
                .unwrap();
        }

        let first = create_draft(&server, &header, false).await;
        let second = create_draft(&server, &header, false).await;

        let response = server
            .post(&format!(
                "/api/v1/reports/{}/submit",
                first["id"].as_str().unwrap()
            ))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status_ok();

        let response = server
            .post(&format!(
                "/api/v1/reports/{}/submit",
                second["id"].as_str().unwrap()
            ))
            .add_header(header.0.clone(), header.1.clone())
            .await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        let body: serde_json::Value = response.json();
        assert_eq!(body["limit"], 1);

        // The denied report is still an untouched draft
        let response = server
            .get(&format!("/api/v1/reports/{}", second["id"].as_str().unwrap()))
            .add_header(header.0, header.1)
            .await;
        let detail: serde_json::Value = response.json();
        assert_eq!(detail["status"], "draft");
        assert_eq!(detail["events"].as_array().unwrap().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_reports_with_status_filter(pool: SqlitePool) {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        analyzer.push_failure("boom");
        let (server, _state) = create_test_app_with_analyzer(pool.clone(), analyzer).await;
        let user = create_test_user(&pool, "r@example.com").await;
        let header = auth_header(&user);

        create_draft(&server, &header, false).await;
        let failing = create_draft(&server, &header, false).await;

        server
            .post(&format!(
                "/api/v1/reports/{}/submit",
                failing["id"].as_str().unwrap()
            ))
            .add_header(header.0.clone(), header.1.clone())
            .await
            .assert_status_ok();

        let response = server
            .get("/api/v1/reports")
            .add_header(header.0.clone(), header.1.clone())
            .await;
        let body: serde_json::Value = response.json();
        assert_eq!(body["total_count"], 2);

        let response = server
            .get("/api/v1/reports")
            .add_query_param("status", "failed")
            .add_header(header.0, header.1)
            .await;
        let body: serde_json::Value = response.json();
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["data"][0]["id"], failing["id"]);
    }
}
