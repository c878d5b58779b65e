//! Database models for reports and their append-only event log.

use crate::analyzer::CardProposal;
use crate::types::{CardId, ReportEventId, ReportId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Report lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Editable, not yet submitted for analysis
    Draft,
    /// A synchronous analyzer call is in flight for this report
    Processing,
    /// Analysis succeeded; the row is deleted in the same request
    Completed,
    /// Analysis failed; the report persists and can be retried
    Failed,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Event types recorded in a report's append-only log
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportEventType {
    DraftCreated,
    Updated,
    Submitted,
    AnalysisStarted,
    ProposalsRecorded,
    AnalysisCompleted,
    AnalysisFailed,
    CardsLinked,
}

/// One content section of a report. The title is optional, the body is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReportSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
}

/// Trim section text and drop sections whose body is empty afterwards.
///
/// An empty result means the report has no analyzable content; callers reject
/// the write in that case.
pub fn normalize_sections(sections: Vec<ReportSection>) -> Vec<ReportSection> {
    sections
        .into_iter()
        .filter_map(|section| {
            let body = section.body.trim().to_string();
            if body.is_empty() {
                return None;
            }
            let title = section
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            Some(ReportSection { title, body })
        })
        .collect()
}

/// Database request for creating a new report
#[derive(Debug, Clone)]
pub struct ReportCreateDBRequest {
    pub owner_id: UserId,
    pub tags: Vec<String>,
    pub sections: Vec<ReportSection>,
    pub auto_ticket_enabled: bool,
}

/// Database request for updating a report's editable fields
#[derive(Debug, Clone, Default)]
pub struct ReportUpdateDBRequest {
    pub tags: Option<Vec<String>>,
    pub sections: Option<Vec<ReportSection>>,
    pub auto_ticket_enabled: Option<bool>,
}

/// Database response for a report
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportDBResponse {
    pub id: ReportId,
    pub owner_id: UserId,
    pub status: ReportStatus,
    pub tags: sqlx::types::Json<Vec<String>>,
    pub sections: sqlx::types::Json<Vec<ReportSection>>,
    pub auto_ticket_enabled: bool,
    pub analysis_model: Option<String>,
    pub analysis_started_at: Option<DateTime<Utc>>,
    pub analysis_completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub confidence: Option<f64>,
    pub processing_meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportDBResponse {
    /// Proposals stashed by the last successful analysis, if any.
    pub fn pending_proposals(&self) -> Vec<CardProposal> {
        let Some(meta) = &self.processing_meta else {
            return Vec::new();
        };
        match meta.get("proposals") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

/// Database response for a report event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportEventDBResponse {
    pub id: ReportEventId,
    pub report_id: ReportId,
    pub event_type: ReportEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Database response for a report-to-card link
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportCardLinkDBResponse {
    pub report_id: ReportId,
    pub card_id: CardId,
    pub link_role: String,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}
