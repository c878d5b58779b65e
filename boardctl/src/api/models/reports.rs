//! API models for the report lifecycle.

use crate::analyzer::CardProposal;
use crate::db::models::reports::{
    ReportCardLinkDBResponse, ReportDBResponse, ReportEventDBResponse, ReportEventType,
    ReportSection, ReportStatus,
};
use crate::types::{ReportEventId, ReportId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::cards::CardResponse;
use super::pagination::Pagination;

/// Request body for creating a report draft.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReportCreateRequest {
    /// Ordered content sections; trimmed, empty bodies are dropped
    pub sections: Vec<ReportSection>,
    /// Free-form tags, stored as a deduplicated set
    #[serde(default)]
    pub tags: Vec<String>,
    /// Materialize analysis proposals as cards on completion
    #[serde(default)]
    pub auto_ticket_enabled: bool,
}

/// Request body for updating a report draft.
///
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ReportUpdateRequest {
    pub sections: Option<Vec<ReportSection>>,
    pub tags: Option<Vec<String>>,
    pub auto_ticket_enabled: Option<bool>,
}

/// Query parameters for listing reports
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListReportsQuery {
    /// Pagination parameters
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only return reports in this lifecycle status
    pub status: Option<ReportStatus>,
}

/// A report as returned by the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportResponse {
    #[schema(value_type = Uuid)]
    pub id: ReportId,
    #[schema(value_type = Uuid)]
    pub owner_id: UserId,
    pub status: ReportStatus,
    pub tags: Vec<String>,
    pub auto_ticket_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReportDBResponse> for ReportResponse {
    fn from(report: ReportDBResponse) -> Self {
        Self {
            id: report.id,
            owner_id: report.owner_id,
            status: report.status,
            tags: report.tags.0,
            auto_ticket_enabled: report.auto_ticket_enabled,
            failure_reason: report.failure_reason,
            created_at: report.created_at,
            updated_at: report.updated_at,
        }
    }
}

/// One entry of a report's event log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportEventResponse {
    pub id: ReportEventId,
    pub event_type: ReportEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<ReportEventDBResponse> for ReportEventResponse {
    fn from(event: ReportEventDBResponse) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

/// A card linked to a report, with the link metadata.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LinkedCardResponse {
    pub card: CardResponse,
    pub link_role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl LinkedCardResponse {
    pub fn new(card: CardResponse, link: &ReportCardLinkDBResponse) -> Self {
        Self {
            card,
            link_role: link.link_role.clone(),
            confidence: link.confidence,
        }
    }
}

/// Full report detail: header fields, content, analysis metadata, the ordered
/// event log, linked cards and the last pending proposal batch.
///
/// On successful analysis this is also the submit response, assembled before
/// the report row is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportDetailResponse {
    #[schema(value_type = Uuid)]
    pub id: ReportId,
    #[schema(value_type = Uuid)]
    pub owner_id: UserId,
    pub status: ReportStatus,
    pub tags: Vec<String>,
    pub sections: Vec<ReportSection>,
    pub auto_ticket_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub pending_proposals: Vec<CardProposal>,
    pub linked_cards: Vec<LinkedCardResponse>,
    pub events: Vec<ReportEventResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportDetailResponse {
    pub fn assemble(
        report: ReportDBResponse,
        events: Vec<ReportEventDBResponse>,
        linked_cards: Vec<LinkedCardResponse>,
    ) -> Self {
        let pending_proposals = report.pending_proposals();
        Self {
            id: report.id,
            owner_id: report.owner_id,
            status: report.status,
            tags: report.tags.0,
            sections: report.sections.0,
            auto_ticket_enabled: report.auto_ticket_enabled,
            analysis_model: report.analysis_model,
            analysis_started_at: report.analysis_started_at,
            analysis_completed_at: report.analysis_completed_at,
            failure_reason: report.failure_reason,
            confidence: report.confidence,
            pending_proposals,
            linked_cards,
            events: events.into_iter().map(ReportEventResponse::from).collect(),
            created_at: report.created_at,
            updated_at: report.updated_at,
        }
    }
}

/// Trim tags and drop duplicates and empties, keeping first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .filter_map(|tag| {
            let tag = tag.trim().to_string();
            if tag.is_empty() || !seen.insert(tag.clone()) {
                None
            } else {
                Some(tag)
            }
        })
        .collect()
}
