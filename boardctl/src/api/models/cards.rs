//! API models for cards.

use crate::db::models::cards::{CardDBResponse, CardOrigin, CardPriority, CardStatus};
use crate::types::{CardId, ReportId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;

/// Request body for creating a card by hand.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CardCreateRequest {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: Option<CardStatus>,
    #[serde(default)]
    pub priority: Option<CardPriority>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Query parameters for listing cards
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListCardsQuery {
    /// Pagination parameters
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only return cards with this origin
    pub origin: Option<CardOrigin>,
}

/// A card as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CardResponse {
    #[schema(value_type = Uuid)]
    pub id: CardId,
    #[schema(value_type = Uuid)]
    pub owner_id: UserId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub status: CardStatus,
    pub priority: CardPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub labels: Vec<String>,
    pub origin: CardOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Uuid>)]
    pub source_report_id: Option<ReportId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CardDBResponse> for CardResponse {
    fn from(card: CardDBResponse) -> Self {
        Self {
            id: card.id,
            owner_id: card.owner_id,
            title: card.title,
            summary: card.summary,
            status: card.status,
            priority: card.priority,
            due_date: card.due_date,
            labels: card.labels.0,
            origin: card.origin,
            source_report_id: card.source_report_id,
            created_at: card.created_at,
            updated_at: card.updated_at,
        }
    }
}
