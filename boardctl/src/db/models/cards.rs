//! Database models for cards.

use crate::types::{CardId, ReportId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Card workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Open,
    InProgress,
    Done,
}

/// Card priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CardPriority {
    Low,
    Medium,
    High,
}

/// How a card came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CardOrigin {
    /// Created directly by a user
    Manual,
    /// Materialized from an accepted analysis proposal
    Analysis,
}

/// Database request for creating a new card
#[derive(Debug, Clone)]
pub struct CardCreateDBRequest {
    pub owner_id: UserId,
    pub title: String,
    pub summary: Option<String>,
    pub status: CardStatus,
    pub priority: CardPriority,
    pub due_date: Option<NaiveDate>,
    pub labels: Vec<String>,
    pub origin: CardOrigin,
    pub source_report_id: Option<ReportId>,
}

/// Database response for a card
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CardDBResponse {
    pub id: CardId,
    pub owner_id: UserId,
    pub title: String,
    pub summary: Option<String>,
    pub status: CardStatus,
    pub priority: CardPriority,
    pub due_date: Option<NaiveDate>,
    pub labels: sqlx::types::Json<Vec<String>>,
    pub origin: CardOrigin,
    pub source_report_id: Option<ReportId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
