//! Database models for quota policy and the daily usage ledger.

use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Category of rate-limited action with its own independent daily counter.
///
/// Kinds are a closed enumeration so the mapping onto the defaults columns is
/// checked at compile time instead of going through free-form string keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    CardCreation,
    Evaluation,
    ReportAnalysis,
}

impl QuotaKind {
    pub const ALL: [QuotaKind; 3] = [
        QuotaKind::CardCreation,
        QuotaKind::Evaluation,
        QuotaKind::ReportAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardCreation => "card_creation",
            Self::Evaluation => "evaluation",
            Self::ReportAnalysis => "report_analysis",
        }
    }

    /// Hard-coded limit used when no defaults row can be read or created.
    pub fn fallback_limit(&self) -> i64 {
        match self {
            Self::CardCreation => 50,
            Self::Evaluation => 20,
            Self::ReportAnalysis => 10,
        }
    }

    /// Column of the deployment defaults row that holds this kind's limit.
    pub fn limit_in(&self, defaults: &QuotaDefaultsDBResponse) -> i64 {
        match self {
            Self::CardCreation => defaults.card_creation_limit,
            Self::Evaluation => defaults.evaluation_limit,
            Self::ReportAnalysis => defaults.report_analysis_limit,
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The singleton deployment defaults row (`id` is always 1).
///
/// A limit of 0 means unlimited for that kind.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuotaDefaultsDBResponse {
    pub id: i64,
    pub card_creation_limit: i64,
    pub evaluation_limit: i64,
    pub report_analysis_limit: i64,
    pub updated_at: DateTime<Utc>,
}

/// Database request replacing the deployment default limits
#[derive(Debug, Clone)]
pub struct QuotaDefaultsUpdateDBRequest {
    pub card_creation_limit: i64,
    pub evaluation_limit: i64,
    pub report_analysis_limit: i64,
}

/// Per-(user, kind) override row.
///
/// A NULL `daily_limit` means "inherit the deployment default", which is
/// distinct from 0 (unlimited for this user).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuotaOverrideDBResponse {
    pub user_id: UserId,
    pub quota_kind: QuotaKind,
    pub daily_limit: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the daily usage ledger.
///
/// Keyed by (user, calendar day, kind); created lazily on first reservation
/// and never decremented.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyQuotaUsageDBResponse {
    pub user_id: UserId,
    pub quota_date: NaiveDate,
    pub quota_kind: QuotaKind,
    pub used_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_kind_round_trips_through_serde() {
        for kind in QuotaKind::ALL {
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
            let decoded: QuotaKind = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn test_limit_in_maps_each_kind_to_its_column() {
        let defaults = QuotaDefaultsDBResponse {
            id: 1,
            card_creation_limit: 1,
            evaluation_limit: 2,
            report_analysis_limit: 3,
            updated_at: Utc::now(),
        };
        assert_eq!(QuotaKind::CardCreation.limit_in(&defaults), 1);
        assert_eq!(QuotaKind::Evaluation.limit_in(&defaults), 2);
        assert_eq!(QuotaKind::ReportAnalysis.limit_in(&defaults), 3);
    }
}
