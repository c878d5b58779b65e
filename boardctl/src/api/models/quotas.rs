//! API models for quota administration.

use crate::db::models::quotas::{
    QuotaDefaultsDBResponse, QuotaDefaultsUpdateDBRequest, QuotaKind, QuotaOverrideDBResponse,
};
use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The deployment-wide default limits. A limit of 0 means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaDefaultsResponse {
    pub card_creation_limit: i64,
    pub evaluation_limit: i64,
    pub report_analysis_limit: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<QuotaDefaultsDBResponse> for QuotaDefaultsResponse {
    fn from(defaults: QuotaDefaultsDBResponse) -> Self {
        Self {
            card_creation_limit: defaults.card_creation_limit,
            evaluation_limit: defaults.evaluation_limit,
            report_analysis_limit: defaults.report_analysis_limit,
            updated_at: defaults.updated_at,
        }
    }
}

/// Request body replacing the deployment default limits.
///
/// Values are clamped to >= 0.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct QuotaDefaultsUpdateRequest {
    pub card_creation_limit: i64,
    pub evaluation_limit: i64,
    pub report_analysis_limit: i64,
}

impl From<QuotaDefaultsUpdateRequest> for QuotaDefaultsUpdateDBRequest {
    fn from(request: QuotaDefaultsUpdateRequest) -> Self {
        Self {
            card_creation_limit: request.card_creation_limit.max(0),
            evaluation_limit: request.evaluation_limit.max(0),
            report_analysis_limit: request.report_analysis_limit.max(0),
        }
    }
}

/// A per-user override row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaOverrideResponse {
    #[schema(value_type = Uuid)]
    pub user_id: UserId,
    pub quota_kind: QuotaKind,
    /// None means "inherit the deployment default"
    pub daily_limit: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl From<QuotaOverrideDBResponse> for QuotaOverrideResponse {
    fn from(row: QuotaOverrideDBResponse) -> Self {
        Self {
            user_id: row.user_id,
            quota_kind: row.quota_kind,
            daily_limit: row.daily_limit,
            updated_at: row.updated_at,
        }
    }
}

/// Request body setting a per-user override for one kind.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct QuotaOverrideUpdateRequest {
    /// 0 means unlimited for this user; negative values are clamped to 0
    pub daily_limit: i64,
}

/// Usage of one quota kind for the caller's current day.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaKindUsage {
    pub kind: QuotaKind,
    /// Effective limit after override resolution; 0 means unlimited
    pub limit: i64,
    pub used: i64,
    /// Absent when the kind is unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
}

/// The caller's quota usage for today, per kind.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaUsageResponse {
    pub quota_date: NaiveDate,
    pub kinds: Vec<QuotaKindUsage>,
}
