//! OpenAPI documentation for the management API at `/api/v1/*`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{analyzer, api, db};

/// Security scheme for the management API: the trusted-proxy identity header.
struct ProxyHeaderSecurityAddon;

impl Modify for ProxyHeaderSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Boardctl-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-boardctl-user",
                    "Identity header injected by the authenticating reverse proxy. \
                     Contains the caller's email address. The header name is configurable.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "Management API server")
    ),
    modifiers(&ProxyHeaderSecurityAddon),
    paths(
        api::handlers::reports::create_report,
        api::handlers::reports::list_reports,
        api::handlers::reports::get_report,
        api::handlers::reports::update_report,
        api::handlers::reports::submit_report,
        api::handlers::reports::retry_report,
        api::handlers::cards::create_card,
        api::handlers::cards::list_cards,
        api::handlers::cards::get_card,
        api::handlers::quotas::get_quota_defaults,
        api::handlers::quotas::update_quota_defaults,
        api::handlers::quotas::get_quota_usage,
        api::handlers::quotas::list_quota_overrides,
        api::handlers::quotas::set_quota_override,
        api::handlers::quotas::clear_quota_override,
        api::handlers::users::get_current_user,
        api::handlers::users::list_users,
    ),
    components(
        schemas(
            api::models::reports::ReportCreateRequest,
            api::models::reports::ReportUpdateRequest,
            api::models::reports::ReportResponse,
            api::models::reports::ReportDetailResponse,
            api::models::reports::ReportEventResponse,
            api::models::reports::LinkedCardResponse,
            api::models::cards::CardCreateRequest,
            api::models::cards::CardResponse,
            api::models::quotas::QuotaDefaultsResponse,
            api::models::quotas::QuotaDefaultsUpdateRequest,
            api::models::quotas::QuotaOverrideResponse,
            api::models::quotas::QuotaOverrideUpdateRequest,
            api::models::quotas::QuotaUsageResponse,
            api::models::quotas::QuotaKindUsage,
            api::models::users::CurrentUser,
            api::models::users::UserResponse,
            api::models::pagination::PaginatedResponse<api::models::reports::ReportResponse>,
            api::models::pagination::PaginatedResponse<api::models::cards::CardResponse>,
            api::models::pagination::PaginatedResponse<api::models::users::UserResponse>,
            db::models::reports::ReportStatus,
            db::models::reports::ReportEventType,
            db::models::reports::ReportSection,
            db::models::cards::CardStatus,
            db::models::cards::CardPriority,
            db::models::cards::CardOrigin,
            db::models::quotas::QuotaKind,
            analyzer::CardProposal,
            analyzer::ProposalSubtask,
        )
    ),
    tags(
        (name = "reports", description = "Draft free-form reports, submit them for analysis and inspect the outcome.

A report moves draft → processing → completed or failed. Completion is destructive: the submit response is the report's final snapshot and the row is gone afterwards. Failed reports persist and can be edited and retried."),
        (name = "cards", description = "Units of actionable work. Created by hand or materialized from analysis proposals when a report has auto-ticketing enabled."),
        (name = "quotas", description = "Per-user daily operation budgets. Limits resolve per-user override first, then instance defaults; a limit of 0 means unlimited."),
        (name = "users", description = "Identity endpoints. Users are resolved from the trusted proxy header."),
    )
)]
pub struct ApiDoc;
