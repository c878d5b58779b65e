use crate::{
    AppState,
    api::models::{
        cards::{CardCreateRequest, CardResponse, ListCardsQuery},
        pagination::PaginatedResponse,
        users::CurrentUser,
    },
    db::{
        handlers::{Cards, Quotas, Repository, cards::CardFilter},
        models::{
            cards::{CardCreateDBRequest, CardOrigin, CardPriority, CardStatus},
            quotas::QuotaKind,
        },
    },
    errors::{Error, Result},
    types::CardId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;

/// Create a card
#[utoipa::path(
    post,
    path = "/cards",
    tag = "cards",
    summary = "Create a card",
    description = "Create a card by hand. Consumes one unit of the card_creation daily quota.",
    responses(
        (status = 201, description = "Card created", body = CardResponse),
        (status = 400, description = "Invalid card data"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Daily card_creation quota exhausted"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn create_card(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CardCreateRequest>,
) -> Result<(StatusCode, Json<CardResponse>)> {
    let title = request.title.trim().to_string();
    if title.is_empty() {
        return Err(Error::BadRequest {
            message: "Card title must not be empty".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    // Reserve quota before writing anything; a denial leaves no card behind
    let mut quotas = Quotas::new(&mut conn);
    let limit = quotas
        .effective_limit(current_user.id, QuotaKind::CardCreation)
        .await?;
    let today = Utc::now().date_naive();
    if !quotas
        .reserve(current_user.id, today, QuotaKind::CardCreation, limit)
        .await?
    {
        return Err(Error::QuotaExceeded {
            kind: QuotaKind::CardCreation,
            limit,
        });
    }

    let mut repo = Cards::new(&mut conn);
    let card = repo
        .create(&CardCreateDBRequest {
            owner_id: current_user.id,
            title,
            summary: request.summary,
            status: request.status.unwrap_or(CardStatus::Open),
            priority: request.priority.unwrap_or(CardPriority::Medium),
            due_date: request.due_date,
            labels: request.labels,
            origin: CardOrigin::Manual,
            source_report_id: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CardResponse::from(card))))
}

/// List own cards
#[utoipa::path(
    get,
    path = "/cards",
    tag = "cards",
    summary = "List cards",
    params(
        ListCardsQuery
    ),
    responses(
        (status = 200, description = "Paginated list of the caller's cards", body = PaginatedResponse<CardResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn list_cards(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListCardsQuery>,
) -> Result<Json<PaginatedResponse<CardResponse>>> {
    let (skip, limit) = query.pagination.params();
    let mut filter = CardFilter::new(current_user.id, skip, limit);
    if let Some(origin) = query.origin {
        filter = filter.origin(origin);
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Cards::new(&mut conn);

    let total_count = repo.count(&filter).await?;
    let cards = repo.list(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        cards.into_iter().map(CardResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Get one of the caller's cards
#[utoipa::path(
    get,
    path = "/cards/{id}",
    tag = "cards",
    summary = "Get a card",
    params(
        ("id" = String, Path, description = "Card ID (UUID)"),
    ),
    responses(
        (status = 200, description = "The card", body = CardResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Card not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Boardctl-User" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn get_card(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<CardId>,
) -> Result<Json<CardResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Cards::new(&mut conn);

    let card = repo
        .get_for_owner(current_user.id, id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Card".to_string(),
            id: id.to_string(),
        })?;

    Ok(Json(CardResponse::from(card)))
}
