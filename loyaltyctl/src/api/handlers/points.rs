use crate::{
    api::models::{
        points::{
            AdjustPointsRequest, LedgerEntryResponse, LedgerMutationResponse, ListLedgerEntriesQuery, PointsHistoryQuery,
            PointsSummaryResponse, RedeemRequest,
        },
        users::CurrentUser,
    },
    auth::permissions::{
        can_read_all_resources, can_read_own_resource, can_read_user_resource, forbidden, operation, resource, RequiresPermission,
    },
    db::{
        handlers::{Points, Users},
        models::points::{AdjustmentDBRequest, RedemptionDBRequest},
    },
    errors::{Error, Result},
    types::{LedgerEntryId, Operation, Permission, Resource, UserId, UserIdOrCurrent},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

// GET /users/{user_id}/points - Balance and recent history
#[utoipa::path(
    get,
    path = "/users/{user_id}/points",
    tag = "points",
    summary = "Get points balance",
    description = "Get a user's points balance with their most recent ledger entries, newest first",
    params(
        ("user_id" = String, Path, description = "User ID (UUID) or 'current' for current user"),
        PointsHistoryQuery,
    ),
    responses(
        (status = 200, description = "Balance and history", body = PointsSummaryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - can only view own points"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn get_user_points(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    Query(query): Query<PointsHistoryQuery>,
    current_user: CurrentUser,
) -> Result<Json<PointsSummaryResponse>> {
    let target_user_id = user_id.resolve(current_user.id);

    if !can_read_user_resource(&current_user, Resource::Points, target_user_id) {
        return Err(Error::InsufficientPermissions {
            required: Permission::Any(vec![
                Permission::Allow(Resource::Points, Operation::ReadAll),
                Permission::Allow(Resource::Points, Operation::ReadOwn),
            ]),
            action: Operation::ReadAll,
            resource: format!("points for user {target_user_id}"),
        });
    }

    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if target_user_id != current_user.id && !Users::new(&mut conn).exists(target_user_id).await? {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: target_user_id.to_string(),
        });
    }

    let mut points = Points::new(&mut conn);
    let total_points = points.get_balance(target_user_id).await?;
    let history = points.list_user_entries(target_user_id, skip, limit).await?;

    Ok(Json(PointsSummaryResponse {
        user_id: target_user_id,
        total_points,
        history: history.into_iter().map(LedgerEntryResponse::from).collect(),
    }))
}

// POST /users/{user_id}/points/adjust - Manual correction
#[utoipa::path(
    post,
    path = "/users/{user_id}/points/adjust",
    tag = "points",
    summary = "Adjust points balance",
    description = "Add (positive) or remove (negative) points from a user's balance, recorded against the caller (Points:UpdateAll required)",
    request_body = AdjustPointsRequest,
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 201, description = "Adjustment recorded", body = LedgerMutationResponse),
        (status = 400, description = "Bad request - zero adjustment"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found"),
        (status = 422, description = "Adjustment would take the balance below zero"),
        (status = 503, description = "Balance is locked by a concurrent update, retry"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn adjust_user_points(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Points, operation::UpdateAll>,
    Json(data): Json<AdjustPointsRequest>,
) -> Result<(StatusCode, Json<LedgerMutationResponse>)> {
    let request = AdjustmentDBRequest {
        user_id,
        delta: data.points,
        reason: data.reason,
        actor_id: current_user.id,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let result = Points::new(&mut conn).adjust(&request, &state.config.points).await;

    match result {
        Ok(mutation) => {
            if let Some(metrics) = &state.metrics {
                metrics.record_adjustment(request.delta);
            }
            Ok((StatusCode::CREATED, Json(mutation.into())))
        }
        Err(e) => {
            if let Some(metrics) = &state.metrics {
                metrics.record_rejection(&e);
            }
            Err(e.into())
        }
    }
}

// POST /redemptions - Spend the caller's points
#[utoipa::path(
    post,
    path = "/redemptions",
    tag = "points",
    summary = "Redeem points",
    description = "Spend the caller's points on products. Either the whole redemption goes through or nothing is spent.",
    request_body = RedeemRequest,
    responses(
        (status = 201, description = "Redemption recorded", body = LedgerMutationResponse),
        (status = 400, description = "Bad request - empty redemption or unavailable product"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
        (status = 422, description = "Insufficient points"),
        (status = 503, description = "Balance is locked by a concurrent update, retry"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn redeem_points(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Points, operation::CreateOwn>,
    Json(data): Json<RedeemRequest>,
) -> Result<(StatusCode, Json<LedgerMutationResponse>)> {
    let request = RedemptionDBRequest {
        user_id: current_user.id,
        items: data.items.into_iter().map(Into::into).collect(),
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match Points::new(&mut conn).redeem(&request, &state.config.points).await {
        Ok(mutation) => {
            if let Some(metrics) = &state.metrics {
                metrics.record_redemption(mutation.entry.points);
            }
            Ok((StatusCode::CREATED, Json(mutation.into())))
        }
        Err(e) => {
            if let Some(metrics) = &state.metrics {
                metrics.record_rejection(&e);
            }
            Err(e.into())
        }
    }
}

// GET /ledger-entries - List ledger entries
#[utoipa::path(
    get,
    path = "/ledger-entries",
    tag = "points",
    summary = "List ledger entries",
    description = "List the caller's ledger entries, or any user's with Points:ReadAll. Newest first.",
    params(ListLedgerEntriesQuery),
    responses(
        (status = 200, description = "List of ledger entries", body = [LedgerEntryResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn list_ledger_entries(
    State(state): State<AppState>,
    Query(query): Query<ListLedgerEntriesQuery>,
    current_user: CurrentUser,
) -> Result<Json<Vec<LedgerEntryResponse>>> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let can_read_all = can_read_all_resources(&current_user, Resource::Points);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut points = Points::new(&mut conn);

    let entries = match query.user_id {
        Some(user_id) if can_read_all || can_read_own_resource(&current_user, Resource::Points, user_id) => {
            points.list_user_entries(user_id, skip, limit).await?
        }
        Some(_) => return Err(forbidden(Resource::Points, Operation::ReadAll)),
        None if can_read_all => points.list_all_entries(skip, limit).await?,
        None if can_read_own_resource(&current_user, Resource::Points, current_user.id) => {
            points.list_user_entries(current_user.id, skip, limit).await?
        }
        None => return Err(forbidden(Resource::Points, Operation::ReadOwn)),
    };

    Ok(Json(entries.into_iter().map(LedgerEntryResponse::from).collect()))
}

// GET /ledger-entries/{entry_id} - Get a single entry
#[utoipa::path(
    get,
    path = "/ledger-entries/{entry_id}",
    tag = "points",
    summary = "Get ledger entry",
    params(
        ("entry_id" = uuid::Uuid, Path, description = "Ledger entry ID"),
    ),
    responses(
        (status = 200, description = "Ledger entry", body = LedgerEntryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Ledger entry not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn get_ledger_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<LedgerEntryId>,
    current_user: CurrentUser,
) -> Result<Json<LedgerEntryResponse>> {
    let not_found = || Error::NotFound {
        resource: "Ledger entry".to_string(),
        id: entry_id.to_string(),
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let entry = Points::new(&mut conn).get_entry_by_id(entry_id).await?.ok_or_else(not_found)?;

    if !can_read_user_resource(&current_user, Resource::Points, entry.user_id) {
        return Err(not_found());
    }

    Ok(Json(LedgerEntryResponse::from(entry)))
}
