use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, Role};
use crate::entities::settlement_tx;
use crate::errors::ServiceError;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SettlementQuery {
    /// Admin only. Restaurant staff are always scoped to their own restaurant.
    pub restaurant_id: Option<Uuid>,
}

/// Resolve which restaurant ledger the caller may read.
fn scope_restaurant(user: &AuthUser, query: &SettlementQuery) -> Result<Uuid, ServiceError> {
    match user.role {
        Role::Admin => query
            .restaurant_id
            .ok_or_else(|| ServiceError::Validation("restaurant_id is required".to_string())),
        Role::Restaurant => user.restaurant_id.ok_or_else(|| {
            ServiceError::Forbidden("restaurant token lacks a restaurant claim".to_string())
        }),
        Role::Customer => Err(ServiceError::Forbidden(
            "settlement data is restricted to restaurant staff".to_string(),
        )),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub restaurant_id: Uuid,
    pub balance: Decimal,
}

#[utoipa::path(
    get,
    path = "/api/v1/restaurant/balance",
    summary = "Restaurant balance",
    description = "Current settlement balance. Restaurant staff see their own \
                   restaurant; admins pass `restaurant_id`.",
    params(
        ("restaurant_id" = Option<Uuid>, Query, description = "Ledger to read (admin only)"),
    ),
    responses(
        (status = 200, description = "Balance retrieved", body = ApiResponse<BalanceResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn restaurant_balance(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SettlementQuery>,
) -> ApiResult<BalanceResponse> {
    let restaurant_id = scope_restaurant(&user, &query)?;
    let balance = state.services.settlement.balance(restaurant_id).await?;
    Ok(Json(ApiResponse::success(BalanceResponse {
        restaurant_id,
        balance,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/restaurant/transactions",
    summary = "Restaurant settlement history",
    description = "Settlement ledger rows, newest first",
    params(
        ("restaurant_id" = Option<Uuid>, Query, description = "Ledger to read (admin only)"),
    ),
    responses(
        (status = 200, description = "Transactions retrieved", body = ApiResponse<Vec<settlement_tx::Model>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn restaurant_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SettlementQuery>,
) -> ApiResult<Vec<settlement_tx::Model>> {
    let restaurant_id = scope_restaurant(&user, &query)?;
    let rows = state.services.settlement.history(restaurant_id).await?;
    Ok(Json(ApiResponse::success(rows)))
}
