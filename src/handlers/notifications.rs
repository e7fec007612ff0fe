use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, Role};
use crate::entities::notification::{self, RecipientRole};
use crate::{ApiResponse, ApiResult, AppState};

fn recipient_role(role: Role) -> RecipientRole {
    match role {
        Role::Customer => RecipientRole::Customer,
        Role::Restaurant => RecipientRole::Restaurant,
        Role::Admin => RecipientRole::Admin,
    }
}

/// Restaurant staff receive notifications addressed to their restaurant, not
/// to their personal id.
fn recipient_id(user: &AuthUser) -> Uuid {
    match user.role {
        Role::Restaurant => user.restaurant_id.unwrap_or(user.id),
        _ => user.id,
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    summary = "List notifications",
    description = "The caller's notifications, newest first",
    responses(
        (status = 200, description = "Notifications retrieved", body = ApiResponse<Vec<notification::Model>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<notification::Model>> {
    let rows = state
        .services
        .notifications
        .list_for(recipient_id(&user), recipient_role(user.role))
        .await?;
    Ok(Json(ApiResponse::success(rows)))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/read",
    summary = "Mark notification read",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification marked read", body = ApiResponse<notification::Model>),
        (status = 404, description = "Notification not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<notification::Model> {
    let row = state
        .services
        .notifications
        .mark_read(recipient_id(&user), id)
        .await?;
    Ok(Json(ApiResponse::success(row)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/read-all",
    summary = "Mark all notifications read",
    responses(
        (status = 200, description = "Notifications marked read", body = ApiResponse<MarkAllReadResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<MarkAllReadResponse> {
    let updated = state
        .services
        .notifications
        .mark_all_read(recipient_id(&user))
        .await?;
    Ok(Json(ApiResponse::success(MarkAllReadResponse { updated })))
}
