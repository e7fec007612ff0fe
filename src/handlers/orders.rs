use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{authorize, Action, AuthUser, Role};
use crate::entities::order::{
    self, OrderStatus, PaymentMethod, PaymentStatus, Timeline,
};
use crate::entities::drone::{self, DroneStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::services::orders::{CreateOrderRequest, OrderListFilter, UpdateStatusRequest};
use crate::services::payments::CheckoutSession;
use crate::services::tracking;
use crate::{ApiResponse, ApiResult, AppState, PaginatedResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub restaurant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub guest_name: Option<String>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub delivery_address: String,
    pub timeline: Timeline,
    pub items: Vec<OrderItemResponse>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OrderResponse {
    fn from_model(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            restaurant_id: order.restaurant_id,
            customer_id: order.customer_id,
            guest_name: order.guest_name,
            status: order.status,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            subtotal: order.subtotal,
            delivery_fee: order.delivery_fee,
            discount: order.discount,
            total: order.total,
            delivery_address: order.delivery_address,
            timeline: order.timeline,
            items: items
                .into_iter()
                .map(|i| OrderItemResponse {
                    product_id: i.product_id,
                    name: i.name,
                    unit_price: i.unit_price,
                    quantity: i.quantity,
                    total_price: i.total_price,
                })
                .collect(),
            estimated_delivery_time: order.estimated_delivery_time,
            created_at: order.created_at,
        }
    }
}

impl From<order::Model> for OrderResponse {
    fn from(order: order::Model) -> Self {
        Self::from_model(order, Vec::new())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub checkout: CheckoutSession,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Create an order with server-side pricing and a fresh payment session. \
                   Guests supply contact details; authenticated customers are identified by their token.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CreateOrderResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Restaurant or product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Restaurant not accepting orders", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let customer_id = user
        .as_ref()
        .filter(|u| u.role == Role::Customer)
        .map(|u| u.id);
    let (order, items) = state.services.orders.create_order(req, customer_id).await?;

    let checkout = CheckoutSession {
        provider: order.payment_provider.clone(),
        session_id: order.payment_session_id.clone(),
        expires_at: order.payment_session_expires_at,
        pay_url: None,
    };
    let body = CreateOrderResponse {
        order: OrderResponse::from_model(order, items),
        checkout,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(body))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Paginated order list, scoped to the caller's role",
    params(
        ("status" = Option<String>, Query, description = "Filter by fulfillment status"),
        ("restaurant_id" = Option<Uuid>, Query, description = "Filter by restaurant (admin only)"),
        ("page" = Option<u64>, Query, description = "Page number (default 1)"),
        ("per_page" = Option<u64>, Query, description = "Items per page (default 20, max 100)"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(mut filter): Query<OrderListFilter>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    // Scope the filter to what the caller may see
    match user.role {
        Role::Customer => {
            filter.customer_id = Some(user.id);
            filter.restaurant_id = None;
        }
        Role::Restaurant => {
            let restaurant_id = user.restaurant_id.ok_or_else(|| {
                ServiceError::Forbidden("restaurant token lacks a restaurant claim".to_string())
            })?;
            filter.restaurant_id = Some(restaurant_id);
            filter.customer_id = None;
        }
        Role::Admin => {}
    }

    let page = filter.page.unwrap_or(1).max(1);
    let per_page = filter.per_page.unwrap_or(20).clamp(1, 100);
    let (orders, total) = state.services.orders.list_orders(filter).await?;
    let items = orders
        .into_iter()
        .map(|o| OrderResponse::from_model(o, Vec::new()))
        .collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit: per_page,
        total_pages: total.div_ceil(per_page),
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let (order, items) = state.services.orders.get_order_with_items(id).await?;
    authorize(&user, Action::View, &order)?;
    Ok(Json(ApiResponse::success(OrderResponse::from_model(
        order, items,
    ))))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    description = "Apply a fulfillment transition. Restaurants drive their own orders forward; \
                   admins may apply any legal transition.",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order not paid yet", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_order(id).await?;
    authorize(&user, Action::Transition(req.status), &order)?;

    let updated = state
        .services
        .orders
        .update_status(id, req.status, req.note)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_model(
        updated,
        Vec::new(),
    ))))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancel an order that the kitchen has not started preparing",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_order(id).await?;
    authorize(&user, Action::Cancel, &order)?;

    let updated = state.services.orders.cancel_order(id, req.reason).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_model(
        updated,
        Vec::new(),
    ))))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackOrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub timeline: Timeline,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackLocation {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DroneSummary {
    pub id: Uuid,
    pub name: String,
    pub status: DroneStatus,
    pub battery_level: i32,
}

impl From<drone::Model> for DroneSummary {
    fn from(model: drone::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            status: model.status,
            battery_level: model.battery_level,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackDetails {
    pub pickup_location: TrackLocation,
    pub delivery_location: TrackLocation,
    pub drone_location: TrackLocation,
    /// 0..=100
    pub progress: u8,
    pub phase: tracking::DeliveryPhase,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub drone: Option<DroneSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackOrderResponse {
    pub order: TrackOrderSummary,
    pub tracking: TrackDetails,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/track",
    summary = "Track order",
    description = "Delivery progress snapshot, derived from elapsed flight time. \
                   No authentication: possession of the order id is the credential, \
                   and the snapshot carries no contact details.",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Tracking snapshot", body = ApiResponse<TrackOrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn track_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TrackOrderResponse> {
    let order = state.services.orders.get_order(id).await?;
    let snapshot = tracking::snapshot(&order, Utc::now(), state.config.flight_duration());

    // Mid-flight polls double as the position feed for the dashboards
    if order.status == OrderStatus::Delivering {
        state.services.notifications.drone_location(
            &order,
            serde_json::json!({
                "lat": snapshot.drone_lat,
                "lng": snapshot.drone_lng,
                "progress": snapshot.progress,
            }),
        );
    }

    // A released or retired drone should not break tracking history.
    let drone = match snapshot.drone_id {
        Some(drone_id) => match state.services.drones.get(drone_id).await {
            Ok(model) => Some(DroneSummary::from(model)),
            Err(ServiceError::NotFound(_)) => None,
            Err(err) => return Err(err),
        },
        None => None,
    };

    let body = TrackOrderResponse {
        order: TrackOrderSummary {
            id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            timeline: order.timeline.clone(),
        },
        tracking: TrackDetails {
            pickup_location: TrackLocation {
                lat: order.pickup_lat,
                lng: order.pickup_lng,
            },
            delivery_location: TrackLocation {
                lat: order.dropoff_lat,
                lng: order.dropoff_lng,
            },
            drone_location: TrackLocation {
                lat: snapshot.drone_lat,
                lng: snapshot.drone_lng,
            },
            progress: snapshot.progress,
            phase: snapshot.phase,
            estimated_arrival: snapshot.estimated_delivery_time,
            drone,
        },
    };
    Ok(Json(ApiResponse::success(body)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub order_id: Uuid,
    pub session_id: String,
    /// Client-reported outcome. Anything other than `success` (or omission)
    /// records a failed payment; the session token still authenticates the
    /// report either way.
    pub status: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/confirm-payment",
    summary = "Confirm DronePay payment",
    description = "In-app payment confirmation. The payment session token issued at order \
                   creation is the credential; there is no provider round-trip.",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Session mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session expired", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> ApiResult<OrderResponse> {
    if let Some(user) = &user {
        let order = state.services.orders.get_order(req.order_id).await?;
        authorize(user, Action::ConfirmPayment, &order)?;
    }

    let success = req
        .status
        .as_deref()
        .map(|s| s.eq_ignore_ascii_case("success"))
        .unwrap_or(true);
    let updated = state
        .services
        .reconciliation
        .confirm_dronepay(req.order_id, &req.session_id, success)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_model(
        updated,
        Vec::new(),
    ))))
}
