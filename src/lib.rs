pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use sea_orm::ConnectionTrait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::JwtKeys;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;

pub const APP_NAME: &str = "skybite-api";

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: handlers::AppServices,
    pub realtime: Arc<dyn events::realtime::RealtimePublisher>,
    pub jwt: Arc<JwtKeys>,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/orders/{id}", get(handlers::orders::get_order))
        .route(
            "/orders/{id}/status",
            put(handlers::orders::update_order_status),
        )
        .route("/orders/{id}/cancel", post(handlers::orders::cancel_order))
        .route("/orders/{id}/track", get(handlers::orders::track_order))
        .route(
            "/orders/confirm-payment",
            post(handlers::orders::confirm_payment),
        );

    let payments = Router::new()
        .route(
            "/payments/vnpay/create",
            post(handlers::payments::create_vnpay_payment),
        )
        .route(
            "/payments/vnpay/return",
            get(handlers::payments::vnpay_return),
        )
        .route(
            "/payments/momo/create",
            post(handlers::payments::create_momo_payment),
        )
        .route("/payments/momo/return", get(handlers::payments::momo_return))
        .route("/payments/momo/ipn", post(handlers::payments::momo_ipn))
        .route(
            "/paypal/create-order",
            post(handlers::payments::paypal_create_order),
        )
        .route(
            "/paypal/capture-order",
            post(handlers::payments::paypal_capture_order),
        )
        .route("/paypal/webhook", post(handlers::payments::paypal_webhook));

    let notifications = Router::new()
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/notifications/{id}/read",
            post(handlers::notifications::mark_notification_read),
        )
        .route(
            "/notifications/read-all",
            post(handlers::notifications::mark_all_read),
        );

    let realtime = Router::new().route(
        "/realtime/subscribe",
        get(handlers::realtime::subscribe_events),
    );

    let settlement = Router::new()
        .route(
            "/restaurant/balance",
            get(handlers::settlement::restaurant_balance),
        )
        .route(
            "/restaurant/transactions",
            get(handlers::settlement::restaurant_transactions),
        );

    orders
        .merge(payments)
        .merge(notifications)
        .merge(settlement)
        .merge(realtime)
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state
        .db
        .execute_unprepared("SELECT 1")
        .await
    {
        Ok(_) => "up",
        Err(_) => "down",
    };
    Json(HealthResponse {
        status: if database == "up" { "ok" } else { "degraded" },
        database,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub timestamp: String,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        name: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Assemble the full application router with its middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .layer(Extension(state.jwt.clone()))
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .layer(crate::tracing::configure_http_tracing())
        .with_state(state)
}
