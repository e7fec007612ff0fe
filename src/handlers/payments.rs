use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::handlers::orders::OrderResponse;
use crate::services::payments::momo::MomoIpn;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentUrlResponse {
    pub pay_url: String,
    /// Provider-side order id, where the provider issues one (PayPal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_order_id: Option<String>,
}

/// Resolve the order for a checkout-creation request and check that it can
/// still be paid through `method`.
async fn payable_order(
    state: &AppState,
    req: &CreatePaymentRequest,
    method: PaymentMethod,
) -> Result<crate::entities::order::Model, ServiceError> {
    let order = state.services.orders.get_order(req.order_id).await?;
    if order.payment_session_id != req.session_id {
        return Err(ServiceError::SessionMismatch { order_id: order.id });
    }
    if order.payment_method != method {
        return Err(ServiceError::Validation(format!(
            "order {} is not a {} order",
            order.order_number,
            method.display_name()
        )));
    }
    if order.payment_status == PaymentStatus::Paid {
        return Err(ServiceError::Conflict(format!(
            "order {} is already paid",
            order.order_number
        )));
    }
    if order.payment_session_expires_at < Utc::now() {
        return Err(ServiceError::Conflict(
            "payment session has expired".to_string(),
        ));
    }
    Ok(order)
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/vnpay/create",
    summary = "Create VNPay checkout URL",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Signed redirect URL", body = ApiResponse<PaymentUrlResponse>),
        (status = 400, description = "Session mismatch or wrong method", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already paid or session expired", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_vnpay_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<PaymentUrlResponse> {
    let order = payable_order(&state, &req, PaymentMethod::Vnpay).await?;
    let pay_url = state
        .services
        .vnpay
        .build_payment_url(&order, &client_ip(&headers), Utc::now())?;
    Ok(Json(ApiResponse::success(PaymentUrlResponse {
        pay_url,
        provider_order_id: None,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/vnpay/return",
    summary = "VNPay return callback",
    description = "Shopper-return leg of the VNPay flow. The signed query parameters are \
                   verified and reconciled exactly like an IPN.",
    responses(
        (status = 200, description = "Payment reconciled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Signature or session failure", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown payment session", body = crate::errors::ErrorResponse),
    )
)]
pub async fn vnpay_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<OrderResponse> {
    let verified = state.services.vnpay.verify_callback(&params)?;
    let order = state.services.reconciliation.reconcile(verified).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/momo/create",
    summary = "Create MoMo checkout URL",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "MoMo pay URL", body = ApiResponse<PaymentUrlResponse>),
        (status = 400, description = "Session mismatch or wrong method", body = crate::errors::ErrorResponse),
        (status = 502, description = "MoMo rejected the request", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_momo_payment(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<PaymentUrlResponse> {
    let order = payable_order(&state, &req, PaymentMethod::Momo).await?;
    let pay_url = state.services.momo.create_payment(&order).await?;
    Ok(Json(ApiResponse::success(PaymentUrlResponse {
        pay_url,
        provider_order_id: None,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/momo/return",
    summary = "MoMo return callback",
    description = "Shopper-return leg. MoMo signs the redirect with the same raw-string \
                   scheme as the IPN, so it reconciles through the same path.",
    responses(
        (status = 200, description = "Payment reconciled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Signature or session failure", body = crate::errors::ErrorResponse),
    )
)]
pub async fn momo_return(
    State(state): State<AppState>,
    Query(ipn): Query<MomoIpn>,
) -> ApiResult<OrderResponse> {
    let verified = state.services.momo.verify_ipn(&ipn)?;
    let order = state.services.reconciliation.reconcile(verified).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/momo/ipn",
    summary = "MoMo instant payment notification",
    description = "Always answers 204. MoMo retries on any other status, and a forged IPN \
                   must not learn whether its signature survived verification.",
    request_body = MomoIpn,
    responses((status = 204, description = "Acknowledged"))
)]
pub async fn momo_ipn(
    State(state): State<AppState>,
    Json(ipn): Json<MomoIpn>,
) -> StatusCode {
    match state.services.momo.verify_ipn(&ipn) {
        Ok(verified) => {
            if let Err(e) = state.services.reconciliation.reconcile(verified).await {
                warn!(order_id = %ipn.order_id, "momo ipn reconciliation failed: {}", e);
            }
        }
        Err(e) => {
            warn!(order_id = %ipn.order_id, "momo ipn rejected: {}", e);
        }
    }
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/api/v1/paypal/create-order",
    summary = "Create PayPal order",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Approval URL and PayPal order id", body = ApiResponse<PaymentUrlResponse>),
        (status = 400, description = "Session mismatch or wrong method", body = crate::errors::ErrorResponse),
        (status = 502, description = "PayPal rejected the request", body = crate::errors::ErrorResponse),
    )
)]
pub async fn paypal_create_order(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<PaymentUrlResponse> {
    let order = payable_order(&state, &req, PaymentMethod::Paypal).await?;
    let checkout = state.services.paypal.create_order(&order).await?;
    Ok(Json(ApiResponse::success(PaymentUrlResponse {
        pay_url: checkout.approve_url,
        provider_order_id: Some(checkout.paypal_order_id),
    })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CaptureOrderRequest {
    pub paypal_order_id: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/paypal/capture-order",
    summary = "Capture an approved PayPal order",
    description = "The authenticated capture call is the PayPal trust boundary; its response \
                   is what marks the order paid.",
    request_body = CaptureOrderRequest,
    responses(
        (status = 200, description = "Payment captured and reconciled", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Unknown payment session", body = crate::errors::ErrorResponse),
        (status = 502, description = "Capture failed upstream", body = crate::errors::ErrorResponse),
    )
)]
pub async fn paypal_capture_order(
    State(state): State<AppState>,
    Json(req): Json<CaptureOrderRequest>,
) -> ApiResult<OrderResponse> {
    let verified = state
        .services
        .paypal
        .capture_order(&req.paypal_order_id)
        .await?;
    let order = state.services.reconciliation.reconcile(verified).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

#[utoipa::path(
    post,
    path = "/api/v1/paypal/webhook",
    summary = "PayPal webhook sink",
    description = "Logged and acknowledged. Order state only ever changes through the \
                   authenticated capture call, so webhook bodies are audit data.",
    responses((status = 200, description = "Acknowledged"))
)]
pub async fn paypal_webhook(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    info!(
        event_type = body.get("event_type").and_then(|v| v.as_str()).unwrap_or("unknown"),
        "paypal webhook received"
    );
    StatusCode::OK
}
