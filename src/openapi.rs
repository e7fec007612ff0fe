//! OpenAPI document for the v1 API, served at `/api-docs/openapi.json`.

use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SkyBite API",
        version = "0.3.0",
        description = r#"
Order fulfillment backend for the SkyBite drone food delivery platform.

Customers place orders against restaurant menus, pay through VNPay, MoMo,
PayPal or DronePay, and follow the drone flight until handoff. Restaurants
drive the fulfillment pipeline; payment providers confirm asynchronously
through signed return URLs and server-to-server notifications.

## Authentication

Authenticated endpoints take a JWT in the Authorization header:

```
Authorization: Bearer <token>
```

Guest checkout is supported: order creation and payment confirmation accept
anonymous callers, correlated by the payment session id.

## Responses

Every JSON endpoint wraps its payload in the standard envelope:

```json
{
  "success": true,
  "data": { },
  "message": null,
  "meta": { "request_id": "...", "timestamp": "..." }
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order lifecycle and tracking"),
        (name = "Payments", description = "Provider checkout and callbacks"),
        (name = "Notifications", description = "Per-recipient notification feed"),
        (name = "Settlement", description = "Restaurant payout ledger"),
        (name = "Realtime", description = "Server-sent event subscriptions")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::track_order,
        crate::handlers::orders::confirm_payment,

        // Payments
        crate::handlers::payments::create_vnpay_payment,
        crate::handlers::payments::vnpay_return,
        crate::handlers::payments::create_momo_payment,
        crate::handlers::payments::momo_return,
        crate::handlers::payments::momo_ipn,
        crate::handlers::payments::paypal_create_order,
        crate::handlers::payments::paypal_capture_order,
        crate::handlers::payments::paypal_webhook,

        // Notifications
        crate::handlers::notifications::list_notifications,
        crate::handlers::notifications::mark_notification_read,
        crate::handlers::notifications::mark_all_read,

        // Settlement
        crate::handlers::settlement::restaurant_balance,
        crate::handlers::settlement::restaurant_transactions,

        // Realtime
        crate::handlers::realtime::subscribe_events,
    ),
    components(
        schemas(
            // Envelope
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,
            crate::errors::ErrorResponse,

            // Order types
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemResponse,
            crate::handlers::orders::CreateOrderResponse,
            crate::handlers::orders::CancelOrderRequest,
            crate::handlers::orders::ConfirmPaymentRequest,
            crate::handlers::orders::TrackOrderResponse,
            crate::handlers::orders::TrackOrderSummary,
            crate::handlers::orders::TrackDetails,
            crate::handlers::orders::TrackLocation,
            crate::handlers::orders::DroneSummary,
            crate::entities::drone::DroneStatus,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::CreateOrderItemRequest,
            crate::services::orders::UpdateStatusRequest,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order::Timeline,
            crate::entities::order::TimelineEntry,
            crate::services::tracking::DeliveryPhase,

            // Payment types
            crate::handlers::payments::CreatePaymentRequest,
            crate::handlers::payments::PaymentUrlResponse,
            crate::handlers::payments::CaptureOrderRequest,
            crate::services::payments::CheckoutSession,
            crate::services::payments::momo::MomoIpn,

            // Notification types
            crate::entities::notification::Model,
            crate::entities::notification::RecipientRole,
            crate::handlers::notifications::MarkAllReadResponse,

            // Settlement types
            crate::handlers::settlement::BalanceResponse,
            crate::entities::settlement_tx::Model,
            crate::entities::settlement_tx::TransactionKind,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_core_paths() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/payments/momo/ipn"));
        assert!(json.contains("/api/v1/orders/{id}/track"));
        assert!(json.contains("Bearer"));
    }
}
