mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use skybite_api::entities::order::OrderStatus;
use uuid::Uuid;

#[tokio::test]
async fn guest_order_totals_add_up() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "vnpay").await;

    // 2 x 35,000 + 1 x 30,000 items, 15,000 delivery fee
    assert_eq!(order["subtotal"], json!("100000"));
    assert_eq!(order["delivery_fee"], json!("15000"));
    assert_eq!(order["discount"], json!("0"));
    assert_eq!(order["total"], json!("115000"));

    assert_eq!(order["status"], json!("pending"));
    assert_eq!(order["payment_status"], json!("pending"));
    assert_eq!(order["guest_name"], json!("Linh Tran"));
    assert_eq!(order["items"].as_array().map(Vec::len), Some(2));

    // The checkout session accompanies a fresh order
    assert_eq!(order["checkout"]["provider"], json!("vnpay"));
    assert!(order["checkout"]["session_id"].as_str().is_some());
}

#[tokio::test]
async fn guest_order_without_contact_details_is_rejected() {
    let app = TestApp::new().await;
    let body = json!({
        "restaurant_id": common::RESTAURANT_ID,
        "items": [{ "product_id": common::PRODUCT_BANH_MI, "quantity": 1 }],
        "payment_method": "cod",
        "delivery_address": "45 Nguyen Hue, District 1, Ho Chi Minh City",
    });
    let (status, _) = app
        .request(Method::POST, "/api/v1/orders", None, Some(body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cod_order_walks_the_full_pipeline() {
    let app = TestApp::new().await;
    app.seed_drone().await;

    let customer = Uuid::new_v4();
    let customer_token = app.customer_token(customer);
    let staff_token = app.restaurant_token(common::RESTAURANT_ID);

    let order = app.create_order(Some(&customer_token), "cod").await;
    let id = order["id"].as_str().unwrap().to_string();

    for target in ["confirmed", "preparing", "ready", "delivering", "delivered", "completed"] {
        let (status, body) = app
            .request(
                Method::PUT,
                &format!("/api/v1/orders/{id}/status"),
                Some(&staff_token),
                Some(json!({ "status": target })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "transition to {target}: {body}");
        assert_eq!(body["data"]["status"], json!(target));
    }

    let row = app.order_row(id.parse().unwrap()).await;
    assert!(row.assigned_drone_id.is_some());
    assert!(row.dispatched_at.is_some());
    assert!(row.estimated_delivery_time.is_some());
    assert!(row.actual_delivery_time.is_some());
    // create + six transitions in the audit trail
    assert_eq!(row.timeline.0.len(), 7);
}

#[tokio::test]
async fn completed_order_pays_out_to_the_restaurant() {
    let app = TestApp::new().await;
    app.seed_drone().await;
    let staff_token = app.restaurant_token(common::RESTAURANT_ID);

    let order = app.create_order(None, "cod").await;
    let id = order["id"].as_str().unwrap().to_string();
    for target in ["confirmed", "preparing", "ready", "delivering", "delivered", "completed"] {
        let (status, _) = app
            .request(
                Method::PUT,
                &format!("/api/v1/orders/{id}/status"),
                Some(&staff_token),
                Some(json!({ "status": target })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .request(Method::GET, "/api/v1/restaurant/balance", Some(&staff_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["restaurant_id"], json!(common::RESTAURANT_ID));
    assert_eq!(body["data"]["balance"], json!("115000"));

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/restaurant/transactions",
            Some(&staff_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["kind"], json!("income"));
    assert_eq!(rows[0]["amount"], json!("115000"));
    assert_eq!(rows[0]["balance_before"], json!("0"));
    assert_eq!(rows[0]["balance_after"], json!("115000"));
    assert_eq!(rows[0]["order_id"], json!(id));
}

#[tokio::test]
async fn settlement_ledger_is_staff_only() {
    let app = TestApp::new().await;
    let customer_token = app.customer_token(Uuid::new_v4());

    let (status, _) = app
        .request(Method::GET, "/api/v1/restaurant/balance", Some(&customer_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admins read any ledger but must name the restaurant
    let (status, _) = app
        .request(Method::GET, "/api/v1/restaurant/balance", Some(&app.admin_token()), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/restaurant/balance?restaurant_id={}", common::RESTAURANT_ID),
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["balance"], json!("0"));
}

#[tokio::test]
async fn unpaid_vnpay_order_cannot_be_confirmed() {
    let app = TestApp::new().await;
    let staff_token = app.restaurant_token(common::RESTAURANT_ID);

    let order = app.create_order(None, "vnpay").await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}/status"),
            Some(&staff_token),
            Some(json!({ "status": "confirmed" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn status_cannot_skip_stages() {
    let app = TestApp::new().await;
    let staff_token = app.restaurant_token(common::RESTAURANT_ID);

    let order = app.create_order(None, "cod").await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}/status"),
            Some(&staff_token),
            Some(json!({ "status": "delivering" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn customer_can_cancel_pending_but_not_delivered() {
    let app = TestApp::new().await;
    app.seed_drone().await;
    let customer = Uuid::new_v4();
    let customer_token = app.customer_token(customer);
    let staff_token = app.restaurant_token(common::RESTAURANT_ID);

    let order = app.create_order(Some(&customer_token), "cod").await;
    let id = order["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{id}/cancel"),
            Some(&customer_token),
            Some(json!({ "reason": "changed my mind" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("cancelled"));

    // A second order driven to delivered can no longer be cancelled
    let order = app.create_order(Some(&customer_token), "cod").await;
    let id = order["id"].as_str().unwrap().to_string();
    for target in ["confirmed", "preparing", "ready", "delivering", "delivered"] {
        let (status, _) = app
            .request(
                Method::PUT,
                &format!("/api/v1/orders/{id}/status"),
                Some(&staff_token),
                Some(json!({ "status": target })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{id}/cancel"),
            Some(&customer_token),
            Some(json!({ "reason": "too late" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn restaurant_staff_cannot_cancel_a_customer_order() {
    let app = TestApp::new().await;
    let customer_token = app.customer_token(Uuid::new_v4());
    let staff_token = app.restaurant_token(common::RESTAURANT_ID);

    let order = app.create_order(Some(&customer_token), "cod").await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{id}/cancel"),
            Some(&staff_token),
            Some(json!({ "reason": "kitchen closed" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let row = app.order_row(id.parse().unwrap()).await;
    assert_eq!(row.status, OrderStatus::Pending);
}

#[tokio::test]
async fn customer_cannot_drive_fulfillment_or_read_foreign_orders() {
    let app = TestApp::new().await;
    let owner = app.customer_token(Uuid::new_v4());
    let stranger = app.customer_token(Uuid::new_v4());

    let order = app.create_order(Some(&owner), "cod").await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}/status"),
            Some(&owner),
            Some(json!({ "status": "confirmed" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{id}"),
            Some(&stranger),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(Method::GET, &format!("/api/v1/orders/{id}"), Some(&owner), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn order_list_is_scoped_to_the_caller() {
    let app = TestApp::new().await;
    let alice = app.customer_token(Uuid::new_v4());
    let bob = app.customer_token(Uuid::new_v4());

    app.create_order(Some(&alice), "cod").await;
    app.create_order(Some(&alice), "cod").await;
    app.create_order(Some(&bob), "cod").await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/orders", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], json!(2));

    let (status, body) = app
        .request(Method::GET, "/api/v1/orders", Some(&app.admin_token()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], json!(3));

    let (status, _) = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
