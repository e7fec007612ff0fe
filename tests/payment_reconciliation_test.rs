mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use skybite_api::entities::order::{OrderStatus, PaymentStatus};
use uuid::Uuid;

#[tokio::test]
async fn vnpay_return_marks_order_paid_but_not_confirmed() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "vnpay").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    let query = common::vnpay_return_query(&app.config, &order, session_id, "115000", "00");
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay/return?{query}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["payment_status"], json!("paid"));
    // Payment success never auto-confirms; the restaurant does that
    assert_eq!(body["data"]["status"], json!("pending"));

    let row = app.order_row(id).await;
    assert_eq!(row.payment_status, PaymentStatus::Paid);
    assert_eq!(row.status, OrderStatus::Pending);
    assert_eq!(row.transaction_id.as_deref(), Some("14425919"));
    assert!(row.paid_at.is_some());
}

#[tokio::test]
async fn duplicate_vnpay_callbacks_record_one_ledger_row() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "vnpay").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    let query = common::vnpay_return_query(&app.config, &order, session_id, "115000", "00");
    for _ in 0..3 {
        let (status, _) = app
            .request(
                Method::GET,
                &format!("/api/v1/payments/vnpay/return?{query}"),
                None,
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(app.payment_rows(id).await.len(), 1);
}

#[tokio::test]
async fn vnpay_callback_with_tampered_signature_is_rejected() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "vnpay").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    // Raise the amount after signing
    let query = common::vnpay_return_query(&app.config, &order, session_id, "115000", "00")
        .replace("vnp_Amount=11500000", "vnp_Amount=99900000");
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay/return?{query}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.order_row(id).await.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn session_grafted_onto_another_order_is_rejected() {
    let app = TestApp::new().await;
    let victim = app.create_order(None, "vnpay").await;
    let attacker = app.create_order(None, "vnpay").await;

    let victim_id: Uuid = victim["id"].as_str().unwrap().parse().unwrap();
    let session_id = victim["checkout"]["session_id"].as_str().unwrap();

    // Validly signed params whose session resolves the victim's order while
    // vnp_TxnRef names the attacker's order
    let mixed = common::vnpay_mixed_query(&app.config, &attacker, &victim, session_id, "115000");
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay/return?{mixed}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        app.order_row(victim_id).await.payment_status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn declined_vnpay_payment_marks_order_failed() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "vnpay").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    // Response code 24: customer cancelled at the gateway
    let query = common::vnpay_return_query(&app.config, &order, session_id, "115000", "24");
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay/return?{query}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let row = app.order_row(id).await;
    assert_eq!(row.payment_status, PaymentStatus::Failed);
    assert_eq!(row.status, OrderStatus::Pending);
    assert!(app.payment_rows(id).await.is_empty());
}

#[tokio::test]
async fn momo_ipn_always_answers_204_and_ignores_bad_signatures() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "momo").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let order_number = order["order_number"].as_str().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    let forged = common::momo_ipn_body(&app.config, order_number, session_id, 115_000, 0, true);
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/payments/momo/ipn",
            None,
            Some(serde_json::to_value(&forged).unwrap()),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.order_row(id).await.payment_status, PaymentStatus::Pending);

    let genuine = common::momo_ipn_body(&app.config, order_number, session_id, 115_000, 0, false);
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/payments/momo/ipn",
            None,
            Some(serde_json::to_value(&genuine).unwrap()),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.order_row(id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn underpaid_momo_ipn_marks_order_failed() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "momo").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let order_number = order["order_number"].as_str().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    let short = common::momo_ipn_body(&app.config, order_number, session_id, 100_000, 0, false);
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/payments/momo/ipn",
            None,
            Some(serde_json::to_value(&short).unwrap()),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.order_row(id).await.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn dronepay_confirmation_needs_the_session_token() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "dronepay").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders/confirm-payment",
            None,
            Some(json!({ "order_id": id, "session_id": "not-the-token" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders/confirm-payment",
            None,
            Some(json!({ "order_id": id, "session_id": session_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["payment_status"], json!("paid"));

    let row = app.order_row(id).await;
    assert_eq!(row.transaction_id, Some(format!("DP-{}", row.order_number)));
    assert_eq!(app.payment_rows(id).await.len(), 1);
}

#[tokio::test]
async fn dronepay_failure_report_never_marks_the_order_paid() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "dronepay").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders/confirm-payment",
            None,
            Some(json!({ "order_id": id, "session_id": session_id, "status": "failed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["payment_status"], json!("failed"));

    let row = app.order_row(id).await;
    assert_eq!(row.payment_status, PaymentStatus::Failed);
    assert!(row.transaction_id.is_none());
    assert!(app.payment_rows(id).await.is_empty());
}

#[tokio::test]
async fn late_failure_callback_never_claws_back_a_paid_order() {
    let app = TestApp::new().await;
    let order = app.create_order(None, "vnpay").await;
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let session_id = order["checkout"]["session_id"].as_str().unwrap();

    let paid = common::vnpay_return_query(&app.config, &order, session_id, "115000", "00");
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay/return?{paid}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let failed = common::vnpay_return_query(&app.config, &order, session_id, "115000", "24");
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/vnpay/return?{failed}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.order_row(id).await.payment_status, PaymentStatus::Paid);
}
