//! Shared integration test harness: full application state over an
//! in-memory SQLite database, plus request and signing helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use sha2::{Sha256, Sha512};
use tower::ServiceExt;
use url::form_urlencoded;
use uuid::Uuid;

use skybite_api as api;

use api::auth::{issue_token, JwtKeys, Role};
use api::config::AppConfig;
use api::entities::{drone, order, payment};
use api::events::realtime::{RealtimePublisher, RecordingPublisher};
use api::handlers::AppServices;
use api::services::catalog::{InMemoryCatalog, ProductInfo, RestaurantInfo};
use api::services::drones::DroneService;
use api::services::geocoding;
use api::services::notifications::NotificationService;
use api::services::orders::OrderService;
use api::services::payments::momo::{MomoGateway, MomoIpn};
use api::services::payments::paypal::PaypalGateway;
use api::services::payments::vnpay::VnpayGateway;
use api::services::reconciliation::ReconciliationService;
use api::services::settlement::SettlementService;

pub const RESTAURANT_ID: Uuid = Uuid::from_u128(0xA11CE);
pub const PRODUCT_BANH_MI: Uuid = Uuid::from_u128(0xF00D_0001);
pub const PRODUCT_COFFEE: Uuid = Uuid::from_u128(0xF00D_0002);

pub struct TestApp {
    pub router: Router,
    pub state: api::AppState,
    pub jwt: Arc<JwtKeys>,
    pub config: AppConfig,
    pub realtime: Arc<RecordingPublisher>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            0,
            "test".to_string(),
        );
        // A single pooled connection keeps the in-memory database alive and
        // shared for the whole test.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let db = api::db::establish_connection(&cfg)
            .await
            .expect("failed to open test database");
        api::db::run_migrations(&db)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(db);

        let (event_sender, event_rx) = api::events::event_channel(64);
        let event_task = tokio::spawn(api::events::process_events(event_rx));

        let realtime = Arc::new(RecordingPublisher::new());
        let catalog = Arc::new(seeded_catalog());

        let http = reqwest::Client::new();
        let vnpay = Arc::new(VnpayGateway::new(cfg.vnpay.clone()));
        let momo = Arc::new(MomoGateway::new(cfg.momo.clone(), http.clone()));
        let paypal = Arc::new(PaypalGateway::new(cfg.paypal.clone(), http));

        let publisher: Arc<dyn RealtimePublisher> = realtime.clone();
        let notifications = Arc::new(NotificationService::new(db.clone(), publisher));
        let drones = Arc::new(DroneService::new(db.clone()));
        let settlement = Arc::new(SettlementService::new(db.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            notifications.clone(),
            drones.clone(),
            settlement.clone(),
            catalog.clone(),
            catalog.clone(),
            cfg.session_ttl(),
            cfg.flight_duration(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            db.clone(),
            event_sender.clone(),
            notifications.clone(),
        ));

        let services = AppServices {
            orders,
            reconciliation,
            notifications,
            settlement,
            drones,
            vnpay,
            momo,
            paypal,
        };

        let jwt = Arc::new(JwtKeys::from_secret(&cfg.jwt_secret));
        let state = api::AppState {
            db,
            config: Arc::new(cfg.clone()),
            event_sender,
            services,
            realtime: realtime.clone(),
            jwt: jwt.clone(),
        };
        let router = api::build_router(state.clone());

        Self {
            router,
            state,
            jwt,
            config: cfg,
            realtime,
            _event_task: event_task,
        }
    }

    pub fn customer_token(&self, customer_id: Uuid) -> String {
        issue_token(
            &self.jwt,
            customer_id,
            Role::Customer,
            None,
            Duration::hours(1),
        )
        .expect("failed to issue customer token")
    }

    pub fn restaurant_token(&self, restaurant_id: Uuid) -> String {
        issue_token(
            &self.jwt,
            Uuid::new_v4(),
            Role::Restaurant,
            Some(restaurant_id),
            Duration::hours(1),
        )
        .expect("failed to issue restaurant token")
    }

    pub fn admin_token(&self) -> String {
        issue_token(&self.jwt, Uuid::new_v4(), Role::Admin, None, Duration::hours(1))
            .expect("failed to issue admin token")
    }

    /// Send a request and return (status, parsed JSON body). Bodies that are
    /// not JSON (e.g. 204 responses) come back as `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Create an order through the API and return the `data` payload
    /// (order fields plus the checkout session).
    pub async fn create_order(
        &self,
        token: Option<&str>,
        payment_method: &str,
    ) -> Value {
        let body = json!({
            "restaurant_id": RESTAURANT_ID,
            "items": [
                { "product_id": PRODUCT_BANH_MI, "quantity": 2 },
                { "product_id": PRODUCT_COFFEE, "quantity": 1 },
            ],
            "payment_method": payment_method,
            "delivery_address": "45 Nguyen Hue, District 1, Ho Chi Minh City",
            "guest_name": token.is_none().then_some("Linh Tran"),
            "guest_phone": token.is_none().then_some("0901234567"),
        });
        let (status, body) = self
            .request(Method::POST, "/api/v1/orders", token, Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create order failed: {body}");
        body["data"].clone()
    }

    pub async fn order_row(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(self.state.db.as_ref())
            .await
            .expect("order query failed")
            .expect("order not found")
    }

    pub async fn payment_rows(&self, order_id: Uuid) -> Vec<payment::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .all(self.state.db.as_ref())
            .await
            .expect("payment query failed")
    }

    pub async fn seed_drone(&self) -> drone::Model {
        drone::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("SB-DRONE-01".to_string()),
            status: Set(drone::DroneStatus::Available),
            battery_level: Set(95),
            current_lat: Set(10.7769),
            current_lng: Set(106.7009),
            updated_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed drone")
    }
}

fn seeded_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.insert_restaurant(RestaurantInfo {
        id: RESTAURANT_ID,
        name: "Banh Mi Saigon".to_string(),
        location: geocoding::geocode("123 Le Loi, District 1, Ho Chi Minh City"),
        delivery_fee: dec!(15000),
        accepting_orders: true,
    });
    catalog.insert_product(ProductInfo {
        id: PRODUCT_BANH_MI,
        restaurant_id: RESTAURANT_ID,
        name: "Banh mi thit nuong".to_string(),
        price: dec!(35000),
        available: true,
    });
    catalog.insert_product(ProductInfo {
        id: PRODUCT_COFFEE,
        restaurant_id: RESTAURANT_ID,
        name: "Ca phe sua da".to_string(),
        price: dec!(30000),
        available: true,
    });
    catalog
}

/// `vnp_TxnRef` as the gateway echoes it back: `{order_id}_{timestamp}`.
pub fn vnpay_txn_ref(order: &Value) -> String {
    format!("{}_20240101120000", order["id"].as_str().unwrap())
}

/// Build the query VNPay would send to the return URL, signed with the
/// configured hash secret. `amount_vnd` is the whole-VND amount.
pub fn vnpay_return_query(
    cfg: &AppConfig,
    order: &Value,
    session_id: &str,
    amount_vnd: &str,
    response_code: &str,
) -> String {
    vnpay_signed_query(
        cfg,
        &vnpay_txn_ref(order),
        order["order_number"].as_str().unwrap(),
        session_id,
        amount_vnd,
        response_code,
    )
}

/// Like [`vnpay_return_query`] but with `vnp_TxnRef` naming a different order
/// than the one carried in `vnp_OrderInfo`.
pub fn vnpay_mixed_query(
    cfg: &AppConfig,
    txn_ref_order: &Value,
    info_order: &Value,
    session_id: &str,
    amount_vnd: &str,
) -> String {
    vnpay_signed_query(
        cfg,
        &vnpay_txn_ref(txn_ref_order),
        info_order["order_number"].as_str().unwrap(),
        session_id,
        amount_vnd,
        "00",
    )
}

fn vnpay_signed_query(
    cfg: &AppConfig,
    txn_ref: &str,
    info_order: &str,
    session_id: &str,
    amount_vnd: &str,
    response_code: &str,
) -> String {
    let mut params: Vec<(String, String)> = vec![
        ("vnp_Amount".into(), format!("{amount_vnd}00")),
        ("vnp_ResponseCode".into(), response_code.into()),
        ("vnp_TransactionNo".into(), "14425919".into()),
        ("vnp_TxnRef".into(), txn_ref.into()),
        (
            "vnp_OrderInfo".into(),
            format!("Thanh toan don hang {info_order}:{session_id}"),
        ),
    ];
    params.sort();

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &params {
        serializer.append_pair(k, v);
    }
    let query = serializer.finish();

    let mut mac = Hmac::<Sha512>::new_from_slice(cfg.vnpay.hash_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(query.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let mut full: HashMap<String, String> = params.into_iter().collect();
    full.insert("vnp_SecureHash".into(), signature);

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &full {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

/// Build an IPN body as MoMo would sign it. Pass `tamper_signature` to get a
/// structurally valid body with a wrong signature.
pub fn momo_ipn_body(
    cfg: &AppConfig,
    order_number: &str,
    session_id: &str,
    amount: i64,
    result_code: i64,
    tamper_signature: bool,
) -> MomoIpn {
    let extra_data = BASE64.encode(
        serde_json::to_vec(&json!({ "sessionId": session_id })).expect("extraData encoding"),
    );
    let mut ipn = MomoIpn {
        partner_code: cfg.momo.partner_code.clone(),
        order_id: order_number.to_string(),
        request_id: Uuid::new_v4().to_string(),
        amount,
        order_info: format!("SkyBite order {order_number}"),
        order_type: "momo_wallet".to_string(),
        trans_id: 4_088_878_653,
        result_code,
        message: if result_code == 0 {
            "Successful.".to_string()
        } else {
            "Transaction denied by user.".to_string()
        },
        pay_type: "qr".to_string(),
        response_time: Utc::now().timestamp_millis(),
        extra_data,
        signature: String::new(),
    };

    let raw = format!(
        "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}\
         &orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}\
         &transId={}",
        cfg.momo.access_key,
        ipn.amount,
        ipn.extra_data,
        ipn.message,
        ipn.order_id,
        ipn.order_info,
        ipn.order_type,
        ipn.partner_code,
        ipn.pay_type,
        ipn.request_id,
        ipn.response_time,
        ipn.result_code,
        ipn.trans_id,
    );
    let mut mac = Hmac::<Sha256>::new_from_slice(cfg.momo.secret_key.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(raw.as_bytes());
    ipn.signature = hex::encode(mac.finalize().into_bytes());
    if tamper_signature {
        ipn.signature = format!("00{}", &ipn.signature[2..]);
    }
    ipn
}
