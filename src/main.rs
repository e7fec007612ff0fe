use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use rust_decimal_macros::dec;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use skybite_api as api;

use api::services::catalog::{InMemoryCatalog, ProductInfo, RestaurantInfo};
use api::services::drones::DroneService;
use api::services::geocoding;
use api::services::notifications::NotificationService;
use api::services::orders::OrderService;
use api::services::payments::momo::MomoGateway;
use api::services::payments::paypal::PaypalGateway;
use api::services::payments::vnpay::VnpayGateway;
use api::services::reconciliation::ReconciliationService;
use api::services::settlement::SettlementService;
use api::services::sweeper::{SweeperService, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::tracing::init_tracing(cfg.log_level(), cfg.log_json);

    let db = api::db::establish_connection(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await?;
        info!("database migrations applied");
    }
    let db = Arc::new(db);

    let (event_sender, event_rx) = api::events::event_channel(1024);
    tokio::spawn(api::events::process_events(event_rx));

    let realtime: Arc<dyn api::events::realtime::RealtimePublisher> =
        Arc::new(api::events::realtime::BroadcastPublisher::new(256));

    let catalog = Arc::new(InMemoryCatalog::new());
    if cfg.is_development() {
        seed_demo_catalog(&catalog);
    }

    let http = reqwest::Client::new();
    let vnpay = Arc::new(VnpayGateway::new(cfg.vnpay.clone()));
    let momo = Arc::new(MomoGateway::new(cfg.momo.clone(), http.clone()));
    let paypal = Arc::new(PaypalGateway::new(cfg.paypal.clone(), http));

    let notifications = Arc::new(NotificationService::new(db.clone(), realtime.clone()));
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

    let sweeper = Arc::new(SweeperService::new(
        db.clone(),
        event_sender.clone(),
        Arc::new(SystemClock),
        cfg.unpaid_retention_hours,
    ));
    sweeper.start(cfg.sweep_interval_secs, cfg.retention_sweep_interval_secs);

    let services = api::handlers::AppServices {
        orders,
        reconciliation,
        notifications,
        settlement,
        drones,
        vnpay,
        momo,
        paypal,
    };

    let jwt = Arc::new(api::auth::JwtKeys::from_secret(&cfg.jwt_secret));
    let cors = cors_layer(&cfg);
    let addr = SocketAddr::new(cfg.host.parse()?, cfg.port);

    let state = api::AppState {
        db,
        config: Arc::new(cfg),
        event_sender,
        services,
        realtime,
        jwt,
    };

    let app = api::build_router(state).layer(cors);

    info!(%addr, "{} listening", api::APP_NAME);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutdown complete");
    Ok(())
}

fn cors_layer(cfg: &api::config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter_map(|origin| {
            let trimmed = origin.trim();
            if trimmed.is_empty() {
                None
            } else {
                HeaderValue::from_str(trimmed).ok()
            }
        })
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.is_development() {
        CorsLayer::permissive()
    } else {
        warn!("APP__CORS_ALLOWED_ORIGINS not set; cross-origin requests will be rejected");
        CorsLayer::new()
    }
}

/// Fixed demo data so a fresh development instance accepts orders without any
/// external catalog service.
fn seed_demo_catalog(catalog: &InMemoryCatalog) {
    let restaurant_id = Uuid::from_u128(0x5eed_0001);
    catalog.insert_restaurant(RestaurantInfo {
        id: restaurant_id,
        name: "Banh Mi Saigon".to_string(),
        location: geocoding::geocode("123 Le Loi, District 1, Ho Chi Minh City"),
        delivery_fee: dec!(15000),
        accepting_orders: true,
    });
    catalog.insert_product(ProductInfo {
        id: Uuid::from_u128(0x5eed_1001),
        restaurant_id,
        name: "Banh mi thit nuong".to_string(),
        price: dec!(35000),
        available: true,
    });
    catalog.insert_product(ProductInfo {
        id: Uuid::from_u128(0x5eed_1002),
        restaurant_id,
        name: "Ca phe sua da".to_string(),
        price: dec!(25000),
        available: true,
    });
    info!(%restaurant_id, "seeded demo catalog");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => warn!("failed to install SIGTERM handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
