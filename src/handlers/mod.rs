pub mod notifications;
pub mod orders;
pub mod payments;
pub mod realtime;
pub mod settlement;

use std::sync::Arc;

use crate::services::drones::DroneService;
use crate::services::notifications::NotificationService;
use crate::services::orders::OrderService;
use crate::services::payments::momo::MomoGateway;
use crate::services::payments::paypal::PaypalGateway;
use crate::services::payments::vnpay::VnpayGateway;
use crate::services::reconciliation::ReconciliationService;
use crate::services::settlement::SettlementService;

/// Service container shared through [`crate::AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub notifications: Arc<NotificationService>,
    pub settlement: Arc<SettlementService>,
    pub drones: Arc<DroneService>,
    pub vnpay: Arc<VnpayGateway>,
    pub momo: Arc<MomoGateway>,
    pub paypal: Arc<PaypalGateway>,
}
