pub mod delivery;
pub mod drone;
pub mod notification;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod settlement_tx;
