pub mod catalog;
pub mod drones;
pub mod geocoding;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reconciliation;
pub mod settlement;
pub mod sweeper;
pub mod tracking;
