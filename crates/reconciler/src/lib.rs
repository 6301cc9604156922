pub mod consumer;
pub mod handlers;

pub use consumer::{process_delivery, ConsumerConfig, ConsumerPool, DeliveryOutcome};
pub use handlers::{ReconcileError, Reconciler};
