use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use registry::{AuditEvent, Delivery, EventSource};
use tracing::{debug, error, info, warn};

use crate::handlers::{ReconcileError, Reconciler};

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub workers: usize,
    pub poll_timeout: Duration,
    /// Pause after a storage or transport failure before polling again.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeliveryOutcome {
    Applied,
    /// Malformed; recorded on the audit sink and dropped.
    Rejected,
    /// Storage failed; handed back to the source for redelivery.
    Requeued,
}

pub fn process_delivery(
    reconciler: &Reconciler,
    source: &dyn EventSource,
    delivery: Delivery,
) -> DeliveryOutcome {
    match reconciler.handle_delivery(&delivery) {
        Ok(event) => {
            debug!(delivery_id = %delivery.id, event = event.kind(), "delivery applied");
            acknowledge(source, &delivery);
            DeliveryOutcome::Applied
        }
        Err(ReconcileError::Malformed(detail)) => {
            warn!(delivery_id = %delivery.id, topic = %delivery.topic, detail = %detail, "event rejected");
            reconciler
                .audit()
                .record(AuditEvent::new(delivery.id.clone(), "reconcile", detail));
            acknowledge(source, &delivery);
            DeliveryOutcome::Rejected
        }
        Err(ReconcileError::Storage(err)) => {
            error!(delivery_id = %delivery.id, error = %err, "storage failure, requeueing");
            if let Err(err) = source.requeue(delivery) {
                error!(error = %err, "requeue failed");
            }
            DeliveryOutcome::Requeued
        }
    }
}

/// A failed ack leaves the delivery in flight; `recover` redelivers it and
/// the reconciler applies it idempotently.
fn acknowledge(source: &dyn EventSource, delivery: &Delivery) {
    if let Err(err) = source.ack(delivery) {
        error!(delivery_id = %delivery.id, error = %err, "ack failed");
    }
}

/// Fixed set of blocking worker threads draining one event source.
pub struct ConsumerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerPool {
    pub fn start(
        reconciler: Arc<Reconciler>,
        source: Arc<dyn EventSource>,
        config: ConsumerConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = (0..config.workers.max(1))
            .map(|index| {
                let reconciler = reconciler.clone();
                let source = source.clone();
                let shutdown = shutdown.clone();
                let config = config.clone();
                thread::Builder::new()
                    .name(format!("consumer-{index}"))
                    .spawn(move || run_worker(index, &reconciler, source.as_ref(), &shutdown, &config))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    error!(error = %err, "failed to spawn consumer worker");
                    None
                }
            })
            .collect::<Vec<_>>();
        info!(workers = handles.len(), "consumer started");
        Self { shutdown, handles }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Signals every worker and waits for in-flight deliveries to finish.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join();
    }

    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("consumer worker panicked");
            }
        }
    }
}

fn run_worker(
    index: usize,
    reconciler: &Reconciler,
    source: &dyn EventSource,
    shutdown: &AtomicBool,
    config: &ConsumerConfig,
) {
    debug!(worker = index, "consumer worker running");
    while !shutdown.load(Ordering::SeqCst) {
        match source.receive(config.poll_timeout) {
            Ok(Some(delivery)) => {
                if process_delivery(reconciler, source, delivery) == DeliveryOutcome::Requeued {
                    thread::sleep(config.retry_backoff);
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(worker = index, error = %err, "event source unavailable");
                thread::sleep(config.retry_backoff);
            }
        }
    }
    debug!(worker = index, "consumer worker stopped");
}
