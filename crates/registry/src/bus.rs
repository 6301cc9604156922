use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus transport error: {0}")]
    Transport(String),
    #[error("bus payload error: {0}")]
    Payload(String),
}

/// One message taken off a topic. Delivery is at-least-once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload,
        }
    }
}

pub trait EventSource: Send + Sync {
    /// Blocks for at most `timeout`; `Ok(None)` when nothing arrived.
    /// A returned delivery stays in flight until it is acked or requeued.
    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, BusError>;
    /// Drops an in-flight delivery once it has been applied or dead-lettered.
    fn ack(&self, delivery: &Delivery) -> Result<(), BusError>;
    /// Puts a delivery back at the head of its topic.
    fn requeue(&self, delivery: Delivery) -> Result<(), BusError>;
    /// Returns deliveries left in flight by a previous consumer to the head of
    /// their topics. Call before any worker starts receiving.
    fn recover(&self) -> Result<usize, BusError>;
}

pub trait MessagePublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

#[derive(Default)]
struct Queues {
    topics: HashMap<String, VecDeque<Delivery>>,
    /// Oldest receive first.
    in_flight: Vec<Delivery>,
}

impl Queues {
    fn push_front(&mut self, delivery: Delivery) {
        self.topics
            .entry(delivery.topic.clone())
            .or_default()
            .push_front(delivery);
    }

    fn settle(&mut self, id: &str) {
        self.in_flight.retain(|delivery| delivery.id != id);
    }
}

/// Process-local bus used when no Redis URL is configured, and in tests.
pub struct InMemoryBus {
    consumed: Vec<String>,
    queues: Mutex<Queues>,
    ready: Condvar,
}

impl InMemoryBus {
    pub fn new(consumed: &[&str]) -> Self {
        Self {
            consumed: consumed.iter().map(|topic| topic.to_string()).collect(),
            queues: Mutex::new(Queues::default()),
            ready: Condvar::new(),
        }
    }

    pub fn shared(consumed: &[&str]) -> Arc<Self> {
        Arc::new(Self::new(consumed))
    }

    /// Payloads still queued on `topic`, oldest first.
    pub fn pending(&self, topic: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .topics
            .get(topic)
            .map(|queue| queue.iter().map(|delivery| delivery.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries received but neither acked nor requeued.
    pub fn in_flight(&self) -> usize {
        self.queues.lock().in_flight.len()
    }

    fn take_consumed(&self, queues: &mut Queues) -> Option<Delivery> {
        let delivery = self
            .consumed
            .iter()
            .find_map(|topic| queues.topics.get_mut(topic).and_then(VecDeque::pop_front))?;
        queues.in_flight.push(delivery.clone());
        Some(delivery)
    }
}

impl EventSource for InMemoryBus {
    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, BusError> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if let Some(delivery) = self.take_consumed(&mut queues) {
                return Ok(Some(delivery));
            }
            if self.ready.wait_until(&mut queues, deadline).timed_out() {
                return Ok(self.take_consumed(&mut queues));
            }
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.queues.lock().settle(&delivery.id);
        Ok(())
    }

    fn requeue(&self, delivery: Delivery) -> Result<(), BusError> {
        let mut queues = self.queues.lock();
        queues.settle(&delivery.id);
        queues.push_front(delivery);
        self.ready.notify_one();
        Ok(())
    }

    fn recover(&self) -> Result<usize, BusError> {
        let mut queues = self.queues.lock();
        let stranded = std::mem::take(&mut queues.in_flight);
        let count = stranded.len();
        // Newest first so the oldest ends up at the head.
        for delivery in stranded.into_iter().rev() {
            queues.push_front(delivery);
        }
        self.ready.notify_all();
        Ok(count)
    }
}

impl MessagePublisher for InMemoryBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.queues
            .lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back(Delivery::new(topic, payload.to_vec()));
        self.ready.notify_one();
        Ok(())
    }
}
