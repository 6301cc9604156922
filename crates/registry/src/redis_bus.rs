use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::audit::{AuditEvent, AuditSink};
use crate::bus::{BusError, Delivery, EventSource, MessagePublisher};

#[derive(Clone, Debug)]
pub struct RedisBusConfig {
    pub key_prefix: String,
    pub rejected_ttl_seconds: usize,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            key_prefix: "meteringpoints".to_string(),
            rejected_ttl_seconds: 7 * 24 * 3600,
        }
    }
}

impl RedisBusConfig {
    pub fn topic_key(&self, topic: &str) -> String {
        format!("{}:topic:{}", self.key_prefix, topic)
    }

    /// Deliveries taken off `topic` and not yet acked.
    pub fn processing_key(&self, topic: &str) -> String {
        format!("{}:processing:{}", self.key_prefix, topic)
    }

    pub fn rejected_key(&self) -> String {
        format!("{}:rejected", self.key_prefix)
    }

}

fn transport(err: redis::RedisError) -> BusError {
    BusError::Transport(err.to_string())
}

/// Topic lists drained with LMOVE into a per-topic processing list.
/// A delivery leaves the processing list on ack or requeue, so a consumer
/// that dies mid-delivery leaves it there for `recover`.
#[derive(Clone)]
pub struct RedisEventSource {
    client: redis::Client,
    config: RedisBusConfig,
    topics: Vec<String>,
    /// Topic the next blocking wait parks on.
    next: Arc<AtomicUsize>,
}

impl RedisEventSource {
    pub fn new(client: redis::Client, config: RedisBusConfig, topics: &[&str]) -> Self {
        Self {
            client,
            config,
            topics: topics.iter().map(|topic| topic.to_string()).collect(),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn claim(
        &self,
        conn: &mut redis::Connection,
        topic: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Delivery>, BusError> {
        let mut cmd = redis::cmd(if timeout.is_some() { "BLMOVE" } else { "LMOVE" });
        cmd.arg(self.config.topic_key(topic))
            .arg(self.config.processing_key(topic))
            .arg("LEFT")
            .arg("RIGHT");
        if let Some(timeout) = timeout {
            cmd.arg(timeout.as_secs_f64().max(0.1));
        }
        let moved: Option<Vec<u8>> = cmd.query(conn).map_err(transport)?;
        Ok(moved.map(|payload| Delivery::new(topic, payload)))
    }
}

impl EventSource for RedisEventSource {
    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, BusError> {
        if self.topics.is_empty() {
            return Ok(None);
        }
        let mut conn = self.client.get_connection().map_err(transport)?;
        for topic in &self.topics {
            if let Some(delivery) = self.claim(&mut conn, topic, None)? {
                return Ok(Some(delivery));
            }
        }
        // BLMOVE watches a single list, so idle waits rotate across topics.
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.topics.len();
        self.claim(&mut conn, &self.topics[index], Some(timeout))
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        let mut conn = self.client.get_connection().map_err(transport)?;
        let _: i64 = redis::cmd("LREM")
            .arg(self.config.processing_key(&delivery.topic))
            .arg(1)
            .arg(delivery.payload.as_slice())
            .query(&mut conn)
            .map_err(transport)?;
        Ok(())
    }

    fn requeue(&self, delivery: Delivery) -> Result<(), BusError> {
        let mut conn = self.client.get_connection().map_err(transport)?;
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.config.processing_key(&delivery.topic))
            .arg(1)
            .arg(delivery.payload.as_slice())
            .ignore()
            .cmd("LPUSH")
            .arg(self.config.topic_key(&delivery.topic))
            .arg(delivery.payload.as_slice())
            .ignore()
            .query::<()>(&mut conn)
            .map_err(transport)?;
        Ok(())
    }

    fn recover(&self) -> Result<usize, BusError> {
        let mut conn = self.client.get_connection().map_err(transport)?;
        let mut recovered = 0;
        for topic in &self.topics {
            // Tail first so the oldest stranded delivery ends up at the head.
            loop {
                let moved: Option<Vec<u8>> = redis::cmd("LMOVE")
                    .arg(self.config.processing_key(topic))
                    .arg(self.config.topic_key(topic))
                    .arg("RIGHT")
                    .arg("LEFT")
                    .query(&mut conn)
                    .map_err(transport)?;
                if moved.is_none() {
                    break;
                }
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

#[derive(Clone)]
pub struct RedisPublisher {
    client: redis::Client,
    config: RedisBusConfig,
}

impl RedisPublisher {
    pub fn new(client: redis::Client, config: RedisBusConfig) -> Self {
        Self { client, config }
    }
}

impl MessagePublisher for RedisPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut conn = self.client.get_connection().map_err(transport)?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(self.config.topic_key(topic))
            .arg(payload)
            .query(&mut conn)
            .map_err(transport)?;
        Ok(())
    }
}

/// Dead-letter list for rejected deliveries.
#[derive(Clone)]
pub struct RedisAuditSink {
    client: redis::Client,
    config: RedisBusConfig,
}

impl RedisAuditSink {
    pub fn new(client: redis::Client, config: RedisBusConfig) -> Self {
        Self { client, config }
    }
}

impl AuditSink for RedisAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut conn = match self.client.get_connection() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, delivery_id = %event.delivery_id, "audit sink unavailable");
                return;
            }
        };
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, delivery_id = %event.delivery_id, "audit event not serializable");
                return;
            }
        };
        let key = self.config.rejected_key();
        let pushed: Result<i64, _> = redis::cmd("RPUSH").arg(&key).arg(payload).query(&mut conn);
        if let Err(err) = pushed {
            warn!(error = %err, delivery_id = %event.delivery_id, "audit event not recorded");
            return;
        }
        if self.config.rejected_ttl_seconds > 0 {
            let _: Result<i32, _> = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.config.rejected_ttl_seconds)
                .query(&mut conn);
        }
    }

    fn list(&self) -> Vec<AuditEvent> {
        let mut conn = match self.client.get_connection() {
            Ok(conn) => conn,
            Err(_) => return Vec::new(),
        };
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(self.config.rejected_key())
            .arg(0)
            .arg(-1)
            .query(&mut conn)
            .unwrap_or_default();
        values
            .into_iter()
            .filter_map(|value| serde_json::from_str(&value).ok())
            .collect()
    }
}
