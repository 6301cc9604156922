use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A delivery the reconciler refused to apply, kept for inspection.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub delivery_id: String,
    pub stage: String,
    pub detail: String,
}

impl AuditEvent {
    pub fn new(delivery_id: impl Into<String>, stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            stage: stage.into(),
            detail: detail.into(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
    fn list(&self) -> Vec<AuditEvent>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }

    fn list(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}
