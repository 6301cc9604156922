use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::audit::{AuditSink, InMemoryAuditSink};
use crate::bus::{EventSource, InMemoryBus, MessagePublisher};
use crate::config::SystemConfig;
use crate::datasync::{DataSyncClient, DataSyncConfig, DataSyncError, HttpDataSyncClient};
use crate::messages::topics;
use crate::pg_repository::PgRecordStore;
use crate::query::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::redis_bus::{RedisAuditSink, RedisBusConfig, RedisEventSource, RedisPublisher};
use crate::repository::{InMemoryRecordStore, RecordStore, StoreError};
use crate::security::{AccessGate, JwtTokenCodec};
use crate::sqlite_repository::SqliteRecordStore;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("bus setup failed: {0}")]
    Bus(String),
    #[error(transparent)]
    DataSync(#[from] DataSyncError),
    #[error("missing required config: {0}")]
    Missing(&'static str),
}

pub struct BusBundle {
    pub source: Arc<dyn EventSource>,
    pub publisher: Arc<dyn MessagePublisher>,
    pub audit: Arc<dyn AuditSink>,
    /// False for the process-local bus, whose messages never leave this process.
    pub shared: bool,
}

impl BusBundle {
    pub fn in_memory() -> Self {
        let bus = InMemoryBus::shared(&topics::CONSUMED);
        Self {
            source: bus.clone(),
            publisher: bus,
            audit: InMemoryAuditSink::shared(),
            shared: false,
        }
    }
}

pub struct RegistryBundle {
    pub store: Arc<dyn RecordStore>,
    pub bus: BusBundle,
    pub poll_timeout: Duration,
    pub workers: usize,
    pub default_limit: i64,
}

pub fn load_from_system_config(config: &SystemConfig) -> Result<RegistryBundle, BootstrapError> {
    let store = resolve_store(config)?;
    let bus = resolve_bus(config)?;
    let default_limit = config.get_number("query.default_limit");
    let default_limit = if (1..=MAX_LIMIT).contains(&default_limit) {
        default_limit
    } else {
        DEFAULT_LIMIT
    };
    Ok(RegistryBundle {
        store,
        bus,
        poll_timeout: Duration::from_secs(config.get_positive("bus.poll_timeout_seconds")),
        workers: config.get_positive("consumer.workers") as usize,
        default_limit,
    })
}

/// Builds the token gate from `security.token_secret`, which must be set.
pub fn resolve_access_gate(config: &SystemConfig) -> Result<AccessGate, BootstrapError> {
    let secret = config.get_string("security.token_secret");
    if secret.trim().is_empty() {
        return Err(BootstrapError::Missing("security.token_secret"));
    }
    Ok(AccessGate::new(JwtTokenCodec::shared(secret.as_bytes())))
}

pub fn resolve_datasync(config: &SystemConfig) -> Result<Arc<dyn DataSyncClient>, BootstrapError> {
    let client = HttpDataSyncClient::new(DataSyncConfig {
        base_url: config.get_string("datasync.base_url"),
        timeout_ms: config.get_positive("datasync.timeout_ms"),
        ..DataSyncConfig::default()
    })?;
    Ok(Arc::new(client))
}

pub fn resolve_store(config: &SystemConfig) -> Result<Arc<dyn RecordStore>, BootstrapError> {
    let dsn = config.get_string("storage.dsn");
    let dsn = dsn.trim();
    if dsn.is_empty() {
        let path = config.get_string("storage.sqlite_path");
        return open_sqlite(&path);
    }
    if is_memory_dsn(dsn) {
        info!("using in-memory record store");
        return Ok(InMemoryRecordStore::shared());
    }
    if is_sqlite_dsn(dsn) {
        return open_sqlite(sqlite_path_from_dsn(dsn));
    }
    let pool_size = config.get_positive("storage.pool_size") as usize;
    let store = PgRecordStore::connect(dsn, pool_size)?;
    store.ensure_schema()?;
    info!(pool_size, "using postgres record store");
    Ok(Arc::new(store))
}

fn open_sqlite(path: &str) -> Result<Arc<dyn RecordStore>, BootstrapError> {
    let store = SqliteRecordStore::open(path)?;
    store.ensure_schema()?;
    info!(path, "using sqlite record store");
    Ok(Arc::new(store))
}

fn resolve_bus(config: &SystemConfig) -> Result<BusBundle, BootstrapError> {
    let redis_url = config.get_string("bus.redis_url");
    if redis_url.trim().is_empty() {
        return Ok(BusBundle::in_memory());
    }
    let client = redis::Client::open(redis_url).map_err(|err| BootstrapError::Bus(err.to_string()))?;
    let bus_config = RedisBusConfig {
        key_prefix: config.get_string("bus.key_prefix"),
        ..RedisBusConfig::default()
    };
    Ok(BusBundle {
        source: Arc::new(RedisEventSource::new(
            client.clone(),
            bus_config.clone(),
            &topics::CONSUMED,
        )),
        publisher: Arc::new(RedisPublisher::new(client.clone(), bus_config.clone())),
        audit: Arc::new(RedisAuditSink::new(client, bus_config)),
        shared: true,
    })
}

pub fn is_memory_dsn(dsn: &str) -> bool {
    dsn.trim().eq_ignore_ascii_case("memory:")
}

pub fn is_sqlite_dsn(dsn: &str) -> bool {
    let trimmed = dsn.trim().to_lowercase();
    trimmed.starts_with("sqlite://") || trimmed.starts_with("sqlite:")
}

pub fn sqlite_path_from_dsn(dsn: &str) -> &str {
    dsn.trim()
        .strip_prefix("sqlite://")
        .or_else(|| dsn.trim().strip_prefix("sqlite:"))
        .unwrap_or(dsn)
}
