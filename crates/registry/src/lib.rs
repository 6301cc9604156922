pub mod audit;
pub mod bootstrap;
pub mod bus;
pub mod config;
pub mod datasync;
pub mod messages;
pub mod models;
pub mod pg_repository;
pub mod query;
pub mod redis_bus;
pub mod repository;
pub mod security;
pub mod sqlite_repository;
pub mod static_config;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink};
pub use bootstrap::{
    load_from_system_config, resolve_access_gate, resolve_datasync, resolve_store, BootstrapError,
    BusBundle, RegistryBundle,
};
pub use bus::{BusError, Delivery, EventSource, InMemoryBus, MessagePublisher};
pub use config::{default_template, ConfigError, SystemConfig, SystemConfigLoader};
pub use datasync::{DataSyncClient, DataSyncConfig, DataSyncError, HttpDataSyncClient, RelationOutcome};
pub use messages::{topics, Command, Event, MeteringPointUpdate};
pub use models::{
    Address, DelegateGrant, MeteringPoint, MeteringPointType, MeteringPointView, QueryPage,
    Technology, TechnologyCodes, TechnologyType,
};
pub use pg_repository::PgRecordStore;
pub use query::{
    parse_type_filter, MeteringPointFilters, MeteringPointOrdering, MeteringPointOrderingKey,
    MeteringPointQuery, Order, Pagination, QueryError, DEFAULT_LIMIT, MAX_LIMIT,
};
pub use redis_bus::{RedisAuditSink, RedisBusConfig, RedisEventSource, RedisPublisher};
pub use repository::{InMemoryRecordStore, RecordStore, StoreError, StoreTransaction};
pub use security::{
    extract_bearer_token, now_seconds, AccessError, AccessGate, InternalToken, JwtTokenCodec, TokenCodec,
    READ_SCOPE,
};
pub use sqlite_repository::SqliteRecordStore;
