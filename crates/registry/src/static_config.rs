#[derive(Clone, Debug)]
pub struct StaticConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub value_type: &'static str,
    pub default_value: &'static str,
}

pub static STATIC_CONFIG_TABLE: &[StaticConfigItem] = &[
    StaticConfigItem {
        key: "storage.dsn",
        description: "Record store connection string (sqlite:<path>, memory:, or a PostgreSQL DSN)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "storage.sqlite_path",
        description: "SQLite database path (used when storage.dsn is empty)",
        value_type: "string",
        default_value: "meteringpoints.sqlite",
    },
    StaticConfigItem {
        key: "storage.pool_size",
        description: "PostgreSQL connections held by the record store",
        value_type: "number",
        default_value: "4",
    },
    StaticConfigItem {
        key: "bus.redis_url",
        description: "Redis connection string for the event bus (empty for in-process)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "bus.key_prefix",
        description: "Prefix for Redis topic and dead-letter keys",
        value_type: "string",
        default_value: "meteringpoints",
    },
    StaticConfigItem {
        key: "bus.poll_timeout_seconds",
        description: "Blocking receive timeout for consumer workers",
        value_type: "number",
        default_value: "1",
    },
    StaticConfigItem {
        key: "consumer.workers",
        description: "Event consumer worker threads",
        value_type: "number",
        default_value: "4",
    },
    StaticConfigItem {
        key: "security.token_secret",
        description: "HMAC secret used to verify bearer tokens",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "datasync.base_url",
        description: "Base URL of the data-sync service",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "datasync.timeout_ms",
        description: "Data-sync request timeout in milliseconds",
        value_type: "number",
        default_value: "10000",
    },
    StaticConfigItem {
        key: "query.default_limit",
        description: "Page size used by /list when the request omits limit",
        value_type: "number",
        default_value: "50",
    },
];
