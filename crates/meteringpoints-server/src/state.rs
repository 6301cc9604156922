use std::sync::Arc;

use registry::{
    load_from_system_config, resolve_access_gate, resolve_datasync, AccessGate, BootstrapError,
    DataSyncClient, MessagePublisher, RecordStore, RegistryBundle, SystemConfig,
};
use tracing::warn;

pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub gate: AccessGate,
    pub datasync: Arc<dyn DataSyncClient>,
    /// Publisher for import commands; `None` when no shared bus is configured.
    pub commands: Option<Arc<dyn MessagePublisher>>,
    /// Page size used when a list request omits `limit`.
    pub default_limit: i64,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: AccessGate,
        datasync: Arc<dyn DataSyncClient>,
        commands: Option<Arc<dyn MessagePublisher>>,
        default_limit: i64,
    ) -> Self {
        Self {
            store,
            gate,
            datasync,
            commands,
            default_limit,
        }
    }

    pub fn from_config(config: &SystemConfig) -> Result<Self, BootstrapError> {
        let gate = resolve_access_gate(config)?;
        let bundle = load_from_system_config(config)?;
        Ok(Self::from_bundle(bundle, gate, resolve_datasync(config)?))
    }

    pub fn from_bundle(
        bundle: RegistryBundle,
        gate: AccessGate,
        datasync: Arc<dyn DataSyncClient>,
    ) -> Self {
        let commands = if bundle.bus.shared {
            Some(bundle.bus.publisher)
        } else {
            warn!("bus.redis_url is empty, onboarding is disabled");
            None
        };
        Self::new(bundle.store, gate, datasync, commands, bundle.default_limit)
    }
}
