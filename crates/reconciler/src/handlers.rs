//! Applies domain events to the record store.
//!
//! Every event runs in its own store transaction and is idempotent: applying
//! the same event twice leaves the same state as applying it once. Updates
//! merge the fields they carry and never clear a field they omit.

use std::sync::Arc;

use registry::{
    AuditSink, DelegateGrant, Delivery, Event, MeteringPoint, MeteringPointUpdate, RecordStore,
    StoreError, StoreTransaction, Technology, TechnologyCodes,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Not retried; the delivery is reported and dropped.
    #[error("malformed event: {0}")]
    Malformed(String),
    /// Eligible for redelivery.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Decodes a raw bus payload and applies it.
    pub fn handle_delivery(&self, delivery: &Delivery) -> Result<Event, ReconcileError> {
        let event: Event = serde_json::from_slice(&delivery.payload)
            .map_err(|err| ReconcileError::Malformed(err.to_string()))?;
        self.apply(&event)?;
        Ok(event)
    }

    pub fn apply(&self, event: &Event) -> Result<(), ReconcileError> {
        event.validate().map_err(ReconcileError::Malformed)?;
        let mut tx = self.store.begin()?;
        match event {
            Event::MeteringPointAdded { meteringpoint }
            | Event::MeteringPointUpdated { meteringpoint } => {
                merge_meteringpoint(tx.as_mut(), meteringpoint)?
            }
            Event::MeteringPointRemoved { gsrn } => remove_meteringpoint(tx.as_mut(), gsrn)?,
            Event::MeteringPointAddressUpdated { gsrn, address } => match address {
                Some(address) => tx.save_address(gsrn, address)?,
                None => {
                    tx.delete_address(gsrn)?;
                }
            },
            Event::MeteringPointTechnologyUpdated { gsrn, codes } => match codes {
                Some(codes) => tx.save_technology_link(gsrn, codes)?,
                None => {
                    tx.delete_technology_link(gsrn)?;
                }
            },
            Event::TechnologyUpdate { technology } => upsert_technology(tx.as_mut(), technology)?,
            Event::TechnologyRemoved { codes } => remove_technology(tx.as_mut(), codes)?,
            Event::MeteringPointDelegateGranted { delegate } => {
                grant_delegate(tx.as_mut(), delegate)?
            }
            Event::MeteringPointDelegateRevoked { delegate } => {
                tx.delete_delegate(delegate)?;
            }
        }
        tx.commit()?;
        debug!(event = event.kind(), "event applied");
        Ok(())
    }
}

fn merge_meteringpoint(
    tx: &mut dyn StoreTransaction,
    update: &MeteringPointUpdate,
) -> Result<(), StoreError> {
    let mut meteringpoint = tx
        .meteringpoint(&update.gsrn)?
        .unwrap_or_else(|| MeteringPoint::new(update.gsrn.clone()));
    if let Some(sector) = &update.sector {
        meteringpoint.sector = Some(sector.clone());
    }
    if let Some(meteringpoint_type) = update.meteringpoint_type {
        meteringpoint.meteringpoint_type = Some(meteringpoint_type);
    }
    tx.save_meteringpoint(&meteringpoint)?;

    if let Some(codes) = &update.technology {
        tx.save_technology_link(&update.gsrn, codes)?;
    }
    if let Some(address) = &update.address {
        tx.save_address(&update.gsrn, address)?;
    }
    Ok(())
}

fn remove_meteringpoint(tx: &mut dyn StoreTransaction, gsrn: &str) -> Result<(), StoreError> {
    let existed = tx.delete_meteringpoint(gsrn)?;
    tx.delete_address(gsrn)?;
    tx.delete_technology_link(gsrn)?;
    let delegates = tx.delete_delegates(gsrn)?;
    debug!(gsrn = %gsrn, existed, delegates, "metering point removed");
    Ok(())
}

fn upsert_technology(tx: &mut dyn StoreTransaction, technology: &Technology) -> Result<(), StoreError> {
    match tx.technology(&technology.codes())? {
        Some(mut existing) => {
            existing.technology_type = technology.technology_type;
            tx.save_technology(&existing)
        }
        None => tx.save_technology(technology),
    }
}

fn remove_technology(tx: &mut dyn StoreTransaction, codes: &TechnologyCodes) -> Result<(), StoreError> {
    if !tx.delete_technology(codes)? {
        debug!(tech_code = %codes.tech_code, fuel_code = %codes.fuel_code, "technology already absent");
    }
    Ok(())
}

fn grant_delegate(tx: &mut dyn StoreTransaction, grant: &DelegateGrant) -> Result<(), StoreError> {
    if tx.has_delegate(grant)? {
        return Ok(());
    }
    tx.insert_delegate(grant)?;
    Ok(())
}
