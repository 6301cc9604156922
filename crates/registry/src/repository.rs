use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::models::{
    Address, DelegateGrant, MeteringPoint, MeteringPointType, MeteringPointView, QueryPage,
    Technology, TechnologyCodes, TechnologyType,
};
use crate::query::{MeteringPointQuery, Placeholder};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Store(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Keyed storage for MeteringPoints and the entities hanging off them.
///
/// All access goes through a [`StoreTransaction`]. Writes become visible on
/// [`StoreTransaction::commit`]; a transaction dropped before commit rolls
/// back.
pub trait RecordStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;

    /// Transaction for reads only. Backends that can serve reads without the
    /// writer lock override this; write methods on the result may fail.
    fn begin_read(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        self.begin()
    }

    /// Runs a single read inside its own transaction.
    fn query(&self, query: &MeteringPointQuery) -> Result<QueryPage, StoreError> {
        let mut tx = self.begin_read()?;
        let page = tx.query_meteringpoints(query)?;
        tx.commit()?;
        Ok(page)
    }
}

pub trait StoreTransaction {
    fn meteringpoint(&mut self, gsrn: &str) -> Result<Option<MeteringPoint>, StoreError>;
    /// Inserts or overwrites the row; an existing row keeps its insertion position.
    fn save_meteringpoint(&mut self, meteringpoint: &MeteringPoint) -> Result<(), StoreError>;
    fn delete_meteringpoint(&mut self, gsrn: &str) -> Result<bool, StoreError>;

    fn address(&mut self, gsrn: &str) -> Result<Option<Address>, StoreError>;
    fn save_address(&mut self, gsrn: &str, address: &Address) -> Result<(), StoreError>;
    fn delete_address(&mut self, gsrn: &str) -> Result<bool, StoreError>;

    fn technology_link(&mut self, gsrn: &str) -> Result<Option<TechnologyCodes>, StoreError>;
    fn save_technology_link(&mut self, gsrn: &str, codes: &TechnologyCodes) -> Result<(), StoreError>;
    fn delete_technology_link(&mut self, gsrn: &str) -> Result<bool, StoreError>;

    fn technology(&mut self, codes: &TechnologyCodes) -> Result<Option<Technology>, StoreError>;
    fn save_technology(&mut self, technology: &Technology) -> Result<(), StoreError>;
    fn delete_technology(&mut self, codes: &TechnologyCodes) -> Result<bool, StoreError>;

    fn has_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError>;
    /// Returns `false` when the grant already existed.
    fn insert_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError>;
    fn delete_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError>;
    fn delete_delegates(&mut self, gsrn: &str) -> Result<u64, StoreError>;

    /// Filtered count plus the requested page, with technology and address
    /// resolved at read time.
    fn query_meteringpoints(&mut self, query: &MeteringPointQuery) -> Result<QueryPage, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Raw columns of one joined MeteringPoint row, shared by the SQL backends.
#[derive(Debug, Default)]
pub(crate) struct ViewRow {
    pub gsrn: String,
    pub sector: Option<String>,
    pub meteringpoint_type: Option<String>,
    pub tech_code: Option<String>,
    pub fuel_code: Option<String>,
    pub technology_type: Option<String>,
    pub address_gsrn: Option<String>,
    pub address: [Option<String>; 10],
}

impl ViewRow {
    pub fn into_view(self) -> Result<MeteringPointView, StoreError> {
        let meteringpoint = MeteringPoint {
            gsrn: self.gsrn,
            sector: self.sector,
            meteringpoint_type: parse_meteringpoint_type(self.meteringpoint_type)?,
        };
        let technology = match (self.tech_code, self.fuel_code, self.technology_type) {
            (Some(tech_code), Some(fuel_code), Some(technology_type)) => Some(Technology {
                tech_code,
                fuel_code,
                technology_type: parse_technology_type(&technology_type)?,
            }),
            _ => None,
        };
        let address = self
            .address_gsrn
            .map(|_| Address::from_values(self.address));
        Ok(MeteringPointView::resolve(&meteringpoint, technology, address))
    }
}

pub(crate) fn parse_meteringpoint_type(
    value: Option<String>,
) -> Result<Option<MeteringPointType>, StoreError> {
    value
        .map(|value| value.parse::<MeteringPointType>().map_err(StoreError::Corrupt))
        .transpose()
}

pub(crate) fn parse_technology_type(value: &str) -> Result<TechnologyType, StoreError> {
    value.parse::<TechnologyType>().map_err(StoreError::Corrupt)
}

/// Upsert statement for the `addresses` table, gsrn bound first.
pub(crate) fn address_upsert_sql(style: Placeholder) -> String {
    let placeholders: Vec<String> = (1..=Address::FIELDS.len() + 1)
        .map(|index| match style {
            Placeholder::Numbered => format!("?{index}"),
            Placeholder::Dollar => format!("${index}"),
        })
        .collect();
    let updates: Vec<String> = Address::FIELDS
        .iter()
        .map(|field| format!("{field} = excluded.{field}"))
        .collect();
    format!(
        "INSERT INTO addresses (gsrn, {}) VALUES ({}) ON CONFLICT (gsrn) DO UPDATE SET {}",
        Address::FIELDS.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

pub(crate) fn address_select_sql(style: Placeholder) -> String {
    let placeholder = match style {
        Placeholder::Numbered => "?1",
        Placeholder::Dollar => "$1",
    };
    format!(
        "SELECT {} FROM addresses WHERE gsrn = {placeholder}",
        Address::FIELDS.join(", ")
    )
}

#[derive(Clone, Debug, Default)]
struct Tables {
    next_seq: u64,
    meteringpoints: HashMap<String, (u64, MeteringPoint)>,
    technology_links: HashMap<String, TechnologyCodes>,
    technologies: HashMap<TechnologyCodes, TechnologyType>,
    addresses: HashMap<String, Address>,
    delegates: HashSet<DelegateGrant>,
}

impl Tables {
    fn resolve(&self, meteringpoint: &MeteringPoint) -> MeteringPointView {
        let technology = self
            .technology_links
            .get(&meteringpoint.gsrn)
            .and_then(|codes| {
                self.technologies.get(codes).map(|technology_type| Technology {
                    tech_code: codes.tech_code.clone(),
                    fuel_code: codes.fuel_code.clone(),
                    technology_type: *technology_type,
                })
            });
        let address = self.addresses.get(&meteringpoint.gsrn).cloned();
        MeteringPointView::resolve(meteringpoint, technology, address)
    }
}

/// Process-local store. A write transaction holds the store lock for its
/// whole lifetime and works on a private copy of the tables; read
/// transactions share the lock with each other.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl RecordStore for InMemoryRecordStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let guard = self.tables.write();
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            access: Access::Write { guard, working },
        }))
    }

    fn begin_read(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            access: Access::Read(self.tables.read()),
        }))
    }
}

enum Access<'a> {
    Read(RwLockReadGuard<'a, Tables>),
    Write {
        guard: RwLockWriteGuard<'a, Tables>,
        working: Tables,
    },
}

struct InMemoryTransaction<'a> {
    access: Access<'a>,
}

impl InMemoryTransaction<'_> {
    fn tables(&self) -> &Tables {
        match &self.access {
            Access::Read(guard) => &**guard,
            Access::Write { working, .. } => working,
        }
    }

    fn tables_mut(&mut self) -> Result<&mut Tables, StoreError> {
        match &mut self.access {
            Access::Read(_) => Err(StoreError::Store("write in a read-only transaction".to_string())),
            Access::Write { working, .. } => Ok(working),
        }
    }
}

impl StoreTransaction for InMemoryTransaction<'_> {
    fn meteringpoint(&mut self, gsrn: &str) -> Result<Option<MeteringPoint>, StoreError> {
        Ok(self
            .tables()
            .meteringpoints
            .get(gsrn)
            .map(|(_, meteringpoint)| meteringpoint.clone()))
    }

    fn save_meteringpoint(&mut self, meteringpoint: &MeteringPoint) -> Result<(), StoreError> {
        let tables = self.tables_mut()?;
        match tables.meteringpoints.get_mut(&meteringpoint.gsrn) {
            Some((_, stored)) => *stored = meteringpoint.clone(),
            None => {
                tables.next_seq += 1;
                tables.meteringpoints.insert(
                    meteringpoint.gsrn.clone(),
                    (tables.next_seq, meteringpoint.clone()),
                );
            }
        }
        Ok(())
    }

    fn delete_meteringpoint(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        Ok(self.tables_mut()?.meteringpoints.remove(gsrn).is_some())
    }

    fn address(&mut self, gsrn: &str) -> Result<Option<Address>, StoreError> {
        Ok(self.tables().addresses.get(gsrn).cloned())
    }

    fn save_address(&mut self, gsrn: &str, address: &Address) -> Result<(), StoreError> {
        self.tables_mut()?
            .addresses
            .insert(gsrn.to_string(), address.clone());
        Ok(())
    }

    fn delete_address(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        Ok(self.tables_mut()?.addresses.remove(gsrn).is_some())
    }

    fn technology_link(&mut self, gsrn: &str) -> Result<Option<TechnologyCodes>, StoreError> {
        Ok(self.tables().technology_links.get(gsrn).cloned())
    }

    fn save_technology_link(&mut self, gsrn: &str, codes: &TechnologyCodes) -> Result<(), StoreError> {
        self.tables_mut()?
            .technology_links
            .insert(gsrn.to_string(), codes.clone());
        Ok(())
    }

    fn delete_technology_link(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        Ok(self.tables_mut()?.technology_links.remove(gsrn).is_some())
    }

    fn technology(&mut self, codes: &TechnologyCodes) -> Result<Option<Technology>, StoreError> {
        Ok(self
            .tables()
            .technologies
            .get(codes)
            .map(|technology_type| Technology {
                tech_code: codes.tech_code.clone(),
                fuel_code: codes.fuel_code.clone(),
                technology_type: *technology_type,
            }))
    }

    fn save_technology(&mut self, technology: &Technology) -> Result<(), StoreError> {
        self.tables_mut()?
            .technologies
            .insert(technology.codes(), technology.technology_type);
        Ok(())
    }

    fn delete_technology(&mut self, codes: &TechnologyCodes) -> Result<bool, StoreError> {
        Ok(self.tables_mut()?.technologies.remove(codes).is_some())
    }

    fn has_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        Ok(self.tables().delegates.contains(grant))
    }

    fn insert_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        Ok(self.tables_mut()?.delegates.insert(grant.clone()))
    }

    fn delete_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        Ok(self.tables_mut()?.delegates.remove(grant))
    }

    fn delete_delegates(&mut self, gsrn: &str) -> Result<u64, StoreError> {
        let delegates = &mut self.tables_mut()?.delegates;
        let before = delegates.len();
        delegates.retain(|grant| grant.gsrn != gsrn);
        Ok((before - delegates.len()) as u64)
    }

    fn query_meteringpoints(&mut self, query: &MeteringPointQuery) -> Result<QueryPage, StoreError> {
        let tables = self.tables();
        let mut rows: Vec<&(u64, MeteringPoint)> = tables
            .meteringpoints
            .values()
            .filter(|(_, meteringpoint)| {
                query.matches(meteringpoint, |gsrn, subject| {
                    tables.delegates.contains(&DelegateGrant::new(gsrn, subject))
                })
            })
            .collect();
        rows.sort_by(|(left_seq, left), (right_seq, right)| {
            query
                .compare(left, right)
                .then_with(|| left_seq.cmp(right_seq))
        });

        let total = rows.len() as u64;
        let (offset, limit) = match query.page() {
            Some(page) => (page.offset() as usize, page.limit() as usize),
            None => (0, rows.len()),
        };
        let meteringpoints = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, meteringpoint)| tables.resolve(meteringpoint))
            .collect();
        Ok(QueryPage {
            total,
            meteringpoints,
        })
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction { access } = *self;
        if let Access::Write { mut guard, working } = access {
            *guard = working;
        }
        Ok(())
    }
}
