use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use tracing::warn;

use crate::models::{Address, DelegateGrant, MeteringPoint, QueryPage, Technology, TechnologyCodes};
use crate::query::{MeteringPointQuery, Placeholder, SELECT_ADDRESS_OFFSET};
use crate::repository::{
    address_select_sql, address_upsert_sql, parse_meteringpoint_type, parse_technology_type,
    RecordStore, StoreError, StoreTransaction, ViewRow,
};

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meteringpoints (
    seq BIGSERIAL NOT NULL,
    gsrn TEXT PRIMARY KEY,
    sector TEXT,
    type TEXT
);
CREATE INDEX IF NOT EXISTS meteringpoints_seq ON meteringpoints (seq);
CREATE TABLE IF NOT EXISTS meteringpoint_technologies (
    gsrn TEXT PRIMARY KEY,
    tech_code TEXT NOT NULL,
    fuel_code TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS technologies (
    tech_code TEXT NOT NULL,
    fuel_code TEXT NOT NULL,
    type TEXT NOT NULL,
    PRIMARY KEY (tech_code, fuel_code)
);
CREATE TABLE IF NOT EXISTS addresses (
    gsrn TEXT PRIMARY KEY,
    street_code TEXT,
    street_name TEXT,
    building_number TEXT,
    floor_id TEXT,
    room_id TEXT,
    post_code TEXT,
    city_name TEXT,
    city_sub_division_name TEXT,
    municipality_code TEXT,
    location_description TEXT
);
CREATE TABLE IF NOT EXISTS delegates (
    gsrn TEXT NOT NULL,
    subject TEXT NOT NULL,
    PRIMARY KEY (gsrn, subject)
);
CREATE INDEX IF NOT EXISTS delegates_subject ON delegates (subject, gsrn);
";

/// Serializes writers on the same gsrn until the surrounding transaction ends.
pub(crate) const GSRN_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

fn store_err(err: postgres::Error) -> StoreError {
    StoreError::Store(err.to_string())
}

/// PostgreSQL-backed store over a fixed set of connections. Transactions on
/// different gsrn keys proceed in parallel; same-gsrn writers queue on an
/// advisory lock.
pub struct PgRecordStore {
    clients: Vec<Mutex<Client>>,
    next: AtomicUsize,
}

impl PgRecordStore {
    pub fn connect(dsn: &str, pool_size: usize) -> Result<Self, StoreError> {
        let mut clients = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let client = Client::connect(dsn, NoTls).map_err(store_err)?;
            clients.push(Mutex::new(client));
        }
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut client = self.checkout();
        client.batch_execute(SCHEMA).map_err(store_err)?;
        Ok(())
    }

    fn checkout(&self) -> MutexGuard<'_, Client> {
        let len = self.clients.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            if let Some(client) = self.clients[(start + offset) % len].try_lock() {
                return client;
            }
        }
        self.clients[start].lock()
    }
}

impl RecordStore for PgRecordStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let mut client = self.checkout();
        client.batch_execute("BEGIN").map_err(store_err)?;
        Ok(Box::new(PgTransaction {
            client,
            locked: HashSet::new(),
            finished: false,
        }))
    }
}

struct PgTransaction<'a> {
    client: MutexGuard<'a, Client>,
    locked: HashSet<String>,
    finished: bool,
}

impl PgTransaction<'_> {
    fn lock_gsrn(&mut self, gsrn: &str) -> Result<(), StoreError> {
        if self.locked.contains(gsrn) {
            return Ok(());
        }
        self.client.execute(GSRN_LOCK_SQL, &[&gsrn]).map_err(store_err)?;
        self.locked.insert(gsrn.to_string());
        Ok(())
    }
}

impl Drop for PgTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.client.batch_execute("ROLLBACK") {
            warn!(error = %err, "postgres rollback failed");
        }
    }
}

impl StoreTransaction for PgTransaction<'_> {
    fn meteringpoint(&mut self, gsrn: &str) -> Result<Option<MeteringPoint>, StoreError> {
        self.lock_gsrn(gsrn)?;
        let row = self
            .client
            .query_opt(
                "SELECT gsrn, sector, type FROM meteringpoints WHERE gsrn = $1",
                &[&gsrn],
            )
            .map_err(store_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(MeteringPoint {
            gsrn: row.try_get(0).map_err(store_err)?,
            sector: row.try_get(1).map_err(store_err)?,
            meteringpoint_type: parse_meteringpoint_type(row.try_get(2).map_err(store_err)?)?,
        }))
    }

    fn save_meteringpoint(&mut self, meteringpoint: &MeteringPoint) -> Result<(), StoreError> {
        self.lock_gsrn(&meteringpoint.gsrn)?;
        let meteringpoint_type = meteringpoint.meteringpoint_type.map(|value| value.as_str());
        self.client
            .execute(
                "INSERT INTO meteringpoints (gsrn, sector, type) VALUES ($1, $2, $3)
                 ON CONFLICT (gsrn) DO UPDATE SET sector = EXCLUDED.sector, type = EXCLUDED.type",
                &[&meteringpoint.gsrn, &meteringpoint.sector, &meteringpoint_type],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_meteringpoint(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        self.lock_gsrn(gsrn)?;
        let removed = self
            .client
            .execute("DELETE FROM meteringpoints WHERE gsrn = $1", &[&gsrn])
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn address(&mut self, gsrn: &str) -> Result<Option<Address>, StoreError> {
        let row = self
            .client
            .query_opt(&address_select_sql(Placeholder::Dollar), &[&gsrn])
            .map_err(store_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut values: [Option<String>; 10] = Default::default();
        for (index, value) in values.iter_mut().enumerate() {
            *value = row.try_get(index).map_err(store_err)?;
        }
        Ok(Some(Address::from_values(values)))
    }

    fn save_address(&mut self, gsrn: &str, address: &Address) -> Result<(), StoreError> {
        self.lock_gsrn(gsrn)?;
        let values = address.values();
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&gsrn];
        for value in &values {
            params.push(value);
        }
        self.client
            .execute(&address_upsert_sql(Placeholder::Dollar), &params)
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_address(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        self.lock_gsrn(gsrn)?;
        let removed = self
            .client
            .execute("DELETE FROM addresses WHERE gsrn = $1", &[&gsrn])
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn technology_link(&mut self, gsrn: &str) -> Result<Option<TechnologyCodes>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT tech_code, fuel_code FROM meteringpoint_technologies WHERE gsrn = $1",
                &[&gsrn],
            )
            .map_err(store_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TechnologyCodes::new(
            row.try_get::<_, String>(0).map_err(store_err)?,
            row.try_get::<_, String>(1).map_err(store_err)?,
        )))
    }

    fn save_technology_link(&mut self, gsrn: &str, codes: &TechnologyCodes) -> Result<(), StoreError> {
        self.lock_gsrn(gsrn)?;
        self.client
            .execute(
                "INSERT INTO meteringpoint_technologies (gsrn, tech_code, fuel_code) VALUES ($1, $2, $3)
                 ON CONFLICT (gsrn) DO UPDATE
                 SET tech_code = EXCLUDED.tech_code, fuel_code = EXCLUDED.fuel_code",
                &[&gsrn, &codes.tech_code, &codes.fuel_code],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_technology_link(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        self.lock_gsrn(gsrn)?;
        let removed = self
            .client
            .execute(
                "DELETE FROM meteringpoint_technologies WHERE gsrn = $1",
                &[&gsrn],
            )
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn technology(&mut self, codes: &TechnologyCodes) -> Result<Option<Technology>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT type FROM technologies WHERE tech_code = $1 AND fuel_code = $2",
                &[&codes.tech_code, &codes.fuel_code],
            )
            .map_err(store_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let technology_type: String = row.try_get(0).map_err(store_err)?;
        Ok(Some(Technology {
            tech_code: codes.tech_code.clone(),
            fuel_code: codes.fuel_code.clone(),
            technology_type: parse_technology_type(&technology_type)?,
        }))
    }

    fn save_technology(&mut self, technology: &Technology) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO technologies (tech_code, fuel_code, type) VALUES ($1, $2, $3)
                 ON CONFLICT (tech_code, fuel_code) DO UPDATE SET type = EXCLUDED.type",
                &[
                    &technology.tech_code,
                    &technology.fuel_code,
                    &technology.technology_type.as_str(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_technology(&mut self, codes: &TechnologyCodes) -> Result<bool, StoreError> {
        let removed = self
            .client
            .execute(
                "DELETE FROM technologies WHERE tech_code = $1 AND fuel_code = $2",
                &[&codes.tech_code, &codes.fuel_code],
            )
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn has_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM delegates WHERE gsrn = $1 AND subject = $2",
                &[&grant.gsrn, &grant.subject],
            )
            .map_err(store_err)?;
        Ok(row.is_some())
    }

    fn insert_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        self.lock_gsrn(&grant.gsrn)?;
        let inserted = self
            .client
            .execute(
                "INSERT INTO delegates (gsrn, subject) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&grant.gsrn, &grant.subject],
            )
            .map_err(store_err)?;
        Ok(inserted > 0)
    }

    fn delete_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        self.lock_gsrn(&grant.gsrn)?;
        let removed = self
            .client
            .execute(
                "DELETE FROM delegates WHERE gsrn = $1 AND subject = $2",
                &[&grant.gsrn, &grant.subject],
            )
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn delete_delegates(&mut self, gsrn: &str) -> Result<u64, StoreError> {
        self.lock_gsrn(gsrn)?;
        self.client
            .execute("DELETE FROM delegates WHERE gsrn = $1", &[&gsrn])
            .map_err(store_err)
    }

    fn query_meteringpoints(&mut self, query: &MeteringPointQuery) -> Result<QueryPage, StoreError> {
        let sql = query.to_sql(Placeholder::Dollar, "mp.seq");
        let params: Vec<&(dyn ToSql + Sync)> = sql
            .params
            .iter()
            .map(|value| value as &(dyn ToSql + Sync))
            .collect();

        let total: i64 = self
            .client
            .query_one(&sql.count_sql(), &params)
            .and_then(|row| row.try_get(0))
            .map_err(store_err)?;

        let rows = self
            .client
            .query(&sql.select_sql(), &params)
            .map_err(store_err)?;
        let mut meteringpoints = Vec::with_capacity(rows.len());
        for row in rows {
            let mut view = ViewRow {
                gsrn: row.try_get(0).map_err(store_err)?,
                sector: row.try_get(1).map_err(store_err)?,
                meteringpoint_type: row.try_get(2).map_err(store_err)?,
                tech_code: row.try_get(3).map_err(store_err)?,
                fuel_code: row.try_get(4).map_err(store_err)?,
                technology_type: row.try_get(5).map_err(store_err)?,
                address_gsrn: row.try_get(6).map_err(store_err)?,
                address: Default::default(),
            };
            for (index, value) in view.address.iter_mut().enumerate() {
                *value = row.try_get(SELECT_ADDRESS_OFFSET + index).map_err(store_err)?;
            }
            meteringpoints.push(view.into_view()?);
        }
        Ok(QueryPage {
            total: total as u64,
            meteringpoints,
        })
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.client.batch_execute("COMMIT").map_err(store_err)?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_upsert_binds_gsrn_then_fields() {
        let sql = address_upsert_sql(Placeholder::Dollar);
        assert!(sql.starts_with("INSERT INTO addresses (gsrn, street_code, street_name,"));
        assert!(sql.contains("VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"));
        assert!(sql.ends_with("location_description = excluded.location_description"));
    }

    #[test]
    fn schema_keeps_insertion_sequence() {
        assert!(SCHEMA.contains("seq BIGSERIAL"));
        assert!(SCHEMA.contains("PRIMARY KEY (gsrn, subject)"));
        assert!(GSRN_LOCK_SQL.contains("pg_advisory_xact_lock"));
    }
}
