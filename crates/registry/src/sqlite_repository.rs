use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tracing::warn;

use crate::models::{Address, DelegateGrant, MeteringPoint, QueryPage, Technology, TechnologyCodes};
use crate::query::{MeteringPointQuery, Placeholder, SELECT_ADDRESS_OFFSET};
use crate::repository::{
    address_select_sql, address_upsert_sql, parse_meteringpoint_type, parse_technology_type,
    RecordStore, StoreError, StoreTransaction, ViewRow,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meteringpoints (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    gsrn TEXT NOT NULL UNIQUE,
    sector TEXT,
    type TEXT
);
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

fn store_err(err: rusqlite::Error) -> StoreError {
    StoreError::Store(err.to_string())
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store. Writers serialize on the single write connection.
/// A file database runs in WAL mode with a second, read-only connection so
/// queries do not wait for writers; `:memory:` reads share the writer.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    reader: Option<Arc<Mutex<Connection>>>,
}

impl SqliteRecordStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(store_err)?;
        if path.is_empty() || path == ":memory:" {
            return Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
                reader: None,
            });
        }
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(store_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(store_err)?;
        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(store_err)?;
        reader.busy_timeout(BUSY_TIMEOUT).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            reader: Some(Arc::new(Mutex::new(reader))),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(())
    }
}

impl RecordStore for SqliteRecordStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE").map_err(store_err)?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }

    fn begin_read(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let conn = self.reader.as_ref().unwrap_or(&self.conn).lock();
        conn.execute_batch("BEGIN").map_err(store_err)?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %err, "sqlite rollback failed");
        }
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn meteringpoint(&mut self, gsrn: &str) -> Result<Option<MeteringPoint>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT gsrn, sector, type FROM meteringpoints WHERE gsrn = ?1",
                params![gsrn],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err)?;
        let Some((gsrn, sector, meteringpoint_type)) = row else {
            return Ok(None);
        };
        Ok(Some(MeteringPoint {
            gsrn,
            sector,
            meteringpoint_type: parse_meteringpoint_type(meteringpoint_type)?,
        }))
    }

    fn save_meteringpoint(&mut self, meteringpoint: &MeteringPoint) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO meteringpoints (gsrn, sector, type) VALUES (?1, ?2, ?3)
                 ON CONFLICT (gsrn) DO UPDATE SET sector = excluded.sector, type = excluded.type",
                params![
                    meteringpoint.gsrn,
                    meteringpoint.sector,
                    meteringpoint.meteringpoint_type.map(|value| value.as_str())
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_meteringpoint(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM meteringpoints WHERE gsrn = ?1", params![gsrn])
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn address(&mut self, gsrn: &str) -> Result<Option<Address>, StoreError> {
        self.conn
            .query_row(&address_select_sql(Placeholder::Numbered), params![gsrn], |row| {
                let mut values: [Option<String>; 10] = Default::default();
                for (index, value) in values.iter_mut().enumerate() {
                    *value = row.get(index)?;
                }
                Ok(Address::from_values(values))
            })
            .optional()
            .map_err(store_err)
    }

    fn save_address(&mut self, gsrn: &str, address: &Address) -> Result<(), StoreError> {
        let values = std::iter::once(Some(gsrn)).chain(address.values());
        self.conn
            .execute(&address_upsert_sql(Placeholder::Numbered), params_from_iter(values))
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_address(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM addresses WHERE gsrn = ?1", params![gsrn])
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn technology_link(&mut self, gsrn: &str) -> Result<Option<TechnologyCodes>, StoreError> {
        self.conn
            .query_row(
                "SELECT tech_code, fuel_code FROM meteringpoint_technologies WHERE gsrn = ?1",
                params![gsrn],
                |row| Ok(TechnologyCodes::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(store_err)
    }

    fn save_technology_link(&mut self, gsrn: &str, codes: &TechnologyCodes) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO meteringpoint_technologies (gsrn, tech_code, fuel_code) VALUES (?1, ?2, ?3)
                 ON CONFLICT (gsrn) DO UPDATE
                 SET tech_code = excluded.tech_code, fuel_code = excluded.fuel_code",
                params![gsrn, codes.tech_code, codes.fuel_code],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_technology_link(&mut self, gsrn: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM meteringpoint_technologies WHERE gsrn = ?1",
                params![gsrn],
            )
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn technology(&mut self, codes: &TechnologyCodes) -> Result<Option<Technology>, StoreError> {
        let technology_type = self
            .conn
            .query_row(
                "SELECT type FROM technologies WHERE tech_code = ?1 AND fuel_code = ?2",
                params![codes.tech_code, codes.fuel_code],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(store_err)?;
        let Some(technology_type) = technology_type else {
            return Ok(None);
        };
        Ok(Some(Technology {
            tech_code: codes.tech_code.clone(),
            fuel_code: codes.fuel_code.clone(),
            technology_type: parse_technology_type(&technology_type)?,
        }))
    }

    fn save_technology(&mut self, technology: &Technology) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO technologies (tech_code, fuel_code, type) VALUES (?1, ?2, ?3)
                 ON CONFLICT (tech_code, fuel_code) DO UPDATE SET type = excluded.type",
                params![
                    technology.tech_code,
                    technology.fuel_code,
                    technology.technology_type.as_str()
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn delete_technology(&mut self, codes: &TechnologyCodes) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM technologies WHERE tech_code = ?1 AND fuel_code = ?2",
                params![codes.tech_code, codes.fuel_code],
            )
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn has_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM delegates WHERE gsrn = ?1 AND subject = ?2",
                params![grant.gsrn, grant.subject],
                |_| Ok(()),
            )
            .optional()
            .map_err(store_err)?;
        Ok(found.is_some())
    }

    fn insert_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO delegates (gsrn, subject) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
                params![grant.gsrn, grant.subject],
            )
            .map_err(store_err)?;
        Ok(inserted > 0)
    }

    fn delete_delegate(&mut self, grant: &DelegateGrant) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM delegates WHERE gsrn = ?1 AND subject = ?2",
                params![grant.gsrn, grant.subject],
            )
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    fn delete_delegates(&mut self, gsrn: &str) -> Result<u64, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM delegates WHERE gsrn = ?1", params![gsrn])
            .map_err(store_err)?;
        Ok(removed as u64)
    }

    fn query_meteringpoints(&mut self, query: &MeteringPointQuery) -> Result<QueryPage, StoreError> {
        let sql = query.to_sql(Placeholder::Numbered, "mp.seq");
        let total: i64 = self
            .conn
            .query_row(&sql.count_sql(), params_from_iter(sql.params.iter()), |row| row.get(0))
            .map_err(store_err)?;

        let mut stmt = self.conn.prepare(&sql.select_sql()).map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(sql.params.iter()), |row| {
                let mut view = ViewRow {
                    gsrn: row.get(0)?,
                    sector: row.get(1)?,
                    meteringpoint_type: row.get(2)?,
                    tech_code: row.get(3)?,
                    fuel_code: row.get(4)?,
                    technology_type: row.get(5)?,
                    address_gsrn: row.get(6)?,
                    address: Default::default(),
                };
                for (index, value) in view.address.iter_mut().enumerate() {
                    *value = row.get(SELECT_ADDRESS_OFFSET + index)?;
                }
                Ok(view)
            })
            .map_err(store_err)?;

        let mut meteringpoints = Vec::new();
        for row in rows {
            meteringpoints.push(row.map_err(store_err)?.into_view()?);
        }
        Ok(QueryPage {
            total: total as u64,
            meteringpoints,
        })
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT").map_err(store_err)?;
        self.finished = true;
        Ok(())
    }
}
