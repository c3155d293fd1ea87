use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use fleetroster_core::{
    ids::*,
    records::{BusRecord, DriverRecord, DriverStatus, RouteRecord, Shift},
    RecordWrite, WriteBatch,
};

use crate::error::StorageError;
use crate::traits::{BatchSink, SnapshotSource};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn opt_id<T>(
    bytes: Option<Vec<u8>>,
    label: &str,
    make: fn([u8; 16]) -> T,
) -> Result<Option<T>, StorageError> {
    bytes
        .map(|b| to_array::<16>(b, label).map(make))
        .transpose()
}

/// Constraint failures mean the store holds assignments the batch did not
/// account for; anything else passes through untouched.
fn map_constraint(e: rusqlite::Error, context: &str) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(format!(
                "{context}: {}",
                msg.unwrap_or_else(|| err.to_string())
            ))
        }
        other => StorageError::Sqlite(other),
    }
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Insert or overwrite a route. Routes are never written by batches.
    pub fn put_route(&mut self, route: &RouteRecord) -> Result<(), StorageError> {
        let stops = route.stops_to_msgpack()?;
        self.conn.execute(
            "INSERT INTO routes (route_id, name, stops, active) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(route_id) DO UPDATE SET name = excluded.name, stops = excluded.stops, active = excluded.active",
            rusqlite::params![
                route.route_id.as_bytes().as_slice(),
                route.name,
                stops,
                route.active,
            ],
        )?;
        Ok(())
    }

    /// Insert or overwrite a bus outside of any batch, bumping its version.
    pub fn put_bus(&mut self, bus: &BusRecord) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO buses (bus_id, bus_number, assigned_driver_id, active_driver_id, route_id, active_trip_id, capacity, current_members)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(bus_id) DO UPDATE SET bus_number = excluded.bus_number, assigned_driver_id = excluded.assigned_driver_id,
                    active_driver_id = excluded.active_driver_id, route_id = excluded.route_id, active_trip_id = excluded.active_trip_id,
                    capacity = excluded.capacity, current_members = excluded.current_members, version = buses.version + 1",
                rusqlite::params![
                    bus.bus_id.as_bytes().as_slice(),
                    bus.bus_number,
                    bus.assigned_driver_id.as_ref().map(|d| d.as_bytes().as_slice()),
                    bus.active_driver_id.as_ref().map(|d| d.as_bytes().as_slice()),
                    bus.route_id.as_ref().map(|r| r.as_bytes().as_slice()),
                    bus.active_trip_id.as_ref().map(|t| t.as_bytes().as_slice()),
                    bus.capacity,
                    bus.current_members,
                ],
            )
            .map_err(|e| map_constraint(e, "put bus"))?;
        Ok(())
    }

    /// Insert or overwrite a driver outside of any batch, bumping its version.
    pub fn put_driver(&mut self, driver: &DriverRecord) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO drivers (driver_id, employee_id, display_name, assigned_bus_id, assigned_route_id, reserved, shift, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(driver_id) DO UPDATE SET employee_id = excluded.employee_id, display_name = excluded.display_name,
                    assigned_bus_id = excluded.assigned_bus_id, assigned_route_id = excluded.assigned_route_id,
                    reserved = excluded.reserved, shift = excluded.shift, status = excluded.status, version = drivers.version + 1",
                rusqlite::params![
                    driver.driver_id.as_bytes().as_slice(),
                    driver.employee_id,
                    driver.display_name,
                    driver.assigned_bus_id.as_ref().map(|b| b.as_bytes().as_slice()),
                    driver.assigned_route_id.as_ref().map(|r| r.as_bytes().as_slice()),
                    driver.reserved,
                    driver.shift.as_str(),
                    driver.status.as_str(),
                ],
            )
            .map_err(|e| map_constraint(e, "put driver"))?;
        Ok(())
    }

    pub fn get_driver(&self, driver_id: DriverId) -> Result<Option<DriverRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "{DRIVER_COLUMNS} WHERE driver_id = ?1"
        ))?;
        let mut rows = stmt.query(rusqlite::params![driver_id.as_bytes().as_slice()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_driver(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_bus(&self, bus_id: BusId) -> Result<Option<BusRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BUS_COLUMNS} WHERE bus_id = ?1"))?;
        let mut rows = stmt.query(rusqlite::params![bus_id.as_bytes().as_slice()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_bus(row)?)),
            None => Ok(None),
        }
    }

    pub fn has_batch(&self, digest: &BatchDigest) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT write_count FROM commit_log WHERE batch_digest = ?1",
                rusqlite::params![digest.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn commit_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM commit_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

const DRIVER_COLUMNS: &str = "SELECT driver_id, employee_id, display_name, assigned_bus_id, assigned_route_id, reserved, shift, status, version FROM drivers";

const BUS_COLUMNS: &str = "SELECT bus_id, bus_number, assigned_driver_id, active_driver_id, route_id, active_trip_id, capacity, current_members, version FROM buses";

fn read_driver(row: &rusqlite::Row) -> Result<DriverRecord, StorageError> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let shift: String = row.get(6)?;
    let status: String = row.get(7)?;
    let version: i64 = row.get(8)?;
    Ok(DriverRecord {
        driver_id: DriverId::from_bytes(to_array::<16>(id_bytes, "driver_id")?),
        employee_id: row.get(1)?,
        display_name: row.get(2)?,
        assigned_bus_id: opt_id(row.get(3)?, "assigned_bus_id", BusId::from_bytes)?,
        assigned_route_id: opt_id(row.get(4)?, "assigned_route_id", RouteId::from_bytes)?,
        reserved: row.get(5)?,
        shift: Shift::parse(&shift)?,
        status: DriverStatus::parse(&status)?,
        version: version as u64,
    })
}

fn read_bus(row: &rusqlite::Row) -> Result<BusRecord, StorageError> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let version: i64 = row.get(8)?;
    Ok(BusRecord {
        bus_id: BusId::from_bytes(to_array::<16>(id_bytes, "bus_id")?),
        bus_number: row.get(1)?,
        assigned_driver_id: opt_id(row.get(2)?, "assigned_driver_id", DriverId::from_bytes)?,
        active_driver_id: opt_id(row.get(3)?, "active_driver_id", DriverId::from_bytes)?,
        route_id: opt_id(row.get(4)?, "route_id", RouteId::from_bytes)?,
        active_trip_id: opt_id(row.get(5)?, "active_trip_id", TripId::from_bytes)?,
        capacity: row.get(6)?,
        current_members: row.get(7)?,
        version: version as u64,
    })
}

fn read_route(row: &rusqlite::Row) -> Result<RouteRecord, StorageError> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let stops: Vec<u8> = row.get(2)?;
    Ok(RouteRecord {
        route_id: RouteId::from_bytes(to_array::<16>(id_bytes, "route_id")?),
        name: row.get(1)?,
        stops: RouteRecord::stops_from_msgpack(&stops)?,
        active: row.get(3)?,
    })
}

fn tunnel(e: StorageError) -> rusqlite::Error {
    match e {
        StorageError::Sqlite(sq) => sq,
        other => rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            Box::new(OpaqueStorageError(other.to_string())),
        ),
    }
}

impl SnapshotSource for SqliteStorage {
    fn list_drivers(&self) -> Result<Vec<DriverRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DRIVER_COLUMNS} ORDER BY employee_id"))?;
        let drivers = stmt
            .query_map([], |row| read_driver(row).map_err(tunnel))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(drivers)
    }

    fn list_buses(&self) -> Result<Vec<BusRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BUS_COLUMNS} ORDER BY bus_number"))?;
        let buses = stmt
            .query_map([], |row| read_bus(row).map_err(tunnel))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(buses)
    }

    fn list_routes(&self) -> Result<Vec<RouteRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT route_id, name, stops, active FROM routes ORDER BY name")?;
        let routes = stmt
            .query_map([], |row| read_route(row).map_err(tunnel))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }
}

impl BatchSink for SqliteStorage {
    fn apply_batch(&mut self, batch: &WriteBatch) -> Result<(), StorageError> {
        // Dropping the transaction on any early return rolls it back.
        let tx = self.conn.transaction()?;

        let logged = tx.execute(
            "INSERT OR IGNORE INTO commit_log (batch_digest, write_count) VALUES (?1, ?2)",
            rusqlite::params![batch.digest.as_bytes().as_slice(), batch.len() as i64],
        )?;
        if logged == 0 {
            return Err(StorageError::DuplicateBatch(batch.digest.to_string()));
        }

        // Pass 1: check versions and release every assignment the batch
        // touches, so swaps never trip the unique indexes mid-transaction.
        for write in &batch.writes {
            let changed = match write {
                RecordWrite::Driver(d) => tx.execute(
                    "UPDATE drivers SET assigned_bus_id = NULL, assigned_route_id = NULL WHERE driver_id = ?1 AND version = ?2",
                    rusqlite::params![d.driver_id.as_bytes().as_slice(), d.version as i64],
                )?,
                RecordWrite::Bus(b) => tx.execute(
                    "UPDATE buses SET assigned_driver_id = NULL WHERE bus_id = ?1 AND version = ?2",
                    rusqlite::params![b.bus_id.as_bytes().as_slice(), b.version as i64],
                )?,
            };
            if changed == 0 {
                let id = match write {
                    RecordWrite::Driver(d) => d.driver_id.to_string(),
                    RecordWrite::Bus(b) => b.bus_id.to_string(),
                };
                return Err(StorageError::Stale {
                    kind: write.kind(),
                    id,
                    expected: write.expected_version(),
                });
            }
        }

        // Pass 2: write the resolved state.
        for write in &batch.writes {
            match write {
                RecordWrite::Driver(d) => tx
                    .execute(
                        "UPDATE drivers SET assigned_bus_id = ?1, assigned_route_id = ?2, reserved = ?3, shift = ?4, status = ?5, version = version + 1
                         WHERE driver_id = ?6",
                        rusqlite::params![
                            d.assigned_bus_id.as_ref().map(|b| b.as_bytes().as_slice()),
                            d.assigned_route_id.as_ref().map(|r| r.as_bytes().as_slice()),
                            d.reserved,
                            d.shift.as_str(),
                            d.status.as_str(),
                            d.driver_id.as_bytes().as_slice(),
                        ],
                    )
                    .map_err(|e| map_constraint(e, "write driver"))?,
                RecordWrite::Bus(b) => tx
                    .execute(
                        "UPDATE buses SET assigned_driver_id = ?1, route_id = ?2, version = version + 1 WHERE bus_id = ?3",
                        rusqlite::params![
                            b.assigned_driver_id.as_ref().map(|d| d.as_bytes().as_slice()),
                            b.route_id.as_ref().map(|r| r.as_bytes().as_slice()),
                            b.bus_id.as_bytes().as_slice(),
                        ],
                    )
                    .map_err(|e| map_constraint(e, "write bus"))?,
            };
        }

        tx.commit()?;
        debug!(digest = %batch.digest, writes = batch.len(), "applied write batch");
        Ok(())
    }
}

/// Wrapper error type used to tunnel StorageError through rusqlite's error system
/// in query_map closures that must return rusqlite::Error.
#[derive(Debug)]
struct OpaqueStorageError(String);

impl std::fmt::Display for OpaqueStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpaqueStorageError {}
