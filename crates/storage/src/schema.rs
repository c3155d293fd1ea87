use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// The partial unique indexes enforce exactly-one-owner at the store: a driver
// sits on at most one bus and a bus has at most one assigned driver.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS routes (
    route_id BLOB PRIMARY KEY CHECK (length(route_id) = 16),
    name TEXT NOT NULL,
    stops BLOB NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS buses (
    bus_id BLOB PRIMARY KEY CHECK (length(bus_id) = 16),
    bus_number TEXT NOT NULL UNIQUE,
    assigned_driver_id BLOB CHECK (assigned_driver_id IS NULL OR length(assigned_driver_id) = 16),
    active_driver_id BLOB CHECK (active_driver_id IS NULL OR length(active_driver_id) = 16),
    route_id BLOB CHECK (route_id IS NULL OR length(route_id) = 16),
    active_trip_id BLOB CHECK (active_trip_id IS NULL OR length(active_trip_id) = 16),
    capacity INTEGER NOT NULL,
    current_members INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_buses_assigned_driver
    ON buses (assigned_driver_id) WHERE assigned_driver_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS drivers (
    driver_id BLOB PRIMARY KEY CHECK (length(driver_id) = 16),
    employee_id TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    assigned_bus_id BLOB CHECK (assigned_bus_id IS NULL OR length(assigned_bus_id) = 16),
    assigned_route_id BLOB CHECK (assigned_route_id IS NULL OR length(assigned_route_id) = 16),
    reserved INTEGER NOT NULL DEFAULT 0,
    shift TEXT NOT NULL,
    status TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_drivers_assigned_bus
    ON drivers (assigned_bus_id) WHERE assigned_bus_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS commit_log (
    batch_digest BLOB PRIMARY KEY CHECK (length(batch_digest) = 32),
    write_count INTEGER NOT NULL,
    committed_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
";
