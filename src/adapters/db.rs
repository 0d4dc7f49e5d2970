use rusqlite::{Connection, Row, params};
use thiserror::Error;

use crate::domain::models::{ConnectionStatus, GpsStatus, NewVehicleRecord, VehicleRecord};

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS vehicles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT,
    plate_number TEXT,
    latitude REAL,
    longitude REAL,
    speed REAL,
    course REAL,
    last_position_time TEXT,
    gps_status TEXT NOT NULL DEFAULT 'unknown',
    connection_status TEXT NOT NULL DEFAULT 'no_data',
    status_checked_at TEXT,
    additional_data TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vehicles_external_id
ON vehicles (external_id);

CREATE INDEX IF NOT EXISTS idx_vehicles_status_checked_at
ON vehicles (status_checked_at);
"#,
)];

const VEHICLE_COLUMNS: &str = "id, external_id, name, plate_number, latitude, longitude, speed, \
     course, last_position_time, gps_status, connection_status, status_checked_at, \
     additional_data, created_at, updated_at";

// Never-checked unknowns first, then oldest-checked (NULLs sort first in
// ascending order, which picks up never-checked records of other statuses).
const DUE_ORDER: &str = "CASE WHEN gps_status = 'unknown' AND status_checked_at IS NULL \
     THEN 0 ELSE 1 END, status_checked_at ASC, id ASC";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn row_to_vehicle(row: &Row<'_>) -> rusqlite::Result<VehicleRecord> {
    let gps_status: String = row.get(9)?;
    let connection_status: String = row.get(10)?;

    Ok(VehicleRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        plate_number: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        speed: row.get(6)?,
        course: row.get(7)?,
        last_position_time: row.get(8)?,
        gps_status: GpsStatus::parse(&gps_status),
        connection_status: ConnectionStatus::parse(&connection_status),
        status_checked_at: row.get(11)?,
        additional_data: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

pub fn insert_vehicle(
    connection: &Connection,
    new_vehicle: &NewVehicleRecord,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO vehicles (external_id, name, plate_number, latitude, longitude, speed, \
         course, last_position_time, gps_status, connection_status, status_checked_at, \
         additional_data, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            new_vehicle.external_id,
            new_vehicle.name,
            new_vehicle.plate_number,
            new_vehicle.latitude,
            new_vehicle.longitude,
            new_vehicle.speed,
            new_vehicle.course,
            new_vehicle.last_position_time,
            new_vehicle.gps_status.as_str(),
            new_vehicle.connection_status.as_str(),
            new_vehicle.status_checked_at,
            new_vehicle.additional_data,
            new_vehicle.created_at,
            new_vehicle.updated_at,
        ],
    )?;

    Ok(connection.last_insert_rowid())
}

pub fn update_vehicle(connection: &Connection, vehicle: &VehicleRecord) -> Result<(), DbError> {
    connection.execute(
        "UPDATE vehicles SET name = ?1, plate_number = ?2, latitude = ?3, longitude = ?4, \
         speed = ?5, course = ?6, last_position_time = ?7, gps_status = ?8, \
         connection_status = ?9, status_checked_at = ?10, additional_data = ?11, \
         updated_at = ?12 WHERE id = ?13",
        params![
            vehicle.name,
            vehicle.plate_number,
            vehicle.latitude,
            vehicle.longitude,
            vehicle.speed,
            vehicle.course,
            vehicle.last_position_time,
            vehicle.gps_status.as_str(),
            vehicle.connection_status.as_str(),
            vehicle.status_checked_at,
            vehicle.additional_data,
            vehicle.updated_at,
            vehicle.id,
        ],
    )?;

    Ok(())
}

/// Persist one reconciled page as a unit.
pub fn persist_batch(
    connection: &mut Connection,
    vehicles: &[VehicleRecord],
) -> Result<(), DbError> {
    let transaction = connection.transaction()?;

    for vehicle in vehicles {
        transaction.execute(
            "UPDATE vehicles SET name = ?1, plate_number = ?2, latitude = ?3, longitude = ?4, \
             speed = ?5, course = ?6, last_position_time = ?7, gps_status = ?8, \
             connection_status = ?9, status_checked_at = ?10, additional_data = ?11, \
             updated_at = ?12 WHERE id = ?13",
            params![
                vehicle.name,
                vehicle.plate_number,
                vehicle.latitude,
                vehicle.longitude,
                vehicle.speed,
                vehicle.course,
                vehicle.last_position_time,
                vehicle.gps_status.as_str(),
                vehicle.connection_status.as_str(),
                vehicle.status_checked_at,
                vehicle.additional_data,
                vehicle.updated_at,
                vehicle.id,
            ],
        )?;
    }

    transaction.commit()?;

    Ok(())
}

/// Persist one catalog-import chunk (new sightings plus refreshed rows) as a
/// unit.
pub fn apply_import_batch(
    connection: &mut Connection,
    inserts: &[NewVehicleRecord],
    updates: &[VehicleRecord],
) -> Result<(), DbError> {
    let transaction = connection.transaction()?;

    for new_vehicle in inserts {
        transaction.execute(
            "INSERT INTO vehicles (external_id, name, plate_number, latitude, longitude, speed, \
             course, last_position_time, gps_status, connection_status, status_checked_at, \
             additional_data, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                new_vehicle.external_id,
                new_vehicle.name,
                new_vehicle.plate_number,
                new_vehicle.latitude,
                new_vehicle.longitude,
                new_vehicle.speed,
                new_vehicle.course,
                new_vehicle.last_position_time,
                new_vehicle.gps_status.as_str(),
                new_vehicle.connection_status.as_str(),
                new_vehicle.status_checked_at,
                new_vehicle.additional_data,
                new_vehicle.created_at,
                new_vehicle.updated_at,
            ],
        )?;
    }

    for vehicle in updates {
        transaction.execute(
            "UPDATE vehicles SET name = ?1, plate_number = ?2, latitude = ?3, longitude = ?4, \
             speed = ?5, course = ?6, last_position_time = ?7, gps_status = ?8, \
             connection_status = ?9, status_checked_at = ?10, additional_data = ?11, \
             updated_at = ?12 WHERE id = ?13",
            params![
                vehicle.name,
                vehicle.plate_number,
                vehicle.latitude,
                vehicle.longitude,
                vehicle.speed,
                vehicle.course,
                vehicle.last_position_time,
                vehicle.gps_status.as_str(),
                vehicle.connection_status.as_str(),
                vehicle.status_checked_at,
                vehicle.additional_data,
                vehicle.updated_at,
                vehicle.id,
            ],
        )?;
    }

    transaction.commit()?;

    Ok(())
}

pub fn find_by_external_id(
    connection: &Connection,
    external_id: &str,
) -> Result<Option<VehicleRecord>, DbError> {
    let query = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE external_id = ?1");
    let mut statement = connection.prepare_cached(&query)?;

    let mut rows = statement.query(params![external_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(row_to_vehicle(row)?));
    }

    Ok(None)
}

pub fn find_by_id(connection: &Connection, id: i64) -> Result<Option<VehicleRecord>, DbError> {
    let query = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?1");
    let mut statement = connection.prepare_cached(&query)?;

    let mut rows = statement.query(params![id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(row_to_vehicle(row)?));
    }

    Ok(None)
}

/// The next page of records due for a status refresh, in priority order:
/// never-checked unknowns first, then everything else oldest-checked first.
pub fn next_due_batch(
    connection: &Connection,
    limit: u32,
    offset: u32,
) -> Result<Vec<VehicleRecord>, DbError> {
    let query = format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles ORDER BY {DUE_ORDER} LIMIT ?1 OFFSET ?2"
    );
    let mut statement = connection.prepare_cached(&query)?;

    let rows = statement.query_map(params![i64::from(limit), i64::from(offset)], |row| {
        row_to_vehicle(row)
    })?;

    let mut vehicles = Vec::new();
    for row in rows {
        vehicles.push(row?);
    }

    Ok(vehicles)
}

pub fn list_vehicles(
    connection: &Connection,
    limit: u32,
    offset: u32,
    gps_status: Option<GpsStatus>,
) -> Result<Vec<VehicleRecord>, DbError> {
    let query = match gps_status {
        Some(_) => format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE gps_status = ?3 \
             ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ),
        None => format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ),
    };
    let mut statement = connection.prepare_cached(&query)?;

    let limit = i64::from(limit);
    let offset = i64::from(offset);
    let mut vehicles = Vec::new();

    match gps_status {
        Some(status) => {
            let rows = statement
                .query_map(params![limit, offset, status.as_str()], |row| {
                    row_to_vehicle(row)
                })?;
            for row in rows {
                vehicles.push(row?);
            }
        }
        None => {
            let rows = statement.query_map(params![limit, offset], |row| row_to_vehicle(row))?;
            for row in rows {
                vehicles.push(row?);
            }
        }
    }

    Ok(vehicles)
}

pub fn count_vehicles(connection: &Connection) -> Result<i64, DbError> {
    let count = connection.query_row("SELECT COUNT(*) FROM vehicles", [], |row| row.get(0))?;
    Ok(count)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpsStatusStatistics {
    pub online: i64,
    pub offline: i64,
    pub no_data: i64,
    pub unknown: i64,
    pub total: i64,
}

pub fn gps_status_statistics(connection: &Connection) -> Result<GpsStatusStatistics, DbError> {
    let mut statement = connection
        .prepare_cached("SELECT gps_status, COUNT(*) FROM vehicles GROUP BY gps_status")?;

    let rows = statement.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut stats = GpsStatusStatistics::default();
    for row in rows {
        let (status, count) = row?;
        match GpsStatus::parse(&status) {
            GpsStatus::Online => stats.online = count,
            GpsStatus::Offline => stats.offline = count,
            GpsStatus::NoData => stats.no_data = count,
            GpsStatus::Unknown => stats.unknown += count,
        }
        stats.total += count;
    }

    Ok(stats)
}

/// Drop per-pass scratch held inside the connection. The analog of detaching
/// an in-memory identity map: prepared statements cached while walking a page
/// are released before the next page starts.
pub fn release_working_set(connection: &Connection) {
    connection.flush_prepared_statement_cache();
}
