use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::{DbError, GpsStatusStatistics};
use crate::domain::models::{GpsStatus, VehicleRecord};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

pub trait VehicleQueryHandler {
    fn get_vehicle(&self, id: i64) -> Result<Option<VehicleRecord>, ServiceError>;
    fn get_vehicle_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<VehicleRecord>, ServiceError>;
    fn list_vehicles(
        &self,
        limit: u32,
        offset: u32,
        gps_status: Option<GpsStatus>,
    ) -> Result<Vec<VehicleRecord>, ServiceError>;
    fn count_vehicles(&self) -> Result<i64, ServiceError>;
    fn gps_status_statistics(&self) -> Result<GpsStatusStatistics, ServiceError>;
    fn get_schema_version(&self) -> Result<u32, ServiceError>;
}

#[derive(Clone)]
pub struct SqliteVehicleService {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteVehicleService {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }
}

impl VehicleQueryHandler for SqliteVehicleService {
    fn get_vehicle(&self, id: i64) -> Result<Option<VehicleRecord>, ServiceError> {
        self.with_connection(|connection| db::find_by_id(connection, id))
    }

    fn get_vehicle_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<VehicleRecord>, ServiceError> {
        self.with_connection(|connection| db::find_by_external_id(connection, external_id))
    }

    fn list_vehicles(
        &self,
        limit: u32,
        offset: u32,
        gps_status: Option<GpsStatus>,
    ) -> Result<Vec<VehicleRecord>, ServiceError> {
        self.with_connection(|connection| db::list_vehicles(connection, limit, offset, gps_status))
    }

    fn count_vehicles(&self) -> Result<i64, ServiceError> {
        self.with_connection(db::count_vehicles)
    }

    fn gps_status_statistics(&self) -> Result<GpsStatusStatistics, ServiceError> {
        self.with_connection(db::gps_status_statistics)
    }

    fn get_schema_version(&self) -> Result<u32, ServiceError> {
        self.with_connection(db::schema_version)
    }
}
