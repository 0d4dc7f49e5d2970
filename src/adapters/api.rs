use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};

use crate::app::services::{ServiceError, SqliteVehicleService, VehicleQueryHandler};
use crate::domain::models::{GpsStatus, VehicleRecord};

#[derive(Clone)]
pub struct ApiState {
    pub vehicle_queries: SqliteVehicleService,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleResponse {
    pub id: i64,
    pub external_id: String,
    pub name: Option<String>,
    pub plate_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub last_position_time: Option<String>,
    pub gps_status: String,
    pub connection_status: String,
    pub status_checked_at: Option<String>,
    pub updated_at: String,
}

impl VehicleResponse {
    fn from_record(record: VehicleRecord) -> Self {
        Self {
            id: record.id,
            external_id: record.external_id,
            name: record.name,
            plate_number: record.plate_number,
            latitude: record.latitude,
            longitude: record.longitude,
            speed: record.speed,
            course: record.course,
            last_position_time: record.last_position_time,
            gps_status: record.gps_status.as_str().to_string(),
            connection_status: record.connection_status.as_str().to_string(),
            status_checked_at: record.status_checked_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetailResponse {
    #[serde(flatten)]
    pub vehicle: VehicleResponse,
    pub created_at: String,
    pub additional_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleListResponse {
    pub items: Vec<VehicleResponse>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GpsStatusStatsResponse {
    pub online: i64,
    pub offline: i64,
    pub no_data: i64,
    pub unknown: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsDbResponse {
    pub schema_version: u32,
    pub vehicles_count: i64,
    pub gps_status: GpsStatusStatsResponse,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(list_vehicles_endpoint)
        .service(get_vehicle_endpoint)
        .service(get_db_diagnostics_endpoint);
}

/// The listing filter accepts only the known classifications; anything else
/// is ignored rather than rejected, matching the web UI's behavior.
fn parse_status_filter(raw: Option<&str>) -> Option<GpsStatus> {
    match raw {
        Some("online") => Some(GpsStatus::Online),
        Some("offline") => Some(GpsStatus::Offline),
        Some("no_data") => Some(GpsStatus::NoData),
        Some("unknown") => Some(GpsStatus::Unknown),
        _ => None,
    }
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/vehicles")]
async fn list_vehicles_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0);
    let status = parse_status_filter(query.status.as_deref());

    let total = match state.vehicle_queries.count_vehicles() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };

    match state.vehicle_queries.list_vehicles(limit, offset, status) {
        Ok(vehicles) => {
            let items: Vec<VehicleResponse> = vehicles
                .into_iter()
                .map(VehicleResponse::from_record)
                .collect();

            HttpResponse::Ok().json(VehicleListResponse {
                items,
                total,
                limit,
                offset,
            })
        }
        Err(error) => service_error_response(error),
    }
}

#[get("/vehicles/{id}")]
async fn get_vehicle_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
) -> impl Responder {
    match state.vehicle_queries.get_vehicle(path.into_inner()) {
        Ok(Some(record)) => {
            let created_at = record.created_at.clone();
            let additional_data = record
                .additional_data
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok());

            HttpResponse::Ok().json(VehicleDetailResponse {
                vehicle: VehicleResponse::from_record(record),
                created_at,
                additional_data,
            })
        }
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "vehicle not found"
        })),
        Err(error) => service_error_response(error),
    }
}

#[get("/diagnostics/db")]
async fn get_db_diagnostics_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let schema_version = match state.vehicle_queries.get_schema_version() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let vehicles_count = match state.vehicle_queries.count_vehicles() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };
    let stats = match state.vehicle_queries.gps_status_statistics() {
        Ok(value) => value,
        Err(error) => return service_error_response(error),
    };

    HttpResponse::Ok().json(DiagnosticsDbResponse {
        schema_version,
        vehicles_count,
        gps_status: GpsStatusStatsResponse {
            online: stats.online,
            offline: stats.offline,
            no_data: stats.no_data,
            unknown: stats.unknown,
            total: stats.total,
        },
    })
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::DbLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        ServiceError::Database(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
    }
}
