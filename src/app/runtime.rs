use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::upstream::{TrackerApi, TrackerApiClient};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::services::SqliteVehicleService;
use crate::app::sync::SyncEngine;
use crate::domain::status::Clock;

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One sequential sync worker. The engine (and with it the upstream client's
/// pacing and auth state) is moved into the thread; nothing else touches it.
pub fn start_sync_worker<T, C>(
    mut engine: SyncEngine<T, C>,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    T: TrackerApi,
    C: Clock + Send + 'static,
{
    std::thread::spawn(move || {
        while !stop_flag.load(Ordering::Relaxed) {
            if let Err(error) = engine.sync_all() {
                tracing::warn!(error = %error, "sync pass failed");
            }
            sleep_until_stopped(interval, &stop_flag);
        }
        engine.logout();
    })
}

// Sleeps in one-second slices so a stop request does not wait out the whole
// sync interval.
fn sleep_until_stopped(duration: Duration, stop_flag: &AtomicBool) {
    let mut remaining = duration;
    while !stop_flag.load(Ordering::Relaxed) && !remaining.is_zero() {
        let step = remaining.min(Duration::from_secs(1));
        std::thread::sleep(step);
        remaining -= step;
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<Mutex<Connection>>, AppError> {
    let mut connection =
        crate::adapters::db::open_connection(&config.db_path).map_err(AppError::database_init)?;
    crate::adapters::db::run_migrations(&mut connection).map_err(AppError::database_init)?;
    Ok(Arc::new(Mutex::new(connection)))
}

fn build_engine(
    config: &AppConfig,
    connection: Arc<Mutex<Connection>>,
) -> Result<SyncEngine<TrackerApiClient<SystemClock>, SystemClock>, AppError> {
    let client = TrackerApiClient::new(
        &config.api_url,
        &config.api_login,
        &config.api_password,
        SystemClock,
    )
    .map_err(AppError::runtime)?;

    Ok(SyncEngine::new(
        client,
        SystemClock,
        connection,
        config.sync_options(),
    ))
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let shared_connection = open_store(&config)?;
    let api_state = ApiState {
        vehicle_queries: SqliteVehicleService::new(Arc::clone(&shared_connection)),
    };

    let engine = build_engine(&config, Arc::clone(&shared_connection))?;
    let stop_flag = Arc::new(AtomicBool::new(false));
    let worker_handle = start_sync_worker(
        engine,
        Duration::from_secs(config.sync_interval_secs),
        Arc::clone(&stop_flag),
    );

    tracing::info!(bind = %config.http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allow_any_method()
                        .allow_any_header(),
                )
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)?
        .run()
        .await
    });

    stop_flag.store(true, Ordering::Relaxed);
    let join_result = worker_handle.join();

    if join_result.is_err() {
        return Err(AppError::runtime("sync worker thread panicked"));
    }

    server_result.map_err(AppError::runtime)
}

/// Worker-only variant: sync passes on the configured interval, no HTTP.
pub fn run_service(config: AppConfig) -> Result<(), AppError> {
    let shared_connection = open_store(&config)?;
    let mut engine = build_engine(&config, shared_connection)?;
    let interval = Duration::from_secs(config.sync_interval_secs);

    tracing::info!(
        interval_secs = config.sync_interval_secs,
        "sync service starting"
    );

    loop {
        if let Err(error) = engine.sync_all() {
            tracing::warn!(error = %error, "sync pass failed");
        }
        std::thread::sleep(interval);
    }
}

/// Read-API-only variant: no sync worker, no upstream client.
pub fn run_api(config: AppConfig) -> Result<(), AppError> {
    let shared_connection = open_store(&config)?;
    let api_state = ApiState {
        vehicle_queries: SqliteVehicleService::new(shared_connection),
    };

    tracing::info!(bind = %config.http_bind, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .wrap(
                        Cors::default()
                            .allow_any_origin()
                            .allow_any_method()
                            .allow_any_header(),
                    )
                    .app_data(web::Data::new(api_state.clone()))
                    .configure(configure_routes)
            })
            .bind(&config.http_bind)?
            .run()
            .await
        })
        .map_err(AppError::runtime)
}
