mod config;
mod error;
mod logging;
mod runtime;
pub mod services;
pub mod sync;

pub use config::AppConfig;
pub use error::AppError;
pub use logging::init as init_logging;
pub use runtime::SystemClock;

pub fn run() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run(config)
}

pub fn run_service() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run_service(config)
}

pub fn run_api() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run_api(config)
}

fn bootstrap() -> Result<AppConfig, AppError> {
    logging::init()?;
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    tracing::info!(
        api_url = %config.api_url,
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        status_batch_size = config.status_batch_size,
        import_batch_size = config.import_batch_size,
        offline_threshold_hours = config.offline_threshold_hours,
        sync_interval_secs = config.sync_interval_secs,
        "application bootstrap initialized"
    );

    Ok(config)
}
