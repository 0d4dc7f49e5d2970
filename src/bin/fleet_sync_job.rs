use std::sync::{Arc, Mutex};

use fleet_sync_api::adapters::db::{open_connection, run_migrations};
use fleet_sync_api::adapters::upstream::TrackerApiClient;
use fleet_sync_api::app::sync::SyncEngine;
use fleet_sync_api::app::{AppConfig, SystemClock, init_logging};

enum Operation {
    StatusPass,
    CatalogImport,
    SingleVehicle(String),
}

fn main() {
    if let Err(error) = run() {
        eprintln!("sync job failed: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut operation = Operation::StatusPass;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--catalog" => {
                operation = Operation::CatalogImport;
                index += 1;
            }
            "--vehicle-id" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--vehicle-id requires a value".to_string());
                };
                operation = Operation::SingleVehicle(value.clone());
                index += 2;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    init_logging().map_err(|error| error.to_string())?;
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().map_err(|error| error.to_string())?;

    let mut connection = open_connection(&config.db_path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;
    let shared_connection = Arc::new(Mutex::new(connection));

    let client = TrackerApiClient::new(
        &config.api_url,
        &config.api_login,
        &config.api_password,
        SystemClock,
    )
    .map_err(|error| error.to_string())?;

    let mut engine = SyncEngine::new(client, SystemClock, shared_connection, config.sync_options());

    match operation {
        Operation::StatusPass => {
            let report = engine.sync_all().map_err(|error| error.to_string())?;
            println!(
                "status sync finished: {} vehicles in {} batches, {} ms",
                report.processed, report.batches, report.elapsed_ms
            );
        }
        Operation::CatalogImport => {
            let report = engine.import_catalog().map_err(|error| error.to_string())?;
            println!(
                "catalog import finished: {} vehicles ({} created, {} updated, {} skipped) \
                 in {} batches, {} ms",
                report.total, report.created, report.updated, report.skipped, report.batches,
                report.elapsed_ms
            );
        }
        Operation::SingleVehicle(external_id) => {
            let refreshed = engine
                .sync_one(&external_id)
                .map_err(|error| error.to_string())?;
            if refreshed {
                println!("vehicle {external_id} refreshed");
            } else {
                println!("vehicle {external_id} is not in the local store; run --catalog first");
            }
        }
    }

    engine.logout();
    Ok(())
}

fn print_help() {
    println!("fleet_sync_job");
    println!();
    println!("Usage:");
    println!("  cargo run --bin fleet_sync_job -- [--catalog | --vehicle-id <external-id>]");
    println!();
    println!("Options:");
    println!("  --catalog                 import the full vehicle catalog from the tracker api");
    println!("  --vehicle-id <id>         refresh a single vehicle by its external id");
    println!("  (no option)               run a full status synchronization pass");
}
