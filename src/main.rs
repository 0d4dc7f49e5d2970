fn main() {
    if let Err(err) = fleet_sync_api::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
