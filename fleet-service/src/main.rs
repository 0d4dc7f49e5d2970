fn main() {
    if let Err(err) = fleet_sync_api::app::run_service() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
