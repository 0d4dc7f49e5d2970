fn main() {
    if let Err(err) = fleet_sync_api::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
