use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::db::{self, DbError};
use crate::adapters::upstream::{TrackerApi, UpstreamError};
use crate::domain::models::{ConnectionStatus, GpsStatus, NewVehicleRecord, VehicleRecord};
use crate::domain::status::{self, Clock, to_rfc3339_millis};
use crate::domain::vehicle_payload::{CatalogFields, TelemetryUpdate, extract_external_id};

/// Long runs accumulate scratch state across hundreds of pages; every N
/// pages the engine drops and reallocates its working buffers outright.
const HOUSEKEEPING_PAGE_INTERVAL: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub status_batch_size: u32,
    pub import_batch_size: u32,
    pub offline_threshold_hours: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            status_batch_size: 25,
            import_batch_size: 100,
            offline_threshold_hours: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Auth(#[source] UpstreamError),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pass_id: Uuid,
    pub processed: usize,
    pub batches: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub pass_id: Uuid,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub batches: usize,
    pub elapsed_ms: u128,
}

/// Drives reconciliation passes over the record store. One engine is one
/// sequential worker: it exclusively owns the upstream client (and with it
/// the pacing and auth state), so passes never overlap.
pub struct SyncEngine<T: TrackerApi, C: Clock> {
    client: T,
    clock: C,
    connection: Arc<Mutex<Connection>>,
    options: SyncOptions,
    scratch_ids: Vec<String>,
    scratch_index: HashMap<String, Map<String, Value>>,
}

impl<T: TrackerApi, C: Clock> SyncEngine<T, C> {
    pub fn new(
        client: T,
        clock: C,
        connection: Arc<Mutex<Connection>>,
        options: SyncOptions,
    ) -> Self {
        Self {
            client,
            clock,
            connection,
            options,
            scratch_ids: Vec::new(),
            scratch_index: HashMap::new(),
        }
    }

    /// Refresh status for the whole due set, one bulk-fetch call per page.
    ///
    /// Pages are committed independently; a failed bulk call aborts the pass
    /// and leaves already-committed pages intact. The next scheduled pass
    /// re-selects the oldest-unchecked records first, so nothing is lost.
    pub fn sync_all(&mut self) -> Result<SyncReport, SyncError> {
        let pass_id = Uuid::new_v4();
        let started = Instant::now();

        self.client.ensure_authenticated().map_err(SyncError::Auth)?;

        let total = {
            let connection = self.lock_store()?;
            db::count_vehicles(&connection)?
        };
        tracing::info!(%pass_id, total, "starting status sync pass");

        let limit = self.options.status_batch_size.max(1);
        let mut processed = 0_usize;
        let mut batches = 0_usize;
        let mut offset = 0_u32;

        loop {
            let page = {
                let connection = self.lock_store()?;
                db::next_due_batch(&connection, limit, offset)?
            };
            if page.is_empty() {
                break;
            }

            let batch_started = Instant::now();
            let reconciled = self.reconcile_page(page)?;

            {
                let mut connection = self.lock_store()?;
                db::persist_batch(&mut connection, &reconciled)?;
                db::release_working_set(&connection);
            }

            processed += reconciled.len();
            batches += 1;
            offset += limit;

            tracing::info!(
                %pass_id,
                batch = batches,
                processed,
                total,
                batch_elapsed_ms = batch_started.elapsed().as_millis() as u64,
                "batch committed"
            );

            if batches % HOUSEKEEPING_PAGE_INTERVAL == 0 {
                self.release_scratch();
            }
        }

        let report = SyncReport {
            pass_id,
            processed,
            batches,
            elapsed_ms: started.elapsed().as_millis(),
        };
        tracing::info!(
            %pass_id,
            processed = report.processed,
            batches = report.batches,
            elapsed_ms = report.elapsed_ms as u64,
            "status sync pass completed"
        );
        Ok(report)
    }

    /// Refresh one record through the single-item endpoint. A record missing
    /// from the store is logged and skipped rather than failing the process.
    pub fn sync_one(&mut self, external_id: &str) -> Result<bool, SyncError> {
        let pass_id = Uuid::new_v4();
        tracing::info!(%pass_id, external_id, "refreshing single vehicle");

        self.client.ensure_authenticated().map_err(SyncError::Auth)?;

        let payload = self.client.fetch_vehicle(external_id)?;

        let existing = {
            let connection = self.lock_store()?;
            db::find_by_external_id(&connection, external_id)?
        };
        let Some(mut record) = existing else {
            tracing::warn!(%pass_id, external_id, "vehicle not found in store, skipping refresh");
            return Ok(false);
        };

        let now = self.clock.now();
        match payload.as_ref().and_then(Value::as_object) {
            Some(map) => apply_telemetry(&mut record, map, now, self.offline_threshold()),
            None => mark_no_data(&mut record, now),
        }

        {
            let connection = self.lock_store()?;
            db::update_vehicle(&connection, &record)?;
        }

        tracing::info!(
            %pass_id,
            external_id,
            gps_status = record.gps_status.as_str(),
            "single vehicle refreshed"
        );
        Ok(true)
    }

    /// Import the full upstream catalog: one listing call, then find-or-create
    /// per entry, committed in bounded chunks. Re-running against identical
    /// upstream data changes nothing (external id is the join key).
    pub fn import_catalog(&mut self) -> Result<ImportReport, SyncError> {
        let pass_id = Uuid::new_v4();
        let started = Instant::now();

        self.client.ensure_authenticated().map_err(SyncError::Auth)?;

        let catalog = self.client.fetch_catalog()?;
        let total = catalog.len();
        let batch_size = self.options.import_batch_size.max(1) as usize;
        let batch_count = total.div_ceil(batch_size);
        tracing::info!(%pass_id, total, batches = batch_count, "starting catalog import");

        let mut created = 0_usize;
        let mut updated = 0_usize;
        let mut skipped = 0_usize;
        let mut batches = 0_usize;

        for chunk in catalog.chunks(batch_size) {
            let batch_started = Instant::now();
            let now = self.clock.now();
            let mut inserts: Vec<NewVehicleRecord> = Vec::new();
            let mut updates: Vec<VehicleRecord> = Vec::new();

            for item in chunk {
                let Some(payload) = item.as_object() else {
                    tracing::warn!(%pass_id, "non-object entry in catalog reply, skipping");
                    skipped += 1;
                    continue;
                };
                let Some(external_id) = extract_external_id(payload) else {
                    tracing::warn!(%pass_id, "vehicle without id in catalog reply, skipping");
                    skipped += 1;
                    continue;
                };
                if inserts.iter().any(|new| new.external_id == external_id) {
                    tracing::warn!(%pass_id, external_id, "duplicate id in catalog reply, skipping");
                    skipped += 1;
                    continue;
                }

                let existing = {
                    let connection = self.lock_store()?;
                    db::find_by_external_id(&connection, &external_id)?
                };
                match existing {
                    Some(mut record) => {
                        apply_catalog_fields(
                            &mut record,
                            payload,
                            now,
                            self.offline_threshold(),
                        );
                        updates.push(record);
                    }
                    None => inserts.push(catalog_new_record(
                        external_id,
                        payload,
                        now,
                        self.offline_threshold(),
                    )),
                }
            }

            {
                let mut connection = self.lock_store()?;
                db::apply_import_batch(&mut connection, &inserts, &updates)?;
                db::release_working_set(&connection);
            }

            created += inserts.len();
            updated += updates.len();
            batches += 1;

            tracing::info!(
                %pass_id,
                batch = batches,
                of = batch_count,
                created,
                updated,
                batch_elapsed_ms = batch_started.elapsed().as_millis() as u64,
                "import batch committed"
            );

            if batches % HOUSEKEEPING_PAGE_INTERVAL == 0 {
                self.release_scratch();
            }
        }

        let report = ImportReport {
            pass_id,
            total,
            created,
            updated,
            skipped,
            batches,
            elapsed_ms: started.elapsed().as_millis(),
        };
        tracing::info!(
            %pass_id,
            total = report.total,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            batches = report.batches,
            elapsed_ms = report.elapsed_ms as u64,
            "catalog import completed"
        );
        Ok(report)
    }

    pub fn logout(&mut self) {
        self.client.logout();
    }

    /// One bulk-fetch call for the whole page, then per-record reconciliation
    /// against the reply. Records are never held locked across the network
    /// call: the page was read before it, and is written after it.
    fn reconcile_page(
        &mut self,
        mut page: Vec<VehicleRecord>,
    ) -> Result<Vec<VehicleRecord>, SyncError> {
        self.scratch_ids.clear();
        self.scratch_ids
            .extend(page.iter().map(|record| record.external_id.clone()));

        let rows = self.client.fetch_last_data(&self.scratch_ids)?;

        self.scratch_index.clear();
        for row in rows {
            if let Value::Object(payload) = row
                && let Some(external_id) = extract_external_id(&payload)
            {
                self.scratch_index.insert(external_id, payload);
            }
        }

        let now = self.clock.now();
        let threshold = self.offline_threshold();
        for record in &mut page {
            match self.scratch_index.get(&record.external_id) {
                Some(payload) => apply_telemetry(record, payload, now, threshold),
                None => mark_no_data(record, now),
            }
        }

        Ok(page)
    }

    fn release_scratch(&mut self) {
        self.scratch_ids = Vec::new();
        self.scratch_index = HashMap::new();
    }

    fn offline_threshold(&self) -> Duration {
        Duration::hours(self.options.offline_threshold_hours)
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.connection.lock().map_err(|_| SyncError::DbLockPoisoned)
    }
}

/// Apply one bulk-fetch reply row to a record. A row with none of latitude,
/// longitude or a sample timestamp classifies as `no_data` instead.
fn apply_telemetry(
    record: &mut VehicleRecord,
    payload: &Map<String, Value>,
    now: DateTime<Utc>,
    threshold: Duration,
) {
    let update = TelemetryUpdate::from_payload(payload);
    if !update.has_position() {
        mark_no_data(record, now);
        return;
    }

    if let Some(latitude) = update.latitude {
        record.latitude = Some(latitude);
    }
    if let Some(longitude) = update.longitude {
        record.longitude = Some(longitude);
    }
    if let Some(speed) = update.speed {
        record.speed = Some(speed);
    }
    if let Some(course) = update.course {
        record.course = Some(course);
    }
    if let Some(record_time) = update.record_time {
        record.last_position_time = Some(to_rfc3339_millis(record_time));
    }

    status::apply_status(record, now, threshold);
    record.updated_at = to_rfc3339_millis(now);
}

/// Upstream was reachable but had nothing for this record. Previously stored
/// coordinates are deliberately left in place.
fn mark_no_data(record: &mut VehicleRecord, now: DateTime<Utc>) {
    record.gps_status = GpsStatus::NoData;
    record.connection_status = ConnectionStatus::NoData;
    record.status_checked_at = Some(to_rfc3339_millis(now));
    record.updated_at = to_rfc3339_millis(now);
}

fn apply_catalog_fields(
    record: &mut VehicleRecord,
    payload: &Map<String, Value>,
    now: DateTime<Utc>,
    threshold: Duration,
) {
    let fields = CatalogFields::from_payload(payload);

    if let Some(name) = fields.name {
        record.name = Some(name);
    }
    if let Some(plate_number) = fields.plate_number {
        record.plate_number = Some(plate_number);
    }
    if let Some(latitude) = fields.latitude {
        record.latitude = Some(latitude);
    }
    if let Some(longitude) = fields.longitude {
        record.longitude = Some(longitude);
    }
    if let Some(speed) = fields.speed {
        record.speed = Some(speed);
    }
    if let Some(course) = fields.course {
        record.course = Some(course);
    }
    if let Some(last_position_time) = fields.last_position_time {
        record.last_position_time = Some(to_rfc3339_millis(last_position_time));
    }

    // The upstream schema is not fully stable; the raw payload rides along
    // verbatim so nothing is lost between schema revisions.
    record.additional_data = Some(Value::Object(payload.clone()).to_string());

    status::apply_status(record, now, threshold);
    record.updated_at = to_rfc3339_millis(now);
}

fn catalog_new_record(
    external_id: String,
    payload: &Map<String, Value>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> NewVehicleRecord {
    let fields = CatalogFields::from_payload(payload);
    let (gps_status, connection_status) = status::derive(fields.last_position_time, now, threshold);

    NewVehicleRecord {
        external_id,
        name: fields.name,
        plate_number: fields.plate_number,
        latitude: fields.latitude,
        longitude: fields.longitude,
        speed: fields.speed,
        course: fields.course,
        last_position_time: fields.last_position_time.map(to_rfc3339_millis),
        gps_status,
        connection_status,
        status_checked_at: Some(to_rfc3339_millis(now)),
        additional_data: Some(Value::Object(payload.clone()).to_string()),
        created_at: to_rfc3339_millis(now),
        updated_at: to_rfc3339_millis(now),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{Value, json};

    use crate::adapters::db::{self, find_by_external_id, insert_vehicle};
    use crate::adapters::upstream::{TrackerApi, UpstreamError};
    use crate::domain::models::{ConnectionStatus, GpsStatus, NewVehicleRecord};
    use crate::domain::status::Clock;
    use crate::test_support::open_test_connection;

    use super::{SyncEngine, SyncError, SyncOptions};

    struct FakeClock {
        now_ms: Cell<i64>,
    }

    impl FakeClock {
        fn fixed(now_ms: i64) -> Self {
            Self {
                now_ms: Cell::new(now_ms),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_millis_opt(self.now_ms.get())
                .single()
                .expect("test clock value should be valid")
        }
    }

    #[derive(Default)]
    struct FakeTracker {
        auth_fails: bool,
        catalog: Vec<Value>,
        last_data: HashMap<String, Value>,
        vehicles: HashMap<String, Value>,
        fail_bulk_call: Option<usize>,
        bulk_calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl TrackerApi for FakeTracker {
        fn ensure_authenticated(&mut self) -> Result<(), UpstreamError> {
            if self.auth_fails {
                return Err(UpstreamError::AuthFailed(
                    "no AuthId in login reply".to_string(),
                ));
            }
            Ok(())
        }

        fn fetch_catalog(&mut self) -> Result<Vec<Value>, UpstreamError> {
            Ok(self.catalog.clone())
        }

        fn fetch_vehicle(&mut self, external_id: &str) -> Result<Option<Value>, UpstreamError> {
            Ok(self.vehicles.get(external_id).cloned())
        }

        fn fetch_last_data(
            &mut self,
            external_ids: &[String],
        ) -> Result<Vec<Value>, UpstreamError> {
            let mut calls = self.bulk_calls.lock().expect("call log lock");
            calls.push(external_ids.to_vec());
            let call_index = calls.len();
            drop(calls);

            if self.fail_bulk_call == Some(call_index) {
                return Err(UpstreamError::Api {
                    status: 503,
                    body: "throttled".to_string(),
                });
            }

            Ok(external_ids
                .iter()
                .filter_map(|id| self.last_data.get(id).cloned())
                .collect())
        }

        fn logout(&mut self) {}
    }

    const NOW_MS: i64 = 1_772_366_400_000; // 2026-03-01T12:00:00Z

    fn now_string() -> &'static str {
        "2026-03-01T12:00:00.000Z"
    }

    fn engine_with(
        tracker: FakeTracker,
        connection: rusqlite::Connection,
        options: SyncOptions,
    ) -> SyncEngine<FakeTracker, FakeClock> {
        SyncEngine::new(
            tracker,
            FakeClock::fixed(NOW_MS),
            Arc::new(Mutex::new(connection)),
            options,
        )
    }

    fn sighted(external_id: &str) -> NewVehicleRecord {
        NewVehicleRecord::sighted(external_id.to_string(), "2026-03-01T00:00:00.000Z".into())
    }

    #[test]
    fn bulk_reply_updates_present_records_and_marks_missing_no_data() {
        let connection = open_test_connection("sync-bulk.sqlite");

        for id in ["a", "b", "c"] {
            let mut record = sighted(id);
            record.latitude = Some(10.0);
            record.longitude = Some(20.0);
            insert_vehicle(&connection, &record).expect("insert should succeed");
        }

        let mut last_data = HashMap::new();
        last_data.insert(
            "a".to_string(),
            json!({"vehicleId": "a", "latitude": 55.7, "longitude": 37.6,
                   "speed": 42.0, "recordTime": "2026-03-01T11:45:00Z"}),
        );
        last_data.insert(
            "b".to_string(),
            json!({"vehicleId": "b", "latitude": 61.2, "longitude": 73.5,
                   "recordTime": "2026-03-01T08:00:00Z"}),
        );

        let tracker = FakeTracker {
            last_data,
            ..FakeTracker::default()
        };
        let mut engine = engine_with(tracker, connection, SyncOptions::default());

        let report = engine.sync_all().expect("pass should succeed");
        assert_eq!(report.processed, 3);
        assert_eq!(report.batches, 1);

        let store = engine.connection.lock().expect("store lock");

        let fresh = find_by_external_id(&store, "a")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(fresh.gps_status, GpsStatus::Online);
        assert_eq!(fresh.connection_status, ConnectionStatus::Connected);
        assert_eq!(fresh.latitude, Some(55.7));
        assert_eq!(fresh.speed, Some(42.0));
        assert_eq!(fresh.status_checked_at.as_deref(), Some(now_string()));
        assert_eq!(fresh.updated_at, now_string());

        let stale = find_by_external_id(&store, "b")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(stale.gps_status, GpsStatus::Offline);
        assert_eq!(stale.connection_status, ConnectionStatus::Disconnected);

        let missing = find_by_external_id(&store, "c")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(missing.gps_status, GpsStatus::NoData);
        assert_eq!(missing.connection_status, ConnectionStatus::NoData);
        assert_eq!(missing.latitude, Some(10.0));
        assert_eq!(missing.longitude, Some(20.0));
        assert_eq!(missing.status_checked_at.as_deref(), Some(now_string()));
    }

    #[test]
    fn stale_record_goes_online_when_reply_carries_a_fresh_sample() {
        let connection = open_test_connection("sync-stale.sqlite");

        let mut record = sighted("truck-7");
        record.last_position_time = Some("2026-03-01T09:00:00.000Z".into()); // 3h old
        record.gps_status = GpsStatus::Offline;
        record.connection_status = ConnectionStatus::Disconnected;
        record.status_checked_at = Some("2026-03-01T09:05:00.000Z".into());
        insert_vehicle(&connection, &record).expect("insert should succeed");

        let mut last_data = HashMap::new();
        last_data.insert(
            "truck-7".to_string(),
            json!({"vehicleId": "truck-7", "recordTime": "2026-03-01T12:00:00Z"}),
        );
        let tracker = FakeTracker {
            last_data,
            ..FakeTracker::default()
        };
        let mut engine = engine_with(tracker, connection, SyncOptions::default());

        engine.sync_all().expect("pass should succeed");

        let store = engine.connection.lock().expect("store lock");
        let refreshed = find_by_external_id(&store, "truck-7")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(refreshed.gps_status, GpsStatus::Online);
        assert_eq!(refreshed.connection_status, ConnectionStatus::Connected);
        assert_eq!(refreshed.last_position_time.as_deref(), Some(now_string()));
    }

    #[test]
    fn pass_issues_one_bulk_call_per_page() {
        let connection = open_test_connection("sync-paging.sqlite");

        for idx in 0..5 {
            insert_vehicle(&connection, &sighted(&format!("v{idx}")))
                .expect("insert should succeed");
        }

        let tracker = FakeTracker::default();
        let bulk_calls = Arc::clone(&tracker.bulk_calls);
        let options = SyncOptions {
            status_batch_size: 2,
            ..SyncOptions::default()
        };
        let mut engine = engine_with(tracker, connection, options);

        let report = engine.sync_all().expect("pass should succeed");

        assert_eq!(report.batches, 3);
        assert_eq!(report.processed, 5);

        let calls = bulk_calls.lock().expect("call log lock");
        let sizes: Vec<usize> = calls.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn auth_failure_aborts_the_pass_before_any_batch() {
        let connection = open_test_connection("sync-auth.sqlite");
        insert_vehicle(&connection, &sighted("a")).expect("insert should succeed");

        let tracker = FakeTracker {
            auth_fails: true,
            ..FakeTracker::default()
        };
        let mut engine = engine_with(tracker, connection, SyncOptions::default());

        let result = engine.sync_all();
        assert!(matches!(result, Err(SyncError::Auth(_))));

        let store = engine.connection.lock().expect("store lock");
        let untouched = find_by_external_id(&store, "a")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(untouched.status_checked_at, None);
    }

    #[test]
    fn bulk_failure_aborts_the_pass_but_keeps_committed_batches() {
        let connection = open_test_connection("sync-abort.sqlite");

        for id in ["v0", "v1", "v2", "v3"] {
            insert_vehicle(&connection, &sighted(id)).expect("insert should succeed");
        }

        let tracker = FakeTracker {
            fail_bulk_call: Some(2),
            ..FakeTracker::default()
        };
        let options = SyncOptions {
            status_batch_size: 2,
            ..SyncOptions::default()
        };
        let mut engine = engine_with(tracker, connection, options);

        let result = engine.sync_all();
        assert!(matches!(
            result,
            Err(SyncError::Upstream(UpstreamError::Api { status: 503, .. }))
        ));

        let store = engine.connection.lock().expect("store lock");
        let committed = find_by_external_id(&store, "v0")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(committed.gps_status, GpsStatus::NoData);
        assert_eq!(committed.status_checked_at.as_deref(), Some(now_string()));

        let untouched = find_by_external_id(&store, "v2")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(untouched.status_checked_at, None);
        assert_eq!(untouched.gps_status, GpsStatus::Unknown);
    }

    #[test]
    fn catalog_import_creates_records_and_reruns_idempotently() {
        let connection = open_test_connection("sync-import.sqlite");

        let catalog = vec![
            json!({"vehicleId": 101, "name": "KamAZ 43118", "plateNumber": "A123BC",
                   "latitude": 55.75, "longitude": 37.61,
                   "lastPositionTime": "2026-03-01T11:30:00Z"}),
            json!({"vehicleId": 102}),
        ];

        let tracker = FakeTracker {
            catalog: catalog.clone(),
            ..FakeTracker::default()
        };
        let mut engine = engine_with(tracker, connection, SyncOptions::default());

        let first = engine.import_catalog().expect("import should succeed");
        assert_eq!(first.total, 2);
        assert_eq!(first.created, 2);
        assert_eq!(first.updated, 0);
        assert_eq!(first.batches, 1);

        let after_first = {
            let store = engine.connection.lock().expect("store lock");
            (
                find_by_external_id(&store, "101")
                    .expect("query should succeed")
                    .expect("vehicle should exist"),
                db::count_vehicles(&store).expect("count should succeed"),
            )
        };
        assert_eq!(after_first.0.name.as_deref(), Some("KamAZ 43118"));
        assert_eq!(after_first.0.gps_status, GpsStatus::Online);
        assert_eq!(after_first.1, 2);

        let second = engine.import_catalog().expect("re-import should succeed");
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);

        let store = engine.connection.lock().expect("store lock");
        assert_eq!(db::count_vehicles(&store).expect("count should succeed"), 2);
        let rerun = find_by_external_id(&store, "101")
            .expect("query should succeed")
            .expect("vehicle should exist");
        // Same upstream data and a fixed clock: the rerun changes nothing
        // except the internal id it was read back with.
        assert_eq!(rerun.name, after_first.0.name);
        assert_eq!(rerun.latitude, after_first.0.latitude);
        assert_eq!(rerun.last_position_time, after_first.0.last_position_time);
        assert_eq!(rerun.gps_status, after_first.0.gps_status);
        assert_eq!(rerun.status_checked_at, after_first.0.status_checked_at);
        assert_eq!(rerun.updated_at, after_first.0.updated_at);
    }

    #[test]
    fn catalog_import_keeps_raw_payload_and_classifies_bare_entries() {
        let connection = open_test_connection("sync-import-raw.sqlite");

        let tracker = FakeTracker {
            catalog: vec![json!({"vehicleId": 77, "deviceKind": "beacon"})],
            ..FakeTracker::default()
        };
        let mut engine = engine_with(tracker, connection, SyncOptions::default());

        engine.import_catalog().expect("import should succeed");

        let store = engine.connection.lock().expect("store lock");
        let record = find_by_external_id(&store, "77")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(record.gps_status, GpsStatus::Unknown);
        assert_eq!(record.connection_status, ConnectionStatus::NoData);
        assert_eq!(record.status_checked_at.as_deref(), Some(now_string()));

        let raw: Value = serde_json::from_str(
            record
                .additional_data
                .as_deref()
                .expect("raw payload should be stored"),
        )
        .expect("raw payload should stay valid json");
        assert_eq!(raw["deviceKind"], "beacon");
    }

    #[test]
    fn catalog_import_skips_entries_without_an_id() {
        let connection = open_test_connection("sync-import-skip.sqlite");

        let tracker = FakeTracker {
            catalog: vec![
                json!({"model": "unmarked"}),
                json!({"vehicleId": 5}),
            ],
            ..FakeTracker::default()
        };
        let mut engine = engine_with(tracker, connection, SyncOptions::default());

        let report = engine.import_catalog().expect("import should succeed");

        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 1);
    }

    #[test]
    fn single_refresh_updates_the_named_record() {
        let connection = open_test_connection("sync-one.sqlite");
        insert_vehicle(&connection, &sighted("482913")).expect("insert should succeed");

        let mut vehicles = HashMap::new();
        vehicles.insert(
            "482913".to_string(),
            json!({"vehicleId": 482913, "latitude": 59.93, "longitude": 30.33,
                   "recordTime": "2026-03-01T11:58:00Z"}),
        );
        let tracker = FakeTracker {
            vehicles,
            ..FakeTracker::default()
        };
        let mut engine = engine_with(tracker, connection, SyncOptions::default());

        let refreshed = engine.sync_one("482913").expect("refresh should succeed");
        assert!(refreshed);

        let store = engine.connection.lock().expect("store lock");
        let record = find_by_external_id(&store, "482913")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(record.gps_status, GpsStatus::Online);
        assert_eq!(record.latitude, Some(59.93));
    }

    #[test]
    fn single_refresh_marks_no_data_when_upstream_has_nothing() {
        let connection = open_test_connection("sync-one-nodata.sqlite");

        let mut record = sighted("482913");
        record.latitude = Some(1.0);
        insert_vehicle(&connection, &record).expect("insert should succeed");

        let mut engine = engine_with(
            FakeTracker::default(),
            connection,
            SyncOptions::default(),
        );

        let refreshed = engine.sync_one("482913").expect("refresh should succeed");
        assert!(refreshed);

        let store = engine.connection.lock().expect("store lock");
        let reloaded = find_by_external_id(&store, "482913")
            .expect("query should succeed")
            .expect("vehicle should exist");
        assert_eq!(reloaded.gps_status, GpsStatus::NoData);
        assert_eq!(reloaded.latitude, Some(1.0));
    }

    #[test]
    fn single_refresh_of_unknown_record_is_a_soft_skip() {
        let connection = open_test_connection("sync-one-missing.sqlite");

        let mut engine = engine_with(
            FakeTracker::default(),
            connection,
            SyncOptions::default(),
        );

        let refreshed = engine.sync_one("absent").expect("refresh should not fail");
        assert!(!refreshed);
    }
}
