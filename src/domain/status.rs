use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::domain::models::{ConnectionStatus, GpsStatus, VehicleRecord};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Canonical timestamp form used everywhere at rest.
pub fn to_rfc3339_millis(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Classify connectivity from the age of the most recent position sample.
///
/// A sample exactly at the threshold still counts as online. The `no_data`
/// classification (upstream reachable, but no telemetry in the reply) is
/// assigned by the synchronizer, never here.
pub fn derive(
    last_position_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    offline_threshold: Duration,
) -> (GpsStatus, ConnectionStatus) {
    match last_position_time {
        None => (GpsStatus::Unknown, ConnectionStatus::NoData),
        Some(sampled_at) if now - sampled_at <= offline_threshold => {
            (GpsStatus::Online, ConnectionStatus::Connected)
        }
        Some(_) => (GpsStatus::Offline, ConnectionStatus::Disconnected),
    }
}

/// Re-derive a record's status from its stored `last_position_time` and stamp
/// `status_checked_at`. The stamp happens even when the classification is
/// unchanged; callers track synchronization recency through it.
pub fn apply_status(record: &mut VehicleRecord, now: DateTime<Utc>, offline_threshold: Duration) {
    let last_position_time = record
        .last_position_time
        .as_deref()
        .and_then(parse_rfc3339);

    let (gps_status, connection_status) = derive(last_position_time, now, offline_threshold);
    record.gps_status = gps_status;
    record.connection_status = connection_status;
    record.status_checked_at = Some(to_rfc3339_millis(now));
}
