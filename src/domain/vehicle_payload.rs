use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

// The upstream API is inconsistent about field casing across endpoints and
// versions. Every logical field resolves through an ordered candidate list,
// lower-camel spelling first, with a normalized-key fallback for anything
// else the API invents.
const EXTERNAL_ID_KEYS: &[&str] = &["vehicleId", "Id", "VehicleId", "vehicleGuid"];
const NAME_KEYS: &[&str] = &["name", "Name"];
const PLATE_NUMBER_KEYS: &[&str] = &["plateNumber", "PlateNumber"];
const LATITUDE_KEYS: &[&str] = &["latitude", "Latitude"];
const LONGITUDE_KEYS: &[&str] = &["longitude", "Longitude"];
const SPEED_KEYS: &[&str] = &["speed", "Speed"];
const COURSE_KEYS: &[&str] = &["course", "Course"];
const RECORD_TIME_KEYS: &[&str] = &["recordTime", "RecordTime"];
const LAST_POSITION_TIME_KEYS: &[&str] = &["lastPositionTime", "LastPositionTime"];

/// Telemetry fields extracted from one bulk-fetch (`getlastdata`) reply row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub record_time: Option<DateTime<Utc>>,
    has_position_field: bool,
}

impl TelemetryUpdate {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let record_time_raw = find_value(payload, RECORD_TIME_KEYS);
        let has_position_field = find_value(payload, LATITUDE_KEYS).is_some()
            || find_value(payload, LONGITUDE_KEYS).is_some()
            || record_time_raw.is_some();

        Self {
            latitude: find_number(payload, LATITUDE_KEYS),
            longitude: find_number(payload, LONGITUDE_KEYS),
            speed: find_number(payload, SPEED_KEYS),
            course: find_number(payload, COURSE_KEYS),
            record_time: record_time_raw.and_then(parse_timestamp_value),
            has_position_field,
        }
    }

    /// Whether the reply carried any of latitude, longitude or a sample
    /// timestamp. A row without all three classifies the vehicle as
    /// `no_data` rather than updating it.
    pub fn has_position(&self) -> bool {
        self.has_position_field
    }
}

/// Fields extracted from one catalog (`/vehicles/find`) listing entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogFields {
    pub name: Option<String>,
    pub plate_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub last_position_time: Option<DateTime<Utc>>,
}

impl CatalogFields {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self {
            name: find_string(payload, NAME_KEYS),
            plate_number: find_string(payload, PLATE_NUMBER_KEYS),
            latitude: find_number(payload, LATITUDE_KEYS),
            longitude: find_number(payload, LONGITUDE_KEYS),
            speed: find_number(payload, SPEED_KEYS),
            course: find_number(payload, COURSE_KEYS),
            last_position_time: find_value(payload, LAST_POSITION_TIME_KEYS)
                .and_then(parse_timestamp_value),
        }
    }
}

/// The upstream id in its local string form, from whichever spelling the
/// endpoint used. Numeric ids are rendered without decoration.
pub fn extract_external_id(payload: &Map<String, Value>) -> Option<String> {
    find_value(payload, EXTERNAL_ID_KEYS).and_then(|value| match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn find_string(object: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    find_value(object, aliases).and_then(|value| match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    })
}

fn find_number(object: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    find_value(object, aliases).and_then(parse_f64)
}

fn find_value<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        if let Some(value) = object.get(*alias)
            && !value.is_null()
        {
            return Some(value);
        }
    }

    let normalized_aliases: Vec<String> =
        aliases.iter().map(|alias| normalize_key(alias)).collect();

    object.iter().find_map(|(key, value)| {
        if value.is_null() {
            return None;
        }
        let normalized_key = normalize_key(key);
        if normalized_aliases
            .iter()
            .any(|alias| alias == &normalized_key)
        {
            Some(value)
        } else {
            None
        }
    })
}

fn normalize_key(value: &str) -> String {
    value
        .chars()
        .filter(|char| char.is_ascii_alphanumeric())
        .flat_map(|char| char.to_lowercase())
        .collect()
}

fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?.trim();
    if text.is_empty() {
        return None;
    }

    let parsed = parse_timestamp(text);
    if parsed.is_none() {
        tracing::warn!(raw = text, "failed to parse upstream timestamp");
    }
    parsed
}

/// RFC 3339 first, then the naive forms the API has been seen emitting.
/// Naive timestamps are taken as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];

    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|naive| naive.and_utc())
    })
}
