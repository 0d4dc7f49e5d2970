/// GPS classification derived from the freshness of the last known position.
///
/// `NoData` is set by the synchronizer when the upstream API answered but
/// carried no position fields; `Unknown` means no position was ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsStatus {
    Online,
    Offline,
    NoData,
    Unknown,
}

impl GpsStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::NoData => "no_data",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse for values read back from the store; anything
    /// unrecognized collapses to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "online" => Self::Online,
            "offline" => Self::Offline,
            "no_data" => Self::NoData,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    NoData,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::NoData => "no_data",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            _ => Self::NoData,
        }
    }
}

/// A vehicle as held by the record store. Timestamps are RFC 3339 strings
/// (millisecond precision, Z suffix); telemetry fields hold last-known values
/// overwritten in place.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRecord {
    pub id: i64,
    pub external_id: String,
    pub name: Option<String>,
    pub plate_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub last_position_time: Option<String>,
    pub gps_status: GpsStatus,
    pub connection_status: ConnectionStatus,
    pub status_checked_at: Option<String>,
    pub additional_data: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewVehicleRecord {
    pub external_id: String,
    pub name: Option<String>,
    pub plate_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub last_position_time: Option<String>,
    pub gps_status: GpsStatus,
    pub connection_status: ConnectionStatus,
    pub status_checked_at: Option<String>,
    pub additional_data: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NewVehicleRecord {
    /// A freshly sighted vehicle before any telemetry has been applied.
    pub fn sighted(external_id: String, now: String) -> Self {
        Self {
            external_id,
            name: None,
            plate_number: None,
            latitude: None,
            longitude: None,
            speed: None,
            course: None,
            last_position_time: None,
            gps_status: GpsStatus::Unknown,
            connection_status: ConnectionStatus::NoData,
            status_checked_at: None,
            additional_data: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}
