use crate::app::AppError;
use crate::app::sync::SyncOptions;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub api_login: String,
    pub api_password: String,
    pub db_path: String,
    pub http_bind: String,
    pub status_batch_size: u32,
    pub import_batch_size: u32,
    pub offline_threshold_hours: i64,
    pub sync_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_url: required(&lookup, "TRACKER_API_URL")?,
            api_login: required(&lookup, "TRACKER_API_LOGIN")?,
            api_password: required(&lookup, "TRACKER_API_PASSWORD")?,
            db_path: lookup("DB_PATH")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "./data/fleet.db".to_string()),
            http_bind: lookup("HTTP_BIND")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            status_batch_size: parse_or_default(&lookup, "STATUS_BATCH_SIZE", 25_u32)?,
            import_batch_size: parse_or_default(&lookup, "IMPORT_BATCH_SIZE", 100_u32)?,
            offline_threshold_hours: parse_or_default(&lookup, "OFFLINE_THRESHOLD_HOURS", 2_i64)?,
            sync_interval_secs: parse_or_default(&lookup, "SYNC_INTERVAL_SECS", 300_u64)?,
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            status_batch_size: self.status_batch_size,
            import_batch_size: self.import_batch_size,
            offline_threshold_hours: self.offline_threshold_hours,
        }
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::config(format!("{key} is required")))
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    fn minimal_lookup(key: &str) -> Option<String> {
        match key {
            "TRACKER_API_URL" => Some("https://tracker.example.com".to_string()),
            "TRACKER_API_LOGIN" => Some("fleet_user".to_string()),
            "TRACKER_API_PASSWORD" => Some("secret".to_string()),
            _ => None,
        }
    }

    #[test]
    fn rejects_missing_api_url() {
        let result = AppConfig::from_lookup(|_| None);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: TRACKER_API_URL is required"
        );
    }

    #[test]
    fn rejects_missing_credentials() {
        let result = AppConfig::from_lookup(|key| match key {
            "TRACKER_API_URL" => Some("https://tracker.example.com".to_string()),
            _ => None,
        });

        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: TRACKER_API_LOGIN is required"
        );
    }

    #[test]
    fn applies_defaults_for_optional_fields() {
        let config = AppConfig::from_lookup(minimal_lookup).expect("config should be valid");

        assert_eq!(config.api_url, "https://tracker.example.com");
        assert_eq!(config.db_path, "./data/fleet.db");
        assert_eq!(config.http_bind, "0.0.0.0:8080");
        assert_eq!(config.status_batch_size, 25);
        assert_eq!(config.import_batch_size, 100);
        assert_eq!(config.offline_threshold_hours, 2);
        assert_eq!(config.sync_interval_secs, 300);
    }

    #[test]
    fn batch_sizes_are_independent_knobs() {
        let config = AppConfig::from_lookup(|key| match key {
            "STATUS_BATCH_SIZE" => Some("10".to_string()),
            "IMPORT_BATCH_SIZE" => Some("250".to_string()),
            other => minimal_lookup(other),
        })
        .expect("config should be valid");

        let options = config.sync_options();
        assert_eq!(options.status_batch_size, 10);
        assert_eq!(options.import_batch_size, 250);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let result = AppConfig::from_lookup(|key| match key {
            "OFFLINE_THRESHOLD_HOURS" => Some("soon".to_string()),
            other => minimal_lookup(other),
        });

        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: OFFLINE_THRESHOLD_HOURS must be a valid number"
        );
    }
}
