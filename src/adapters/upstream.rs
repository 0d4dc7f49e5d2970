use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::blocking::Client as HttpClient;
use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::status::Clock;

/// The upstream account has a per-account request-rate ceiling; anything
/// faster draws throttling errors for the rest of the run.
pub const MIN_REQUEST_INTERVAL_MS: i64 = 1_000;

const API_PREFIX: &str = "/api/v3";
const AUTH_HEADER: &str = "X-Auth";
const HTTP_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("transport error during api request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api request failed with status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to decode api response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Seam between the synchronizer and the upstream API. The concrete client
/// owns mutable pacing and auth state, so every method takes `&mut self`;
/// concurrency is obtained by instantiating more clients, never by sharing
/// one.
pub trait TrackerApi: Send + 'static {
    fn ensure_authenticated(&mut self) -> Result<(), UpstreamError>;
    /// Full catalog listing (`POST /vehicles/find`).
    fn fetch_catalog(&mut self) -> Result<Vec<Value>, UpstreamError>;
    /// Single record (`GET /vehicles/{id}`); 404 is `None`, not an error.
    fn fetch_vehicle(&mut self, external_id: &str) -> Result<Option<Value>, UpstreamError>;
    /// Bulk telemetry (`POST /vehicles/getlastdata`). Ids missing from the
    /// reply are simply omitted; callers must treat that as "no data".
    fn fetch_last_data(&mut self, external_ids: &[String]) -> Result<Vec<Value>, UpstreamError>;
    fn logout(&mut self);
}

/// Start-to-start pacing state. The baseline moves on every call attempt,
/// successful or not: a failed call still consumed upstream rate budget.
#[derive(Debug, Clone)]
pub struct RequestPacer {
    min_interval_ms: i64,
    last_request_at: Option<DateTime<Utc>>,
}

impl RequestPacer {
    pub fn new(min_interval_ms: i64) -> Self {
        Self {
            min_interval_ms,
            last_request_at: None,
        }
    }

    /// How long the caller must still wait before starting the next call.
    pub fn wait_before(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_request_at?;
        let elapsed_ms = (now - last).num_milliseconds();
        let remaining_ms = self.min_interval_ms - elapsed_ms;

        u64::try_from(remaining_ms)
            .ok()
            .filter(|remaining| *remaining > 0)
            .map(Duration::from_millis)
    }

    pub fn mark(&mut self, started_at: DateTime<Utc>) {
        self.last_request_at = Some(started_at);
    }
}

pub struct TrackerApiClient<C: Clock> {
    http: HttpClient,
    clock: C,
    base_url: String,
    login: String,
    password: String,
    auth_token: Option<String>,
    pacer: RequestPacer,
}

impl<C: Clock> TrackerApiClient<C> {
    pub fn new(
        base_url: &str,
        login: &str,
        password: &str,
        clock: C,
    ) -> Result<Self, UpstreamError> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            http,
            clock,
            base_url: base_url.trim_end_matches('/').to_string(),
            login: login.to_string(),
            password: password.to_string(),
            auth_token: None,
            pacer: RequestPacer::new(MIN_REQUEST_INTERVAL_MS),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_min_interval_ms(mut self, min_interval_ms: i64) -> Self {
        self.pacer = RequestPacer::new(min_interval_ms);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    /// Obtain a session token. On failure any previously held token is left
    /// untouched. The login call itself goes through the paced request path,
    /// so it also moves the pacing baseline.
    pub fn authenticate(&mut self) -> Result<(), UpstreamError> {
        let reply = self.request(
            Method::POST,
            "/auth/login",
            Some(json!({ "Login": self.login, "Password": self.password })),
            false,
        )?;

        match reply.get("AuthId").and_then(Value::as_str) {
            Some(token) => {
                self.auth_token = Some(token.to_string());
                tracing::info!("authenticated to tracker api");
                Ok(())
            }
            None => Err(UpstreamError::AuthFailed(
                "no AuthId in login reply".to_string(),
            )),
        }
    }

    /// The single choke point for upstream traffic: pacing, token header,
    /// status handling.
    fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Value>,
        with_token: bool,
    ) -> Result<Value, UpstreamError> {
        self.pace();

        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        let mut builder = self.http.request(method, &url);

        if with_token && let Some(token) = &self.auth_token {
            builder = builder.header(AUTH_HEADER, token);
        }
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response = builder.send()?;
        let status = response.status();
        let text = response.text()?;

        if !status.is_success() {
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(UpstreamError::from)
    }

    fn pace(&mut self) {
        if let Some(wait) = self.pacer.wait_before(self.clock.now()) {
            std::thread::sleep(wait);
        }
        self.pacer.mark(self.clock.now());
    }
}

/// Upstream expects numeric ids where the local string form is numeric;
/// opaque ids pass through verbatim.
fn external_id_to_json(external_id: &str) -> Value {
    match external_id.parse::<i64>() {
        Ok(numeric) => Value::from(numeric),
        Err(_) => Value::from(external_id),
    }
}

impl<C: Clock + Send + 'static> TrackerApi for TrackerApiClient<C> {
    fn ensure_authenticated(&mut self) -> Result<(), UpstreamError> {
        if self.auth_token.is_some() {
            return Ok(());
        }
        self.authenticate()
    }

    fn fetch_catalog(&mut self) -> Result<Vec<Value>, UpstreamError> {
        let reply = self.request(Method::POST, "/vehicles/find", Some(json!({})), true)?;

        Ok(reply
            .get("Vehicles")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_vehicle(&mut self, external_id: &str) -> Result<Option<Value>, UpstreamError> {
        let path = format!("/vehicles/{external_id}");
        match self.request(Method::GET, &path, None, true) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(UpstreamError::Api { status: 404, .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn fetch_last_data(&mut self, external_ids: &[String]) -> Result<Vec<Value>, UpstreamError> {
        let ids: Vec<Value> = external_ids
            .iter()
            .map(|id| external_id_to_json(id))
            .collect();

        let reply = self.request(
            Method::POST,
            "/vehicles/getlastdata",
            Some(Value::Array(ids)),
            true,
        )?;

        Ok(reply.as_array().cloned().unwrap_or_default())
    }

    fn logout(&mut self) {
        if self.auth_token.is_none() {
            return;
        }

        match self.request(Method::POST, "/auth/logout", None, true) {
            Ok(_) => tracing::info!("logged out from tracker api"),
            Err(error) => tracing::warn!(error = %error, "logout failed"),
        }
        self.auth_token = None;
    }
}
