//! Remote Index Client
//!
//! Triggers and awaits a library scan on a Subsonic-compatible media server
//! (Navidrome, Airsonic). Requests use token authentication: every call
//! carries a fresh random salt and `t = md5(password + salt)`.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use core_runtime::logging::redact_if_sensitive;
use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Subsonic REST protocol version sent by default.
pub const DEFAULT_API_VERSION: &str = "1.16.1";

/// Client id sent by default.
pub const DEFAULT_CLIENT_ID: &str = "tracksync";

const SALT_LENGTH: usize = 12;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// State of a server-side scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatus {
    pub scanning: bool,
    /// Items indexed so far, when the server reports it
    pub count: Option<u64>,
}

/// A media server whose catalog must be refreshed after a transfer.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    /// Asks the server to start scanning.
    ///
    /// # Errors
    ///
    /// `RemoteIndex` when the server does not answer `ok`.
    async fn start_scan(&self, full_scan: bool) -> Result<()>;

    /// Current scan state; `None` when the response cannot be read.
    async fn poll_scan_status(&self) -> Result<Option<ScanStatus>>;
}

// ============================================================================
// Response model
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "subsonic-response")]
    response: SubsonicResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubsonicResponse {
    status: String,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    scan_status: Option<ScanStatusBody>,
}

impl SubsonicResponse {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i32,
    #[serde(default)]
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Deserialize)]
struct ScanStatusBody {
    #[serde(deserialize_with = "bool_like")]
    scanning: bool,
    #[serde(default)]
    count: Option<u64>,
}

/// Accepts `true` as well as `"true"`; some servers quote booleans.
fn bool_like<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolLike {
        Bool(bool),
        Text(String),
    }

    match BoolLike::deserialize(deserializer)? {
        BoolLike::Bool(b) => Ok(b),
        BoolLike::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, found '{}'",
                other
            ))),
        },
    }
}

// ============================================================================
// Subsonic client
// ============================================================================

pub struct SubsonicClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    username: String,
    password: String,
    client_id: String,
    api_version: String,
}

impl SubsonicClient {
    /// `base_url` is the REST root, e.g. `https://music.example/rest`.
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Builds the authenticated URL for `endpoint` with the given salt.
    pub fn endpoint_url(&self, endpoint: &str, salt: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}/{}.view", self.base_url.trim_end_matches('/'), endpoint);
        let token = auth_token(&self.password, salt);

        let mut url = Url::parse(&raw)
            .map_err(|e| SyncError::RemoteIndex(format!("invalid url '{}': {}", raw, e)))?;
        url.query_pairs_mut()
            .append_pair("u", &self.username)
            .append_pair("t", &token)
            .append_pair("s", salt)
            .append_pair("v", &self.api_version)
            .append_pair("c", &self.client_id)
            .append_pair("f", "json")
            .extend_pairs(params.iter().copied());
        Ok(url)
    }

    async fn call(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<HttpResponse> {
        let salt = new_salt();
        let url = self.endpoint_url(endpoint, &salt, params)?;
        debug!(url = %redacted(&url), "Sending request");

        let request = HttpRequest::get(url.as_str())
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT);
        Ok(self.http.execute(request).await?)
    }

    /// Reads the response envelope; `None` when it is not a Subsonic reply.
    fn parse(endpoint: &str, response: &HttpResponse) -> Option<SubsonicResponse> {
        if !response.is_success() {
            warn!(endpoint, status = response.status, "Unexpected HTTP status");
            return None;
        }

        match response.json::<Envelope>() {
            Ok(envelope) => Some(envelope.response),
            Err(e) => {
                warn!(endpoint, error = %e, "Unreadable response");
                None
            }
        }
    }

    fn require_ok(endpoint: &str, response: &HttpResponse) -> Result<()> {
        let parsed = Self::parse(endpoint, response).ok_or_else(|| {
            SyncError::RemoteIndex(format!(
                "{} returned an unreadable response (HTTP {})",
                endpoint, response.status
            ))
        })?;

        if parsed.is_ok() {
            return Ok(());
        }
        let detail = parsed
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("status '{}'", parsed.status));
        Err(SyncError::RemoteIndex(format!("{} failed: {}", endpoint, detail)))
    }

    /// Checks connectivity and credentials.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn ping(&self) -> Result<()> {
        let response = self.call("ping", &[]).await?;
        Self::require_ok("ping", &response)?;
        info!("Media server answered ping");
        Ok(())
    }
}

#[async_trait]
impl RemoteIndex for SubsonicClient {
    #[instrument(skip(self))]
    async fn start_scan(&self, full_scan: bool) -> Result<()> {
        let full = if full_scan { "true" } else { "false" };
        let response = self.call("startScan", &[("fullScan", full)]).await?;
        Self::require_ok("startScan", &response)?;
        info!("Remote scan started");
        Ok(())
    }

    async fn poll_scan_status(&self) -> Result<Option<ScanStatus>> {
        let response = self.call("getScanStatus", &[]).await?;
        let status = Self::parse("getScanStatus", &response)
            .filter(SubsonicResponse::is_ok)
            .and_then(|r| r.scan_status)
            .map(|body| ScanStatus {
                scanning: body.scanning,
                count: body.count,
            });
        Ok(status)
    }
}

impl fmt::Debug for SubsonicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsonicClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &redact_if_sensitive("password", &self.password))
            .field("client_id", &self.client_id)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// `md5(password + salt)` as lowercase hex.
pub fn auth_token(password: &str, salt: &str) -> String {
    let digest = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(salt.as_bytes())
        .finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn new_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect()
}

/// URL with auth parameters masked, for logging.
fn redacted(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = match k.as_ref() {
                "t" => redact_if_sensitive("token", &v),
                "s" => redact_if_sensitive("salt", &v),
                _ => v.into_owned(),
            };
            (k.into_owned(), value)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

// ============================================================================
// Polling
// ============================================================================

/// Summary of a finished scan wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub polls: u32,
    pub count: Option<u64>,
}

/// Polls until the server reports it stopped scanning.
///
/// Sleeps `interval` between polls. With `max_wait` set, gives up once that
/// much time has passed; without it, waits as long as the server scans.
///
/// # Errors
///
/// `RemoteIndex` when a status response cannot be read, `ScanTimeout` when
/// `max_wait` elapses.
pub async fn wait_for_scan(
    index: &dyn RemoteIndex,
    interval: Duration,
    max_wait: Option<Duration>,
) -> Result<ScanOutcome> {
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        polls += 1;
        let status = index
            .poll_scan_status()
            .await?
            .ok_or_else(|| SyncError::RemoteIndex("unable to get scan status".to_string()))?;

        if !status.scanning {
            info!(polls, count = ?status.count, "Remote scan complete");
            return Ok(ScanOutcome {
                polls,
                count: status.count,
            });
        }

        if let Some(limit) = max_wait {
            if started.elapsed() >= limit {
                return Err(SyncError::ScanTimeout {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
        }

        debug!(count = ?status.count, "Remote scan in progress, waiting");
        tokio::time::sleep(interval).await;
    }
}
