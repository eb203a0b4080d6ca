//! Target and check result types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use url::{Position, Url};

/// Counter label used for checks that produced no HTTP status.
pub const ERROR_LABEL: &str = "error";

/// A configured endpoint, classified by URL scheme.
///
/// `host` and `path` are derived once at construction and reused for
/// every result and metric label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    raw: String,
    url: Option<Url>,
    host: String,
    path: String,
}

impl Target {
    /// Parse a target. Never fails: an unparseable URL keeps the raw string
    /// as its host and is rejected when it is checked.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match Url::parse(&raw) {
            Ok(url) => {
                let authority = raw_authority(&raw)
                    .unwrap_or(&url[Position::BeforeHost..Position::AfterPort]);
                let host = format!("{}://{}", url.scheme(), authority);
                let mut path = if url.path().is_empty() {
                    "/".to_string()
                } else {
                    url.path().to_string()
                };
                if let Some(query) = url.query().filter(|q| !q.is_empty()) {
                    path.push('?');
                    path.push_str(query);
                }
                Self {
                    raw,
                    url: Some(url),
                    host,
                    path,
                }
            }
            Err(_) => Self {
                host: raw.clone(),
                raw,
                url: None,
                path: "/".to_string(),
            },
        }
    }

    /// The target exactly as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed URL, if the target is a valid URL.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// URL scheme, empty for an unparseable target.
    pub fn scheme(&self) -> &str {
        self.url.as_ref().map(Url::scheme).unwrap_or_default()
    }

    /// Scheme plus authority, e.g. `https://example.com:8443`.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path plus query string, defaulting to `/`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Authority as written, without userinfo. `Url` lowercases the host and
/// drops a default port, which would change the `host` label.
fn raw_authority(raw: &str) -> Option<&str> {
    let (_, rest) = raw.trim().split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    (!authority.is_empty()).then_some(authority)
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Why a single check attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// DNS, connect, TLS, timeout or redirect-limit failure
    #[error("network error: {0}")]
    Network(String),

    /// No checker is registered for the scheme
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The target is not a valid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Raw-connect scheme with neither an explicit nor a default port
    #[error("no default port for scheme: {0}")]
    MissingPort(String),
}

impl CheckError {
    /// Only connection-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckError::Network(_))
    }
}

/// Net outcome of checking one target in one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub url: String,
    pub host: String,
    pub path: String,
    /// HTTP status (200 for raw connects), 0 when nothing answered
    pub status_code: u16,
    /// Elapsed time of the final attempt, zero on failure
    pub response_time: Duration,
    pub error: Option<CheckError>,
    /// When the check completed
    pub timestamp: SystemTime,
}

impl CheckResult {
    /// Build a successful result.
    pub fn success(target: &Target, status_code: u16, response_time: Duration) -> Self {
        Self {
            url: target.as_str().to_string(),
            host: target.host().to_string(),
            path: target.path().to_string(),
            status_code,
            response_time,
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    /// Build a failed result.
    pub fn failure(target: &Target, error: CheckError) -> Self {
        Self {
            url: target.as_str().to_string(),
            host: target.host().to_string(),
            path: target.path().to_string(),
            status_code: 0,
            response_time: Duration::ZERO,
            error: Some(error),
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Answered without error with a 2xx status.
    pub fn is_up(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status_code)
    }

    /// Counter label: the status code, or `error` when the check failed.
    pub fn status_label(&self) -> String {
        if self.error.is_some() {
            ERROR_LABEL.to_string()
        } else {
            self.status_code.to_string()
        }
    }
}

/// Check scheduling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Interval between ticks
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Bound on every network attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Additional attempts after a connection-level failure
    pub retries: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            retries: 3,
        }
    }
}
