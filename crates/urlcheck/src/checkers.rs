//! Protocol checker implementations and the scheme lookup table.

use crate::types::{CheckError, Target};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use url::Host;

/// User agent sent with every HTTP probe.
pub const USER_AGENT: &str = "url-exporter/1.0";

/// Maximum number of redirects followed before the probe fails.
pub const MAX_REDIRECTS: usize = 10;

/// Well-known ports for raw-connect schemes.
pub const DEFAULT_PORTS: &[(&str, u16)] = &[
    ("ftp", 21),
    ("sftp", 22),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("mysql", 3306),
    ("postgres", 5432),
    ("postgresql", 5432),
    ("redis", 6379),
    ("mongodb", 27017),
];

/// Schemes routed to [`TcpChecker`] by [`CheckerRegistry::with_defaults`].
/// `tcp` has no default port and requires an explicit one.
pub const RAW_CONNECT_SCHEMES: &[&str] = &[
    "ftp",
    "sftp",
    "ssh",
    "telnet",
    "smtp",
    "mysql",
    "postgres",
    "postgresql",
    "redis",
    "mongodb",
    "tcp",
];

/// Default port for a raw-connect scheme.
pub fn default_port(scheme: &str) -> Option<u16> {
    DEFAULT_PORTS
        .iter()
        .find(|(name, _)| *name == scheme)
        .map(|(_, port)| *port)
}

/// A probe strategy for one protocol family.
///
/// Implementations perform exactly one attempt; retrying is the
/// orchestrator's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProtocolChecker: Send + Sync {
    /// Probe `target`, returning the status code it answered with.
    async fn check(&self, target: &Target, timeout: Duration) -> Result<u16, CheckError>;

    /// Get the name of this checker
    fn name(&self) -> &'static str;
}

/// Header-only HTTP(S) checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    /// Create a new HTTP checker
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ProtocolChecker for HttpChecker {
    async fn check(&self, target: &Target, timeout_duration: Duration) -> Result<u16, CheckError> {
        let url = target
            .url()
            .ok_or_else(|| CheckError::InvalidUrl(target.to_string()))?;

        let request = self.client.head(url.clone()).timeout(timeout_duration);

        match timeout(timeout_duration, request.send()).await {
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                debug!(url = %target, status, "HTTP probe answered");
                Ok(status)
            }
            Ok(Err(e)) => Err(CheckError::Network(format!("request failed: {}", e))),
            Err(_) => Err(CheckError::Network(format!(
                "request timed out after {:?}",
                timeout_duration
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Raw TCP connect checker for non-HTTP schemes
///
/// Only the TCP handshake is performed; the application protocol is never
/// spoken, so any accepted connection counts as status 200.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpChecker;

impl TcpChecker {
    /// Create a new TCP checker
    pub fn new() -> Self {
        Self
    }

    /// Resolve the host and port to connect to.
    pub fn address(target: &Target) -> Result<(String, u16), CheckError> {
        let url = target
            .url()
            .ok_or_else(|| CheckError::InvalidUrl(target.to_string()))?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(CheckError::InvalidUrl(format!("{}: missing host", target))),
        };

        let port = url
            .port()
            .or_else(|| default_port(url.scheme()))
            .ok_or_else(|| CheckError::MissingPort(url.scheme().to_string()))?;

        Ok((host, port))
    }
}

#[async_trait]
impl ProtocolChecker for TcpChecker {
    async fn check(&self, target: &Target, timeout_duration: Duration) -> Result<u16, CheckError> {
        let (host, port) = Self::address(target)?;

        match timeout(timeout_duration, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_stream)) => {
                debug!(url = %target, host = %host, port, "TCP connect succeeded");
                Ok(200)
            }
            Ok(Err(e)) => Err(CheckError::Network(format!(
                "connection failed to {}:{}: {}",
                host, port, e
            ))),
            Err(_) => Err(CheckError::Network(format!(
                "connection failed to {}:{}: timed out after {:?}",
                host, port, timeout_duration
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Scheme to checker lookup table
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: HashMap<String, Arc<dyn ProtocolChecker>>,
}

impl CheckerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP and raw-connect families installed
    pub fn with_defaults() -> Result<Self, reqwest::Error> {
        let mut registry = Self::new();

        let http: Arc<dyn ProtocolChecker> = Arc::new(HttpChecker::new()?);
        registry.register("http", http.clone());
        registry.register("https", http);

        let tcp: Arc<dyn ProtocolChecker> = Arc::new(TcpChecker::new());
        for scheme in RAW_CONNECT_SCHEMES {
            registry.register(*scheme, tcp.clone());
        }

        Ok(registry)
    }

    /// Route `scheme` to `checker`, replacing any previous entry.
    pub fn register(&mut self, scheme: impl Into<String>, checker: Arc<dyn ProtocolChecker>) {
        self.checkers.insert(scheme.into().to_ascii_lowercase(), checker);
    }

    /// Look up the checker for a scheme
    pub fn get(&self, scheme: &str) -> Option<&Arc<dyn ProtocolChecker>> {
        self.checkers.get(scheme)
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.checkers.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Dispatch one attempt to the checker registered for the target's scheme.
    pub async fn check(&self, target: &Target, timeout: Duration) -> Result<u16, CheckError> {
        if target.url().is_none() {
            return Err(CheckError::InvalidUrl(target.to_string()));
        }

        match self.get(target.scheme()) {
            Some(checker) => checker.check(target, timeout).await,
            None => Err(CheckError::UnsupportedProtocol(target.scheme().to_string())),
        }
    }
}

impl std::fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
