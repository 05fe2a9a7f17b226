//! Immutable process configuration, resolved once at startup.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};
use url::Url;

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::mime::MimeTable;
use crate::routes::RouteRules;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ASSET_ROOT: &str = "build/web";
pub const DEFAULT_UPSTREAM: &str = "127.0.0.1:8002";

/// Canonical public origin, `scheme://host[:port]` with no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOrigin(String);

impl ExternalOrigin {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingExternalOrigin);
        }
        let invalid = |reason: &str| ConfigError::InvalidExternalOrigin {
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("must not contain a path, query or fragment"));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("must not contain credentials"));
        }

        Ok(Self(url.origin().ascii_serialization()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The admin backend. Fixed at startup, never health-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Lowercase host; IPv6 literals keep their brackets.
    host: String,
    port: u16,
}

impl UpstreamTarget {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, used as the outbound `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.authority())
    }
}

impl From<SocketAddr> for UpstreamTarget {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
        };
        Self {
            host,
            port: addr.port(),
        }
    }
}

impl FromStr for UpstreamTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidUpstream {
            value: s.to_string(),
        };
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("http://").unwrap_or(trimmed);
        let trimmed = trimmed.trim_end_matches('/');

        let (host, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if host.is_empty() || host.contains('/') || port == 0 {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
        })
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a request handler may read. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub asset_root: PathBuf,
    pub external_origin: ExternalOrigin,
    pub upstream: UpstreamTarget,
    pub routes: RouteRules,
    pub mime_types: MimeTable,
    pub upstream_connect_timeout: Duration,
    pub upstream_response_timeout: Duration,
}

impl Config {
    /// Builds a configuration with default routes, MIME table and timeouts.
    pub fn new(
        asset_root: PathBuf,
        external_origin: ExternalOrigin,
        upstream: UpstreamTarget,
    ) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            asset_root,
            external_origin,
            upstream,
            routes: RouteRules::default(),
            mime_types: MimeTable::default(),
            upstream_connect_timeout: Duration::from_secs(5),
            upstream_response_timeout: Duration::from_secs(60),
        }
    }

    /// Resolves CLI flags, then environment variables, then defaults.
    ///
    /// `env` is a lookup function so callers can supply something other than
    /// the process environment.
    pub fn from_sources<F>(cli: Cli, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match (cli.port, env("PORT")) {
            (Some(port), _) => port,
            (None, Some(raw)) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort { value: raw.clone() })?,
            (None, None) => DEFAULT_PORT,
        };

        let asset_root = cli
            .asset_root
            .or_else(|| env("ASSET_ROOT").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_ROOT));

        let origin = cli
            .external_origin
            .or_else(|| env("EXTERNAL_ORIGIN"))
            .or_else(|| env("APP_URL"))
            .ok_or(ConfigError::MissingExternalOrigin)?;
        let external_origin = ExternalOrigin::parse(&origin)?;

        let upstream = cli
            .upstream
            .or_else(|| env("UPSTREAM_ADDR"))
            .unwrap_or_else(|| DEFAULT_UPSTREAM.to_string())
            .parse::<UpstreamTarget>()?;

        let mut mime_types = MimeTable::default();
        for raw in &cli.mime_types {
            let (ext, ty) = raw
                .split_once('=')
                .filter(|(ext, ty)| {
                    !ext.trim().trim_start_matches('.').is_empty() && !ty.trim().is_empty()
                })
                .ok_or_else(|| ConfigError::InvalidMimeOverride { value: raw.clone() })?;
            mime_types.insert(ext.trim(), ty.trim());
        }

        Ok(Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            asset_root,
            external_origin,
            upstream,
            routes: RouteRules::default(),
            mime_types,
            upstream_connect_timeout: Duration::from_secs(cli.connect_timeout_secs),
            upstream_response_timeout: Duration::from_secs(cli.response_timeout_secs),
        })
    }
}
