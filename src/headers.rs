//! Inbound header sanitizing and outbound `Location` rewriting.

use axum::http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{self, CONNECTION, HOST, LOCATION},
};
use std::net::IpAddr;

use crate::config::{ExternalOrigin, UpstreamTarget};

/// Headers injected by the edge network in front of us. They are large or
/// client-controlled, and the backend has no use for them.
pub const EDGE_HEADERS: &[&str] = &[
    "cf-ray",
    "cf-connecting-ip",
    "cf-connecting-ipv6",
    "cf-ipcountry",
    "cf-visitor",
    "cf-ew-via",
    "cf-worker",
    "cdn-loop",
    "true-client-ip",
];

/// Connection-scoped headers that never cross a proxy hop.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwarded-context headers we always set ourselves.
const FORWARDED_HEADERS: &[&str] = &[
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-for",
    "x-real-ip",
];

/// Inbound header values longer than this are dropped.
pub const MAX_FORWARDED_HEADER_LEN: usize = 8 * 1024;

pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

fn listed(list: &[&str], name: &HeaderName) -> bool {
    list.contains(&name.as_str())
}

/// Header names listed in the `Connection` header, lowercased.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// What the backend needs to reconstruct the original request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// Original `Host`, as the browser sent it.
    pub host: Option<HeaderValue>,
    /// `http` or `https`, as reported by the load balancer.
    pub proto: &'static str,
    /// `X-Forwarded-For` chain received from the load balancer.
    pub forwarded_for: Option<String>,
    pub peer: Option<IpAddr>,
}

impl ClientContext {
    pub fn from_request(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        let trusted = |name: &HeaderName| {
            headers
                .get(name)
                .filter(|v| v.len() <= MAX_FORWARDED_HEADER_LEN)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let proto = match trusted(&X_FORWARDED_PROTO) {
            Some(p) if p.eq_ignore_ascii_case("https") => "https",
            _ => "http",
        };

        Self {
            host: headers
                .get(HOST)
                .filter(|v| v.len() <= MAX_FORWARDED_HEADER_LEN)
                .cloned(),
            proto,
            forwarded_for: trusted(&X_FORWARDED_FOR).map(str::to_string),
            peer,
        }
    }

    /// Existing chain with the peer address appended.
    fn forwarded_for_chain(&self) -> Option<String> {
        match (&self.forwarded_for, self.peer) {
            (Some(chain), Some(ip)) => Some(format!("{chain}, {ip}")),
            (Some(chain), None) => Some(chain.clone()),
            (None, Some(ip)) => Some(ip.to_string()),
            (None, None) => None,
        }
    }
}

/// Builds the header set sent upstream.
///
/// Drops `Host`, hop-by-hop headers (including any named in `Connection`),
/// edge-network headers, client-supplied forwarding headers and oversized
/// values, then sets `Host` to the upstream and the `X-Forwarded-*` family
/// from `client`.
pub fn upstream_request_headers(
    inbound: &HeaderMap,
    upstream: &UpstreamTarget,
    client: &ClientContext,
) -> HeaderMap {
    let named_by_connection = connection_tokens(inbound);
    let mut out = HeaderMap::with_capacity(inbound.len() + 4);

    for (name, value) in inbound {
        if *name == HOST
            || listed(HOP_BY_HOP_HEADERS, name)
            || listed(EDGE_HEADERS, name)
            || listed(FORWARDED_HEADERS, name)
            || named_by_connection.iter().any(|token| token == name.as_str())
        {
            continue;
        }
        if value.len() > MAX_FORWARDED_HEADER_LEN {
            tracing::debug!("dropping oversized header {} ({} bytes)", name.as_str(), value.len());
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if let Ok(host) = HeaderValue::from_str(&upstream.authority()) {
        out.insert(HOST, host);
    }
    if let Some(host) = &client.host {
        out.insert(X_FORWARDED_HOST.clone(), host.clone());
    }
    out.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static(client.proto));
    if let Some(chain) = client.forwarded_for_chain().and_then(|c| HeaderValue::from_str(&c).ok()) {
        out.insert(X_FORWARDED_FOR.clone(), chain);
    }
    if let Some(ip) = client.peer.and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok()) {
        out.insert(X_REAL_IP.clone(), ip);
    }
    out
}

/// Fixes up the upstream response headers before they reach the client.
///
/// Hop-by-hop headers are removed and an internal `Location` is rewritten;
/// everything else, cookies and caching directives included, is untouched.
pub fn rewrite_response_headers(
    headers: &mut HeaderMap,
    upstream: &UpstreamTarget,
    origin: &ExternalOrigin,
) {
    for name in connection_tokens(headers) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.remove(name);
        }
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }

    let rewritten = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| rewrite_location(v, upstream, origin))
        .and_then(|v| HeaderValue::from_str(&v).ok());
    if let Some(location) = rewritten {
        headers.insert(header::LOCATION, location);
    }
}

/// Rewrites `location` when its authority points at the backend's internal
/// address. Returns `None` when the value should be left alone.
///
/// Matches `localhost` on any port and the upstream host on the upstream
/// port. Everything after the authority is kept byte-for-byte.
pub fn rewrite_location(
    location: &str,
    upstream: &UpstreamTarget,
    origin: &ExternalOrigin,
) -> Option<String> {
    let (scheme, authority_start) = if location.starts_with("//") {
        (None, 2)
    } else {
        let sep = location.find("://")?;
        let scheme = &location[..sep];
        let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid {
            return None;
        }
        (Some(scheme), sep + 3)
    };

    let rest = &location[authority_start..];
    let authority_end = rest.find(|c: char| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let (host, port) = split_host_port(host_port)?;

    if !is_internal(host, port, scheme, upstream) {
        return None;
    }
    Some(format!("{}{}", origin.as_str(), &rest[authority_end..]))
}

/// Splits `host[:port]`, keeping brackets on IPv6 literals.
fn split_host_port(host_port: &str) -> Option<(&str, Option<u16>)> {
    let (host, port) = if host_port.starts_with('[') {
        let close = host_port.find(']')?;
        let (host, tail) = host_port.split_at(close + 1);
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':')?)),
        }
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };
    if host.is_empty() {
        return None;
    }
    let port = match port {
        Some("") | None => None,
        Some(p) => Some(p.parse().ok()?),
    };
    Some((host, port))
}

fn is_internal(
    host: &str,
    port: Option<u16>,
    scheme: Option<&str>,
    upstream: &UpstreamTarget,
) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let effective_port = port.unwrap_or(match scheme {
        Some(s) if s.eq_ignore_ascii_case("https") => 443,
        _ => 80,
    });
    effective_port == upstream.port()
        && (host.eq_ignore_ascii_case(upstream.host()) || is_loopback_literal(host))
}

/// `127.0.0.0/8` or `[::1]`, written as an address rather than a name.
fn is_loopback_literal(host: &str) -> bool {
    let bare = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
    bare.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
