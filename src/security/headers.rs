//! Forwarded-header resolution.
//!
//! # Responsibilities
//! - Derive the real client address from `X-Forwarded-For` / `X-Forwarded-Proto`
//! - Consume forwarded entries only while the hop that added them is trusted
//! - Record the replaced peer address in `X-Original-For`
//!
//! # Design Decisions
//! - Never trust `X-Forwarded-*` from unknown peers
//! - Entries are consumed right to left, at most `forwardLimit` of them
//! - The resolved address is published as a `ClientAddr` request extension;
//!   every later stage keys on it instead of the TCP peer. It is also
//!   attached to the response for the outer request logger

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::ForwardedHeadersConfig;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_ORIGINAL_FOR: HeaderName = HeaderName::from_static("x-original-for");

/// The client as seen after forwarded-header resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr {
    pub ip: IpAddr,
    pub scheme: String,
}

/// Trusted-proxy policy for forwarded headers.
#[derive(Debug, Clone)]
pub struct ForwardedHeaders {
    known_proxies: Vec<IpAddr>,
    forward_limit: usize,
}

impl ForwardedHeaders {
    pub fn new(known_proxies: Vec<IpAddr>, forward_limit: usize) -> Self {
        Self {
            known_proxies,
            forward_limit: forward_limit.max(1),
        }
    }

    pub fn from_config(config: &ForwardedHeadersConfig) -> Self {
        let known_proxies = config
            .known_proxies
            .iter()
            .filter_map(|p| match p.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(proxy = %p, "Ignoring unparsable known proxy");
                    None
                }
            })
            .collect();
        Self::new(known_proxies, config.forward_limit)
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.known_proxies.iter().any(|known| known == &canonical(ip))
    }

    /// Resolve the client for a request received from `peer`, rewriting
    /// the forwarded headers to drop the consumed entries.
    pub fn resolve(&self, peer: IpAddr, headers: &mut HeaderMap) -> ClientAddr {
        let forwarded_for = header_list(headers, &X_FORWARDED_FOR);
        let forwarded_proto = header_list(headers, &X_FORWARDED_PROTO);

        let mut client = ClientAddr {
            ip: canonical(&peer),
            scheme: "http".to_string(),
        };
        let mut consumed = 0;

        while consumed < self.forward_limit
            && consumed < forwarded_for.len()
            && self.is_trusted(&client.ip)
        {
            let entry = &forwarded_for[forwarded_for.len() - 1 - consumed];
            let Some(ip) = parse_forwarded_ip(entry) else {
                tracing::debug!(entry = %entry, "Unparsable X-Forwarded-For entry");
                break;
            };
            client.ip = canonical(&ip);
            if let Some(proto) = forwarded_proto
                .len()
                .checked_sub(1 + consumed)
                .and_then(|i| forwarded_proto.get(i))
            {
                client.scheme = proto.to_ascii_lowercase();
            }
            consumed += 1;
        }

        if consumed > 0 {
            if let Ok(original) = HeaderValue::from_str(&peer.to_string()) {
                headers.insert(X_ORIGINAL_FOR, original);
            }
            rewrite_list(headers, X_FORWARDED_FOR, &forwarded_for, consumed);
            rewrite_list(headers, X_FORWARDED_PROTO, &forwarded_proto, consumed);
        }

        client
    }
}

/// Stage: resolve the client address before anything keys on it.
pub async fn forwarded_headers_middleware(
    State(resolver): State<Arc<ForwardedHeaders>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let client = resolver.resolve(peer, request.headers_mut());
    if client.ip != canonical(&peer) {
        tracing::trace!(peer = %peer, client = %client.ip, "Client address resolved from forwarded headers");
    }
    request.extensions_mut().insert(client.clone());
    let mut response = next.run(request).await;
    // Lets the request logger, which runs before this stage, report the client key
    response.extensions_mut().insert(client);
    response
}

/// Map IPv4-mapped IPv6 addresses back to IPv4.
fn canonical(ip: &IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(*v6)),
        v4 => *v4,
    }
}

fn header_list(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn rewrite_list(headers: &mut HeaderMap, name: HeaderName, entries: &[String], consumed: usize) {
    let remaining = entries.len().saturating_sub(consumed);
    if remaining == 0 {
        headers.remove(&name);
        return;
    }
    match HeaderValue::from_str(&entries[..remaining].join(", ")) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            headers.remove(&name);
        }
    }
}

/// Accepts `1.2.3.4`, `1.2.3.4:5678`, `::1`, and `[::1]:5678`.
fn parse_forwarded_ip(entry: &str) -> Option<IpAddr> {
    if let Ok(ip) = entry.parse::<IpAddr>() {
        return Some(ip);
    }
    entry.parse::<SocketAddr>().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ForwardedHeaders {
        ForwardedHeaders::new(vec!["127.0.0.1".parse().unwrap(), "10.0.0.1".parse().unwrap()], 1)
    }

    fn headers(pairs: &[(&HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append((*name).clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn trusted_peer_forwarded_for_wins() {
        let mut h = headers(&[(&X_FORWARDED_FOR, "10.0.0.5"), (&X_FORWARDED_PROTO, "https")]);
        let client = resolver().resolve("10.0.0.1".parse().unwrap(), &mut h);

        assert_eq!(client.ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(client.scheme, "https");
        assert!(h.get(&X_FORWARDED_FOR).is_none());
        assert_eq!(h[&X_ORIGINAL_FOR], "10.0.0.1");
    }

    #[test]
    fn untrusted_peer_is_the_client() {
        let mut h = headers(&[(&X_FORWARDED_FOR, "10.0.0.5")]);
        let client = resolver().resolve("203.0.113.7".parse().unwrap(), &mut h);

        assert_eq!(client.ip, "203.0.113.7".parse::<IpAddr>().unwrap());
        assert_eq!(client.scheme, "http");
        assert_eq!(h[&X_FORWARDED_FOR], "10.0.0.5");
    }

    #[test]
    fn forward_limit_consumes_rightmost_entries_only() {
        let mut h = headers(&[(&X_FORWARDED_FOR, "198.51.100.2, 10.0.0.5")]);
        let client = resolver().resolve("127.0.0.1".parse().unwrap(), &mut h);

        assert_eq!(client.ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(h[&X_FORWARDED_FOR], "198.51.100.2");
    }

    #[test]
    fn chain_of_trusted_proxies_with_higher_limit() {
        let resolver = ForwardedHeaders::new(vec!["127.0.0.1".parse().unwrap(), "10.0.0.1".parse().unwrap()], 3);
        let mut h = headers(&[(&X_FORWARDED_FOR, "198.51.100.2, 10.0.0.1")]);
        let client = resolver.resolve("127.0.0.1".parse().unwrap(), &mut h);

        // 127.0.0.1 trusted → 10.0.0.1 trusted → 198.51.100.2 is the client
        assert_eq!(client.ip, "198.51.100.2".parse::<IpAddr>().unwrap());
        assert!(h.get(&X_FORWARDED_FOR).is_none());
    }

    #[test]
    fn entries_with_ports_and_mapped_peers() {
        let mut h = headers(&[(&X_FORWARDED_FOR, "[2001:db8::7]:4711")]);
        let client = resolver().resolve("::ffff:127.0.0.1".parse().unwrap(), &mut h);
        assert_eq!(client.ip, "2001:db8::7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn garbage_entry_stops_resolution() {
        let mut h = headers(&[(&X_FORWARDED_FOR, "unknown")]);
        let client = resolver().resolve("127.0.0.1".parse().unwrap(), &mut h);
        assert_eq!(client.ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(h[&X_FORWARDED_FOR], "unknown");
    }
}
