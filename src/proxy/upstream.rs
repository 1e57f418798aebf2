//! Default dispatcher: forwards to a cluster base URL over HTTP/1.1.
//!
//! # Responsibilities
//! - Resolve the route for the request path
//! - Rewrite the URI onto the cluster base URL
//! - Strip hop-by-hop headers both ways; add X-Forwarded-*
//! - Enforce the upstream request timeout
//!
//! # Design Decisions
//! - One upstream per cluster: no balancing, health checks or retries
//! - Bodies are streamed in both directions

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri, Version};
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::proxy::dispatcher::{DispatchError, Dispatcher};
use crate::proxy::routes::RouteTable;
use crate::security::headers::{ClientAddr, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO};

static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards requests with a pooled hyper-util client.
pub struct UpstreamDispatcher {
    client: Client<HttpConnector, Body>,
    routes: ArcSwapOption<RouteTable>,
    timeout: Duration,
}

impl UpstreamDispatcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            routes: ArcSwapOption::empty(),
            timeout,
        }
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response, DispatchError> {
        let routes = self.routes.load_full().ok_or(DispatchError::NotConfigured)?;
        let path = request.uri().path().to_string();
        let (route, base) = routes
            .resolve(&path)
            .ok_or_else(|| DispatchError::NoRoute(path.clone()))?;
        let cluster = route.cluster_id.clone();
        let uri = upstream_uri(base, request.uri())?;

        tracing::debug!(route = %route.route_id, cluster = %cluster, upstream = %uri, "Forwarding request");

        let (mut parts, body) = request.into_parts();
        let client_addr = parts.extensions.get::<ClientAddr>().cloned();
        strip_hop_by_hop(&mut parts.headers);
        let original_host = parts.headers.remove(header::HOST);
        add_forwarded_headers(&mut parts.headers, client_addr.as_ref(), original_host);
        parts.uri = uri;
        parts.version = Version::HTTP_11;

        let upstream = self.client.request(Request::from_parts(parts, body));
        match tokio::time::timeout(self.timeout, upstream).await {
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(DispatchError::Unreachable {
                cluster,
                reason: e.to_string(),
            }),
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
        }
    }
}

impl Dispatcher for UpstreamDispatcher {
    fn configure_routes(&self, routes: RouteTable) -> Result<(), DispatchError> {
        tracing::info!(routes = routes.len(), "Route table configured");
        self.routes.store(Some(Arc::new(routes)));
        Ok(())
    }

    fn dispatch(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response, DispatchError>> {
        self.forward(request).boxed()
    }
}

/// Join the request path and query onto the cluster base URL.
fn upstream_uri(base: &Url, original: &Uri) -> Result<Uri, DispatchError> {
    let mut target = base.clone();
    let base_path = base.path().trim_end_matches('/');
    target.set_path(&format!("{base_path}{}", original.path()));
    target.set_query(original.query());
    target
        .as_str()
        .parse::<Uri>()
        .map_err(|e| DispatchError::InvalidRequest(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by Connection are hop-by-hop too
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn add_forwarded_headers(headers: &mut HeaderMap, client: Option<&ClientAddr>, host: Option<HeaderValue>) {
    if let Some(client) = client {
        let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, {}", client.ip),
            _ => client.ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
        if let Ok(value) = HeaderValue::from_str(&client.scheme) {
            headers.insert(X_FORWARDED_PROTO, value);
        }
    }
    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_path_and_query() {
        let base = Url::parse("http://10.0.0.12:3000/v2/").unwrap();
        let uri: Uri = "/orders/7?expand=items".parse().unwrap();
        assert_eq!(
            upstream_uri(&base, &uri).unwrap().to_string(),
            "http://10.0.0.12:3000/v2/orders/7?expand=items"
        );

        let base = Url::parse("http://10.0.0.12:3000").unwrap();
        let uri: Uri = "/orders".parse().unwrap();
        assert_eq!(upstream_uri(&base, &uri).unwrap().to_string(), "http://10.0.0.12:3000/orders");
    }

    #[test]
    fn strips_hop_by_hop_and_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-internal"));
        headers.insert("x-internal", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-internal").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers[header::ACCEPT], "*/*");
    }

    #[test]
    fn appends_client_to_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));
        let client = ClientAddr {
            ip: "10.0.0.5".parse().unwrap(),
            scheme: "https".to_string(),
        };

        add_forwarded_headers(&mut headers, Some(&client), Some(HeaderValue::from_static("api.example.com")));

        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.9, 10.0.0.5");
        assert_eq!(headers[X_FORWARDED_PROTO], "https");
        assert_eq!(headers[X_FORWARDED_HOST], "api.example.com");
    }

    #[tokio::test]
    async fn unconfigured_dispatcher_refuses() {
        let dispatcher = UpstreamDispatcher::new(Duration::from_secs(1));
        let request = Request::builder().uri("/orders").body(Body::empty()).unwrap();
        assert!(matches!(
            dispatcher.dispatch(request).await,
            Err(DispatchError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn unmatched_path_is_no_route() {
        let dispatcher = UpstreamDispatcher::new(Duration::from_secs(1));
        dispatcher.configure_routes(RouteTable::default()).unwrap();
        let request = Request::builder().uri("/orders").body(Body::empty()).unwrap();
        assert!(matches!(
            dispatcher.dispatch(request).await,
            Err(DispatchError::NoRoute(path)) if path == "/orders"
        ));
    }
}
