//! Shared utilities for gateway integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_gateway::auth::{AuthPolicy, StaticKeyValidator};
use api_gateway::config::{ClusterConfig, Environment, GatewayConfig, RouteConfig};
use api_gateway::proxy::{Dispatcher, RouteTable, UpstreamDispatcher};
use api_gateway::{GatewayServer, GatewayState, Shutdown};
use axum::extract::Request;
use axum::{Json, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const SECRET: &[u8] = b"gateway-integration-secret-0123456789abcdef";
pub const ISSUER: &str = "https://login.example.com/";
pub const AUDIENCE: &str = "orders-api";

/// Start a programmable raw HTTP/1.1 backend. Returns its address.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Vec<u8>)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        read_request_head(&mut socket).await;
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let head = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            status_text,
                            body.len()
                        );
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(&body).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Consume request headers so closing the socket does not reset the client.
async fn read_request_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

/// Start a backend that answers every request with what it received.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(|request: Request| async move {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "method": request.method().as_str(),
            "path": request.uri().path(),
            "query": request.uri().query(),
            "forwardedFor": header("x-forwarded-for"),
            "forwardedProto": header("x-forwarded-proto"),
            "forwardedHost": header("x-forwarded-host"),
            "authorization": header("authorization"),
        }))
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config routing `prefix` to `backend`.
pub fn config_with_route(prefix: &str, backend: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.jwt.authority = ISSUER.to_string();
    config.jwt.audience = AUDIENCE.to_string();
    config.proxy.clusters.push(ClusterConfig {
        cluster_id: "orders".into(),
        address: format!("http://{backend}"),
    });
    config.proxy.routes.push(RouteConfig {
        route_id: "orders-route".into(),
        path_prefix: prefix.into(),
        cluster_id: "orders".into(),
    });
    config
}

/// A running gateway on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_gateway(config: GatewayConfig, environment: Environment) -> TestGateway {
    let policy = AuthPolicy::from_environment(&environment);
    let validator = Arc::new(StaticKeyValidator::hs256(SECRET, policy, ISSUER, AUDIENCE));

    let dispatcher = Arc::new(UpstreamDispatcher::new(Duration::from_secs(
        config.proxy.request_timeout_secs,
    )));
    dispatcher
        .configure_routes(RouteTable::from_config(&config.proxy).unwrap())
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = GatewayState::new(config, environment, validator, dispatcher);

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let handle = tokio::spawn(GatewayServer::new(state).run(listener, server_shutdown));

    TestGateway { addr, shutdown, handle }
}

pub fn token(scopes: &str) -> String {
    let claims = json!({
        "sub": "integration-user",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "exp": chrono::Utc::now().timestamp() + 600,
        "scope": scopes,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
