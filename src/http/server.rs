//! HTTP server setup.
//!
//! # Responsibilities
//! - Hold the per-process state shared by all pipeline stages
//! - Bind the composed pipeline to a listener with peer addresses
//! - Run the rate-limit sweeper alongside the server
//! - Stop accepting and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::auth::{AuthPolicy, AuthState, TokenValidator};
use crate::config::{Environment, GatewayConfig};
use crate::http::pipeline::build_router;
use crate::proxy::Dispatcher;
use crate::security::{ForwardedHeaders, RateLimiter};

/// Application state injected into stages and handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub environment: Environment,
    pub policy: AuthPolicy,
    pub forwarded: Arc<ForwardedHeaders>,
    pub limiter: Arc<RateLimiter>,
    pub auth: AuthState,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        environment: Environment,
        validator: Arc<dyn TokenValidator>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let policy = AuthPolicy::from_environment(&environment);
        let forwarded = Arc::new(ForwardedHeaders::from_config(&config.forwarded_headers));
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let auth = AuthState::new(policy, validator, config.jwt.required_scopes.clone());

        Self {
            config: Arc::new(config),
            environment,
            policy,
            forwarded,
            limiter,
            auth,
            dispatcher,
        }
    }
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    state: GatewayState,
    router: Router,
}

impl GatewayServer {
    pub fn new(state: GatewayState) -> Self {
        let router = build_router(state.clone());
        Self { state, router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = %self.state.environment,
            policy = ?self.state.policy,
            "HTTP server starting"
        );

        let sweeper = self.state.limiter.clone().spawn_sweeper(shutdown.resubscribe());

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        // No-op when the sweeper already stopped on the signal
        sweeper.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
