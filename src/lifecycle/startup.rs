//! Startup orchestration.
//!
//! # Responsibilities
//! - Parse the command line
//! - Load and validate configuration before anything else
//! - Initialize logging, metrics, token validation and the dispatcher
//! - Bind the listener last and serve until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and exits non-zero
//! - Subsystems initialize in order, not concurrently

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use crate::auth::{validator_from_config, AuthPolicy};
use crate::config::{load_config, standard_sources, ConfigError, Environment, GatewayConfig, ObservabilityConfig};
use crate::http::{GatewayServer, GatewayState};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::observability::{logging, metrics};
use crate::proxy::{Dispatcher, RouteTable, UpstreamDispatcher};

/// Command line of the gateway binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "api-gateway", version, about = "Authenticating, rate-limiting API gateway")]
pub struct Cli {
    /// Directory holding gateway.toml and gateway.<Environment>.toml.
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Environment name; falls back to GATEWAY_ENVIRONMENT, then Production.
    #[arg(long)]
    pub environment: Option<String>,

    /// Configuration overrides such as rateLimit.permitLimit=10.
    #[arg(value_name = "KEY=VALUE", num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub overrides: Vec<String>,
}

/// Resolve the environment and load its configuration.
pub fn load(cli: &Cli) -> Result<(GatewayConfig, Environment), ConfigError> {
    let environment = Environment::resolve(cli.environment.as_deref());
    let sources = standard_sources(&cli.config_dir, &environment, cli.overrides.clone());
    let config = load_config(&sources)?;
    Ok((config, environment))
}

/// Run the gateway until shutdown.
pub async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (config, environment) = match load(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            let _ = logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, config_dir = %cli.config_dir.display(), "Invalid configuration");
            return Err(e.into());
        }
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %environment,
        bind_address = %config.listener.bind_address,
        permit_limit = config.rate_limit.permit_limit,
        window_minutes = config.rate_limit.window_minutes,
        queue_limit = config.rate_limit.queue_limit,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let policy = AuthPolicy::from_environment(&environment);
    let validator = validator_from_config(&config.jwt, policy)?;

    let dispatcher = Arc::new(UpstreamDispatcher::new(Duration::from_secs(
        config.proxy.request_timeout_secs,
    )));
    dispatcher.configure_routes(RouteTable::from_config(&config.proxy)?)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let state = GatewayState::new(config, environment, validator, dispatcher);

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown);

    GatewayServer::new(state).run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_trailing_overrides() {
        let cli = Cli::parse_from([
            "api-gateway",
            "--config-dir",
            "/etc/gateway",
            "--environment",
            "Development",
            "rateLimit.permitLimit=10",
            "--jwt.audience=orders-api",
        ]);

        assert_eq!(cli.config_dir, PathBuf::from("/etc/gateway"));
        assert_eq!(cli.environment.as_deref(), Some("Development"));
        assert_eq!(cli.overrides, vec!["rateLimit.permitLimit=10", "--jwt.audience=orders-api"]);
    }

    #[test]
    fn load_fails_on_missing_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from(["api-gateway", "--config-dir", dir.path().to_str().unwrap()]);
        assert!(matches!(load(&cli), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_applies_environment_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gateway.toml"),
            "[jwt]\nauthority = \"https://login.example.com/\"\naudience = \"orders-api\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("gateway.Staging.toml"),
            "[rateLimit]\npermitLimit = 50\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "api-gateway",
            "--config-dir",
            dir.path().to_str().unwrap(),
            "--environment",
            "Staging",
            "rateLimit.queueLimit=5",
        ]);
        let (config, environment) = load(&cli).unwrap();

        assert_eq!(environment.name(), "Staging");
        assert_eq!(config.rate_limit.permit_limit, 50);
        assert_eq!(config.rate_limit.queue_limit, 5);
    }
}
