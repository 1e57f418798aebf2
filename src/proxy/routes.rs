//! Route table handed to the dispatcher.
//!
//! # Design Decisions
//! - Compiled once from config, immutable afterwards
//! - Path prefixes match on segment boundaries (`/orders` matches
//!   `/orders/7` but not `/ordersx`)
//! - Longest prefix wins; ties keep declaration order

use std::collections::HashMap;

use url::Url;

use crate::config::ProxyConfig;
use crate::proxy::dispatcher::DispatchError;

/// A compiled route.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub route_id: String,
    pub path_prefix: String,
    pub cluster_id: String,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        let prefix = self.path_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Routes plus the upstream base URL of each cluster.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    clusters: HashMap<String, Url>,
}

impl RouteTable {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, DispatchError> {
        let mut clusters = HashMap::with_capacity(config.clusters.len());
        for cluster in &config.clusters {
            let url = Url::parse(&cluster.address)
                .map_err(|e| DispatchError::InvalidRequest(format!("cluster `{}`: {e}", cluster.cluster_id)))?;
            clusters.insert(cluster.cluster_id.clone(), url);
        }

        let mut routes: Vec<Route> = config
            .routes
            .iter()
            .map(|r| Route {
                route_id: r.route_id.clone(),
                path_prefix: r.path_prefix.clone(),
                cluster_id: r.cluster_id.clone(),
            })
            .collect();
        // Stable sort keeps declaration order among equal lengths
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));

        Ok(Self { routes, clusters })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the route for `path` and its cluster base URL.
    pub fn resolve(&self, path: &str) -> Option<(&Route, &Url)> {
        self.routes
            .iter()
            .find(|route| route.matches(path))
            .and_then(|route| self.clusters.get(&route.cluster_id).map(|url| (route, url)))
    }
}
