//! Hosting environment name (Development, Staging, Production, ...).

use std::fmt;

/// Environment variable consulted when `--environment` is not given.
pub const ENVIRONMENT_VAR: &str = "GATEWAY_ENVIRONMENT";

const DEVELOPMENT: &str = "Development";
const STAGING: &str = "Staging";
const PRODUCTION: &str = "Production";

/// Names spelled canonically whatever case they are given in, so the
/// environment file lookup agrees with `is_development`.
const KNOWN: [&str; 3] = [DEVELOPMENT, STAGING, PRODUCTION];

/// The environment the gateway runs in.
///
/// Resolved once at startup. It selects the environment-specific config file
/// and the auth policy; nothing else branches on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    name: String,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.trim();
        let name = if name.is_empty() {
            PRODUCTION.to_string()
        } else {
            KNOWN
                .iter()
                .find(|known| known.eq_ignore_ascii_case(name))
                .map_or_else(|| name.to_string(), |known| known.to_string())
        };
        Self { name }
    }

    pub fn development() -> Self {
        Self::new(DEVELOPMENT)
    }

    pub fn production() -> Self {
        Self::new(PRODUCTION)
    }

    /// CLI value first, then `GATEWAY_ENVIRONMENT`, then Production.
    pub fn resolve(cli: Option<&str>) -> Self {
        match cli {
            Some(name) => Self::new(name),
            None => Self::new(std::env::var(ENVIRONMENT_VAR).unwrap_or_default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_development(&self) -> bool {
        self.name.eq_ignore_ascii_case(DEVELOPMENT)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::production()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_is_case_insensitive() {
        assert!(Environment::new("development").is_development());
        assert!(Environment::new("DEVELOPMENT").is_development());
        assert!(!Environment::new("Staging").is_development());
    }

    #[test]
    fn blank_name_falls_back_to_production() {
        let env = Environment::new("  ");
        assert_eq!(env.name(), "Production");
        assert!(!env.is_development());
    }

    #[test]
    fn known_names_are_canonicalized() {
        assert_eq!(Environment::new("development").name(), "Development");
        assert_eq!(Environment::new(" STAGING ").name(), "Staging");
        assert_eq!(Environment::new("production").name(), "Production");
        // Custom names are kept as given
        assert_eq!(Environment::new("qa-east").name(), "qa-east");
    }

    #[test]
    fn cli_value_wins() {
        assert_eq!(Environment::resolve(Some("Staging")).name(), "Staging");
    }
}
