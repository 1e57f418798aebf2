//! Layered configuration sources.
//!
//! Sources are applied left to right; each one overrides keys set by the
//! ones before it. Files contribute whole TOML tables, environment variables
//! and command-line arguments contribute single `key=value` overrides whose
//! value is typed after the field they target.

use std::fs;
use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::config::environment::Environment;
use crate::config::loader::ConfigError;

/// Prefix for environment-variable overrides.
pub const ENV_PREFIX: &str = "GATEWAY__";

/// Base config file name inside the config directory.
pub const BASE_FILE: &str = "gateway.toml";

/// One configuration layer.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A TOML file. Missing optional files contribute nothing.
    File { path: PathBuf, required: bool },

    /// Environment variables starting with `prefix`, `__` separating path
    /// segments in SCREAMING_SNAKE case.
    Environment { prefix: String, vars: Vec<(String, String)> },

    /// Dotted `key=value` pairs, e.g. `rateLimit.permitLimit=10`.
    CommandLine(Vec<String>),
}

impl ConfigSource {
    /// Snapshot the process environment.
    pub fn process_environment() -> Self {
        Self::Environment {
            prefix: ENV_PREFIX.to_string(),
            vars: std::env::vars().collect(),
        }
    }

    fn origin(&self) -> String {
        match self {
            ConfigSource::File { path, .. } => path.display().to_string(),
            ConfigSource::Environment { .. } => "environment".to_string(),
            ConfigSource::CommandLine(_) => "command line".to_string(),
        }
    }
}

/// The standard precedence chain: base file, environment file, env vars, CLI.
pub fn standard_sources(
    config_dir: &Path,
    environment: &Environment,
    cli_overrides: Vec<String>,
) -> Vec<ConfigSource> {
    vec![
        ConfigSource::File {
            path: config_dir.join(BASE_FILE),
            required: true,
        },
        ConfigSource::File {
            path: config_dir.join(format!("gateway.{}.toml", environment.name())),
            required: false,
        },
        ConfigSource::process_environment(),
        ConfigSource::CommandLine(cli_overrides),
    ]
}

/// A single scalar override addressed by path.
#[derive(Debug, Clone, PartialEq)]
struct Override {
    path: Vec<String>,
    raw: String,
}

/// Merge all sources into one table. `schema` is the serialized default
/// config; it decides how override strings are typed.
pub fn merge_sources(sources: &[ConfigSource], schema: &Table) -> Result<Table, ConfigError> {
    let mut merged = Table::new();

    for source in sources {
        match source {
            ConfigSource::File { path, required } => {
                if let Some(table) = read_file(path, *required)? {
                    tracing::debug!(path = %path.display(), "Applying config file");
                    deep_merge(&mut merged, table);
                }
            }
            ConfigSource::Environment { prefix, vars } => {
                for (name, raw) in vars {
                    if let Some(path) = env_key_path(prefix, name) {
                        apply_override(&mut merged, schema, Override { path, raw: raw.clone() }, source)?;
                    }
                }
            }
            ConfigSource::CommandLine(args) => {
                for arg in args {
                    let over = parse_cli_arg(arg).ok_or_else(|| ConfigError::Override {
                        key: arg.clone(),
                        origin: source.origin(),
                        reason: "expected key=value".to_string(),
                    })?;
                    apply_override(&mut merged, schema, over, source)?;
                }
            }
        }
    }

    Ok(merged)
}

fn read_file(path: &Path, required: bool) -> Result<Option<Table>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    content
        .parse::<Table>()
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Recursively merge `overlay` into `base`; tables merge, everything else replaces.
fn deep_merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => deep_merge(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// `GATEWAY__RATE_LIMIT__PERMIT_LIMIT` → `["rateLimit", "permitLimit"]`.
fn env_key_path(prefix: &str, name: &str) -> Option<Vec<String>> {
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() {
        return None;
    }
    let path: Vec<String> = rest.split("__").map(snake_to_camel).collect();
    if path.iter().any(String::is_empty) {
        return None;
    }
    Some(path)
}

fn snake_to_camel(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, word) in segment.split('_').filter(|w| !w.is_empty()).enumerate() {
        let lower = word.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.extend(chars);
            }
        }
    }
    out
}

fn parse_cli_arg(arg: &str) -> Option<Override> {
    let arg = arg.trim_start_matches("--");
    let (key, raw) = arg.split_once('=')?;
    let path: Vec<String> = key.split('.').map(str::to_string).collect();
    if path.iter().any(String::is_empty) {
        return None;
    }
    Some(Override {
        path,
        raw: raw.to_string(),
    })
}

fn lookup<'a>(table: &'a Table, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let value = table.get(first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Table(inner) => lookup(inner, rest),
        _ => None,
    }
}

fn apply_override(
    merged: &mut Table,
    schema: &Table,
    over: Override,
    source: &ConfigSource,
) -> Result<(), ConfigError> {
    let template = lookup(merged, &over.path).or_else(|| lookup(schema, &over.path));
    let value = typed_value(template, &over.raw).map_err(|reason| ConfigError::Override {
        key: over.path.join("."),
        origin: source.origin(),
        reason,
    })?;

    let Some((leaf, parents)) = over.path.split_last() else {
        return Err(ConfigError::Override {
            key: String::new(),
            origin: source.origin(),
            reason: "empty key".to_string(),
        });
    };

    let mut table = merged;
    for segment in parents {
        let entry = table
            .entry(segment.clone())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        table = match entry {
            Value::Table(inner) => inner,
            _ => unreachable!("entry was just made a table"),
        };
    }
    table.insert(leaf.clone(), value);
    Ok(())
}

/// Parse `raw` as the same TOML type as `template`.
fn typed_value(template: Option<&Value>, raw: &str) -> Result<Value, String> {
    let raw = raw.trim();
    match template {
        Some(Value::Integer(_)) => raw
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("`{raw}` is not an integer")),
        Some(Value::Float(_)) => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("`{raw}` is not a number")),
        Some(Value::Boolean(_)) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Boolean(true)),
            "false" | "0" | "no" => Ok(Value::Boolean(false)),
            _ => Err(format!("`{raw}` is not a boolean")),
        },
        Some(Value::Array(items)) if items.iter().any(Value::is_table) => {
            Err("list of tables cannot be set from a single value".to_string())
        }
        Some(Value::Array(_)) => Ok(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        Some(Value::Table(_)) => Err("cannot replace a section with a scalar".to_string()),
        _ => Ok(Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::GatewayConfig;

    fn schema() -> Table {
        match Value::try_from(GatewayConfig::default()).unwrap() {
            Value::Table(t) => t,
            _ => unreachable!(),
        }
    }

    #[test]
    fn env_names_map_to_camel_case_paths() {
        assert_eq!(
            env_key_path(ENV_PREFIX, "GATEWAY__RATE_LIMIT__PERMIT_LIMIT"),
            Some(vec!["rateLimit".to_string(), "permitLimit".to_string()])
        );
        assert_eq!(
            env_key_path(ENV_PREFIX, "GATEWAY__JWT__REQUIRE_HTTPS"),
            Some(vec!["jwt".to_string(), "requireHttps".to_string()])
        );
        assert_eq!(env_key_path(ENV_PREFIX, "GATEWAY_ENVIRONMENT"), None);
        assert_eq!(env_key_path(ENV_PREFIX, "PATH"), None);
    }

    #[test]
    fn overrides_are_typed_after_the_schema() {
        let sources = vec![ConfigSource::CommandLine(vec![
            "rateLimit.permitLimit=25".to_string(),
            "jwt.requireHttps=false".to_string(),
            "cors.allowedOrigins=https://a.example, https://b.example".to_string(),
            "jwt.audience=12345".to_string(),
        ])];
        let merged = merge_sources(&sources, &schema()).unwrap();

        assert_eq!(lookup(&merged, &["rateLimit".into(), "permitLimit".into()]), Some(&Value::Integer(25)));
        assert_eq!(lookup(&merged, &["jwt".into(), "requireHttps".into()]), Some(&Value::Boolean(false)));
        assert_eq!(
            lookup(&merged, &["cors".into(), "allowedOrigins".into()]),
            Some(&Value::Array(vec![
                Value::String("https://a.example".into()),
                Value::String("https://b.example".into()),
            ]))
        );
        // Numeric-looking strings stay strings for string fields
        assert_eq!(lookup(&merged, &["jwt".into(), "audience".into()]), Some(&Value::String("12345".into())));
    }

    #[test]
    fn later_sources_win() {
        let sources = vec![
            ConfigSource::Environment {
                prefix: ENV_PREFIX.to_string(),
                vars: vec![("GATEWAY__RATE_LIMIT__PERMIT_LIMIT".into(), "5".into())],
            },
            ConfigSource::CommandLine(vec!["rateLimit.permitLimit=7".into()]),
        ];
        let merged = merge_sources(&sources, &schema()).unwrap();
        assert_eq!(lookup(&merged, &["rateLimit".into(), "permitLimit".into()]), Some(&Value::Integer(7)));
    }

    #[test]
    fn bad_integer_override_names_the_key() {
        let sources = vec![ConfigSource::CommandLine(vec!["rateLimit.queueLimit=lots".into()])];
        let err = merge_sources(&sources, &schema()).unwrap_err();
        assert!(err.to_string().contains("rateLimit.queueLimit"), "{err}");
    }

    #[test]
    fn malformed_cli_argument_is_rejected() {
        let sources = vec![ConfigSource::CommandLine(vec!["rateLimit.permitLimit".into()])];
        assert!(matches!(
            merge_sources(&sources, &schema()),
            Err(ConfigError::Override { .. })
        ));
    }

    #[test]
    fn missing_optional_file_is_skipped() {
        let sources = vec![ConfigSource::File {
            path: PathBuf::from("/nonexistent/gateway.Staging.toml"),
            required: false,
        }];
        assert!(merge_sources(&sources, &schema()).unwrap().is_empty());
    }
}
