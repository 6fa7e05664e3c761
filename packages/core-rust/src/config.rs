//! Configuration model, defaults, and source resolution.
//!
//! A configuration is resolved once: the built-in defaults are serialized,
//! the caller's overrides are laid over them key-by-key at the top level, and
//! the result is deserialized back into [`CoreConfig`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::{read_document, DocumentError};
use crate::query::QueryParserConfig;

/// Environment variable consulted for the default of `isDev`.
pub const ENV_VAR: &str = "RAPIDFIRE_ENV";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Development mode. Defaults to `RAPIDFIRE_ENV != "production"`.
    pub is_dev: bool,
    /// Bind address.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Discovery directories.
    pub paths: PathsConfig,
    pub querystring_parser: QueryParserConfig,
    pub body_parser: BodyParserConfig,
    /// Maximum time a request may spend in the pipeline.
    pub request_timeout_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            is_dev: std::env::var(ENV_VAR).map_or(true, |env| env != "production"),
            host: "0.0.0.0".to_string(),
            port: 0,
            paths: PathsConfig::default(),
            querystring_parser: QueryParserConfig::default(),
            body_parser: BodyParserConfig::default(),
            request_timeout_secs: 30,
        }
    }
}

impl CoreConfig {
    /// Resolves a configuration source against the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded, the overrides are not an
    /// object, or the merged document does not match the configuration shape.
    pub fn resolve(source: ConfigSource) -> Result<Self, ConfigError> {
        let overrides = match source {
            ConfigSource::Typed(config) => return Ok(*config),
            ConfigSource::Inline(value) => value,
            ConfigSource::Path(path) => read_document(&path)?,
        };
        let defaults = serde_json::to_value(Self::default()).map_err(ConfigError::Invalid)?;
        let merged = merge_shallow(defaults, overrides)?;
        serde_json::from_value(merged).map_err(ConfigError::Invalid)
    }

    /// `host:port` string suitable for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Directory locations scanned during ignition.
///
/// An absent or empty path disables that discovery phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub services: Option<PathBuf>,
    pub middlewares: Option<PathBuf>,
    pub loaders: Option<PathBuf>,
}

impl PathsConfig {
    #[must_use]
    pub fn services(&self) -> Option<&Path> {
        enabled(self.services.as_deref())
    }

    #[must_use]
    pub fn middlewares(&self) -> Option<&Path> {
        enabled(self.middlewares.as_deref())
    }

    #[must_use]
    pub fn loaders(&self) -> Option<&Path> {
        enabled(self.loaders.as_deref())
    }
}

fn enabled(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// JSON body parser settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyParserConfig {
    /// Maximum accepted body size in bytes.
    pub limit: usize,
    /// Only accept objects and arrays at the top level.
    pub strict: bool,
}

impl Default for BodyParserConfig {
    fn default() -> Self {
        Self {
            limit: 102_400,
            strict: true,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigSource
// ---------------------------------------------------------------------------

/// Where a configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A JSON or YAML file. Relative paths resolve against the working directory.
    Path(PathBuf),
    /// Inline overrides merged over the defaults.
    Inline(Value),
    /// A fully built configuration, used as-is.
    Typed(Box<CoreConfig>),
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ConfigSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Value> for ConfigSource {
    fn from(value: Value) -> Self {
        Self::Inline(value)
    }
}

impl From<CoreConfig> for ConfigSource {
    fn from(config: CoreConfig) -> Self {
        Self::Typed(Box::new(config))
    }
}

/// Errors raised while resolving a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("configuration overrides must be an object")]
    NotAnObject,
    #[error("invalid configuration: {0}")]
    Invalid(#[source] serde_json::Error),
}

/// Lays `overrides` over `defaults`, replacing whole top-level keys.
///
/// # Errors
///
/// Returns [`ConfigError::NotAnObject`] if either side is not an object
/// (a `null` override counts as "no overrides").
pub fn merge_shallow(defaults: Value, overrides: Value) -> Result<Value, ConfigError> {
    let Value::Object(mut merged) = defaults else {
        return Err(ConfigError::NotAnObject);
    };
    match overrides {
        Value::Object(entries) => merged.extend(entries),
        Value::Null => {}
        _ => return Err(ConfigError::NotAnObject),
    }
    Ok(Value::Object(merged))
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Process environment captured when the orchestrator is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// Working directory of the process.
    pub root: PathBuf,
}

impl Environment {
    /// Snapshots the working directory, falling back to `PWD`.
    #[must_use]
    pub fn capture() -> Self {
        let root = std::env::current_dir()
            .ok()
            .or_else(|| std::env::var_os("PWD").map(PathBuf::from))
            .unwrap_or_default();
        Self { root }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn core_config_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert!(config.paths.services().is_none());
        assert!(config.paths.middlewares().is_none());
        assert!(config.paths.loaders().is_none());
        assert_eq!(config.body_parser.limit, 102_400);
        assert!(config.body_parser.strict);
        assert_eq!(config.querystring_parser.array_limit, 10_000);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn inline_overrides_win_key_by_key() {
        let config = CoreConfig::resolve(ConfigSource::Inline(json!({
            "isDev": false,
            "port": 8080,
            "paths": { "services": "svc" },
        })))
        .unwrap();

        assert!(!config.is_dev);
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.paths.services(), Some(Path::new("svc")));
        assert!(config.paths.loaders().is_none());
    }

    #[test]
    fn nested_override_replaces_whole_object() {
        let defaults = json!({ "paths": { "services": "a", "loaders": "b" }, "port": 1 });
        let merged = merge_shallow(defaults, json!({ "paths": { "services": "c" } })).unwrap();
        assert_eq!(merged, json!({ "paths": { "services": "c" }, "port": 1 }));
    }

    #[test]
    fn null_overrides_keep_defaults() {
        let config = CoreConfig::resolve(ConfigSource::Inline(Value::Null)).unwrap();
        assert_eq!(config.port, 0);
    }

    #[test]
    fn non_object_overrides_are_rejected() {
        let err = CoreConfig::resolve(ConfigSource::Inline(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnObject));
    }

    #[test]
    fn wrong_field_type_is_invalid() {
        let err = CoreConfig::resolve(ConfigSource::Inline(json!({ "port": "eighty" }))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_path_disables_discovery() {
        let config = CoreConfig::resolve(ConfigSource::Inline(json!({
            "paths": { "services": "", "middlewares": "mw" },
        })))
        .unwrap();
        assert!(config.paths.services().is_none());
        assert_eq!(config.paths.middlewares(), Some(Path::new("mw")));
    }

    #[test]
    fn resolves_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rapidfire.yaml");
        std::fs::write(
            &path,
            "host: 127.0.0.1\nport: 4000\nbodyParser:\n  limit: 10\n",
        )
        .unwrap();

        let config = CoreConfig::resolve(ConfigSource::from(path)).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:4000");
        assert_eq!(config.body_parser.limit, 10);
        assert!(config.body_parser.strict);
    }

    #[test]
    fn typed_source_is_used_as_is() {
        let config = CoreConfig {
            port: 1234,
            ..CoreConfig::default()
        };
        let resolved = CoreConfig::resolve(config.clone().into()).unwrap();
        assert_eq!(resolved, config);
    }

    #[test]
    fn environment_captures_working_directory() {
        let env = Environment::capture();
        assert_eq!(env.root, std::env::current_dir().unwrap());
    }
}
