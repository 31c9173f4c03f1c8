//! Application configuration.
//!
//! Layered, lowest priority first:
//!
//! 1. built-in defaults (`default.toml` next to this file)
//! 2. an optional TOML file
//! 3. `STRATA__*` environment variables, `__` separating nested keys
//!
//! ```toml
//! debug = true
//!
//! [server]
//! addr = "127.0.0.1:8080"
//! max-body-bytes = 65536
//!
//! [middleware.trace]
//! enabled = false
//! ```
//!
//! The same file as environment variables:
//!
//! ```text
//! STRATA__DEBUG=true
//! STRATA__SERVER__ADDR=127.0.0.1:8080
//! STRATA__SERVER__MAX_BODY_BYTES=65536
//! STRATA__MIDDLEWARE__TRACE__ENABLED=false
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const ENV_VAR_PREFIX: &str = "STRATA";
pub const ENV_VAR_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct AppConfig {
    /// Render diagnostic error pages instead of the generic 500.
    pub debug: bool,
    pub server: ServerConfig,
    /// Per-middleware settings, keyed by [`Layer::name`](crate::middleware::Layer::name).
    pub middleware: BTreeMap<String, MiddlewareConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct ServerConfig {
    pub addr: String,
    /// Larger request bodies are answered with `413 Payload Too Large`.
    #[serde(alias = "max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_owned(),
            max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct MiddlewareConfig {
    /// Overrides the middleware's own `enabled` flag when set.
    pub enabled: Option<bool>,
}

impl AppConfig {
    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = Self::default_config();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(FileFormat::Toml));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_VAR_PREFIX)
                    .prefix_separator(ENV_VAR_SEPARATOR)
                    .separator(ENV_VAR_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parses `toml` on top of the defaults. The environment is not consulted.
    pub fn from_toml(toml: &str) -> Result<Self, Error> {
        let config = Self::default_config()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// The configured `enabled` override for the middleware called `name`.
    pub fn middleware_enabled(&self, name: &str) -> Option<bool> {
        self.middleware.get(name).and_then(|m| m.enabled)
    }

    fn default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(config::File::from_str(
            include_str!("default.toml"),
            FileFormat::Toml,
        ))
    }
}
