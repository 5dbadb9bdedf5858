//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`DbaiConfig`] struct, which holds the configuration parameters,
//! and a [`load_config`] function to load the configuration from a YAML file.
//! Connection settings for the connected database can also come from the
//! environment (`DB_TYPE`, `DB_HOST`, `DB_PORT`, `DB_USERNAME`, `DB_PASSWORD`,
//! `DB_NAME`) and the API key from `OPENAI_API_KEY`; environment values win over
//! the file.
//!
//! # Examples
//!
//! ```no_run
//! use dbai::config::load_config;
//!
//! let mut config = load_config("/path/to/config.yaml").unwrap();
//! config.apply_env();
//! println!("{:?}", config.source.database);
//! ```

use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct DbaiConfig {
    /// The API key used to authenticate requests to the API.
    pub api_key: String,

    /// The base URL of the OpenAI compatible API.
    pub api_base: String,

    /// The name of the model to be used for generating responses.
    pub model: String,

    /// Upper bound on completion tokens per request.
    pub max_tokens: Option<u32>,

    // Conversation database url (SQLite)
    pub session_db_url: String,

    // Schema snapshot file
    pub snapshot_path: String,

    /// YAML prompt template. The built-in template is used when unset.
    pub template_path: Option<String>,

    pub turn_timeout_secs: u64,

    /// Model round trips allowed in a single turn before giving up.
    pub max_tool_rounds: usize,

    pub bind_address: String,

    pub source: SourceConfig,
}

/// Connection settings for the database being queried.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct SourceConfig {
    /// `postgres` or `mysql`. Anything other than `postgres` means MySQL.
    pub dialect: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub max_connections: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
}

impl Default for DbaiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: None,
            session_db_url: "dbai.db".to_string(),
            snapshot_path: "database_structure.json".to_string(),
            template_path: None,
            turn_timeout_secs: 30,
            max_tool_rounds: 8,
            bind_address: "127.0.0.1:3000".to_string(),
            source: SourceConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dialect: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            username: None,
            password: None,
            database: None,
            max_connections: 5,
            idle_timeout_secs: 10,
            acquire_timeout_secs: 30,
        }
    }
}

impl DbaiConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    ///
    /// # Parameters
    /// - `lookup`: returns `Some(value)` for variables that are set.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            self.api_key = api_key;
        }
        if let Some(dialect) = lookup("DB_TYPE") {
            self.source.dialect = dialect;
        }
        if let Some(host) = lookup("DB_HOST") {
            self.source.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            match port.parse() {
                Ok(port) => self.source.port = port,
                Err(_) => warn!("Ignoring DB_PORT={port:?}: not a port number"),
            }
        }
        if let Some(username) = lookup("DB_USERNAME") {
            self.source.username = Some(username);
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            self.source.password = Some(password);
        }
        if let Some(database) = lookup("DB_NAME") {
            self.source.database = Some(database);
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// Missing fields take their defaults.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(DbaiConfig)`: The loaded configuration.
/// - `Err(DbaiError)`: The file could not be read or is not valid YAML.
pub fn load_config(file: &str) -> Result<DbaiConfig> {
    debug!("Loading config from {}", file);
    let content = fs::read_to_string(file)?;
    let config: DbaiConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Where `config.yaml` lives: the working directory when `IN_TEST_ENVIRONMENT`
/// is set, the per-platform config directory otherwise.
pub fn default_config_path() -> Result<PathBuf> {
    if env::var("IN_TEST_ENVIRONMENT").is_ok() {
        Ok(env::current_dir()?.join("config.yaml"))
    } else {
        Ok(crate::config_dir()?.join("config.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbaiError;
    use std::{collections::HashMap, io::Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com"
model: "example_model"
session_db_url: "dbai.db"
turn_timeout_secs: 45
source:
  dialect: mysql
  host: db.internal
  port: 3306
  database: shop
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com");
        assert_eq!(config.model, "example_model");
        assert_eq!(config.turn_timeout_secs, 45);
        assert_eq!(config.max_tool_rounds, 8);
        assert_eq!(config.snapshot_path, "database_structure.json");
        assert_eq!(config.source.dialect, "mysql");
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.source.database.as_deref(), Some("shop"));
        assert_eq!(config.source.max_connections, 5);
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(matches!(config, Err(DbaiError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());
        assert!(matches!(config, Err(DbaiError::Configuration(_))));
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-env"),
            ("DB_TYPE", "mysql"),
            ("DB_HOST", "10.0.0.5"),
            ("DB_PORT", "3307"),
            ("DB_USERNAME", "reader"),
            ("DB_PASSWORD", "secret"),
            ("DB_NAME", "warehouse"),
        ]);

        let mut config = DbaiConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.source.dialect, "mysql");
        assert_eq!(config.source.host, "10.0.0.5");
        assert_eq!(config.source.port, 3307);
        assert_eq!(config.source.username.as_deref(), Some("reader"));
        assert_eq!(config.source.password.as_deref(), Some("secret"));
        assert_eq!(config.source.database.as_deref(), Some("warehouse"));
    }

    #[test]
    fn test_bad_port_override_is_ignored() {
        let mut config = DbaiConfig::default();
        config.apply_overrides(|key| (key == "DB_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.source.port, 5432);
    }
}
