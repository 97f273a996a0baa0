//! Application configuration for Lakeflow.
//!
//! User config lives at `~/.lakeflow/lakeflow.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file: connections name the environment
//! variables that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LakeflowError, Result};
use crate::types::{Connection, Credentials};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "lakeflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".lakeflow";

// ---------------------------------------------------------------------------
// Config structs (matching lakeflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// HTTP client settings.
    #[serde(default)]
    pub http: HttpSettings,

    /// Configured data source connections.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Items requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum tasks of one stage running at once.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            page_size: default_page_size(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

fn default_database_path() -> String {
    "~/.lakeflow/lakeflow.db".into()
}
fn default_page_size() -> u32 {
    100
}
fn default_max_concurrent_tasks() -> u32 {
    4
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum ms between two requests of one client.
    #[serde(default)]
    pub rate_limit_ms: u64,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            rate_limit_ms: 0,
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("Lakeflow/", env!("CARGO_PKG_VERSION")).into()
}

/// `[[connections]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection id referenced by blueprints and task options.
    pub id: u64,
    /// Plugin that owns the connection (`bitbucket`, `gitlab`, ...).
    pub plugin: String,
    /// API base URL.
    pub endpoint: String,
    /// Username for basic auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Env var holding the basic-auth password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// Env var holding a bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl ConnectionConfig {
    /// Materialise the connection, reading secrets from the environment.
    pub fn resolve(&self) -> Result<Connection> {
        let mut endpoint = Url::parse(&self.endpoint).map_err(|e| {
            LakeflowError::config(format!(
                "connection {}: invalid endpoint `{}`: {e}",
                self.id, self.endpoint
            ))
        })?;
        // Relative API paths are joined onto the endpoint, which needs a
        // trailing slash to keep its last segment.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let credentials = match (&self.username, &self.password_env, &self.token_env) {
            (Some(username), Some(var), _) => Credentials::Basic {
                username: username.clone(),
                password: read_secret(self.id, var)?,
            },
            (_, _, Some(var)) => Credentials::Token(read_secret(self.id, var)?),
            (Some(_), None, None) => {
                return Err(LakeflowError::config(format!(
                    "connection {}: username given without password_env",
                    self.id
                )));
            }
            _ => Credentials::None,
        };

        Ok(Connection {
            id: self.id,
            plugin: self.plugin.clone(),
            endpoint,
            credentials,
        })
    }
}

fn read_secret(connection_id: u64, var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(LakeflowError::config(format!(
            "connection {connection_id}: secret not found. Set the {var_name} environment variable."
        ))),
    }
}

impl AppConfig {
    /// Find and resolve the connection with `id`.
    pub fn connection(&self, id: u64) -> Result<Connection> {
        self.connections
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| LakeflowError::config(format!("connection {id} is not configured")))?
            .resolve()
    }

    /// Database path with a leading `~` expanded.
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_home(&self.defaults.database_path)
    }
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| LakeflowError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.lakeflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LakeflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.lakeflow/lakeflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LakeflowError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LakeflowError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LakeflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LakeflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LakeflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("page_size"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.page_size, 100);
        assert_eq!(parsed.defaults.max_concurrent_tasks, 4);
        assert_eq!(parsed.http.timeout_secs, 30);
        assert!(parsed.http.user_agent.starts_with("Lakeflow/"));
    }

    #[test]
    fn config_with_connections() {
        let toml_str = r#"
[defaults]
page_size = 50

[[connections]]
id = 1
plugin = "bitbucket"
endpoint = "https://api.bitbucket.org/2.0"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.page_size, 50);
        assert_eq!(config.connections.len(), 1);

        let connection = config.connection(1).expect("resolve");
        assert_eq!(connection.plugin, "bitbucket");
        assert_eq!(connection.endpoint.as_str(), "https://api.bitbucket.org/2.0/");
        assert_eq!(connection.credentials, Credentials::None);

        assert!(config.connection(9).is_err());
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        let entry = ConnectionConfig {
            id: 3,
            plugin: "gitlab".into(),
            endpoint: "https://gitlab.example.com/api/v4/".into(),
            username: None,
            password_env: None,
            // Unique name so parallel tests never set it
            token_env: Some("LAKEFLOW_TEST_NONEXISTENT_TOKEN_93821".into()),
        };
        let err = entry.resolve().unwrap_err();
        assert!(err.to_string().contains("LAKEFLOW_TEST_NONEXISTENT_TOKEN_93821"));
    }

    #[test]
    fn username_without_password_is_rejected() {
        let entry = ConnectionConfig {
            id: 4,
            plugin: "bitbucket".into(),
            endpoint: "https://api.bitbucket.org/2.0/".into(),
            username: Some("alice".into()),
            password_env: None,
            token_env: None,
        };
        assert!(entry.resolve().is_err());
    }

    #[test]
    fn relative_database_path_is_kept() {
        let mut config = AppConfig::default();
        config.defaults.database_path = "var/lake.db".into();
        assert_eq!(config.database_path().unwrap(), PathBuf::from("var/lake.db"));
    }
}
