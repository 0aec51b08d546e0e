//! Configuration for the mock server.
//!
//! Defines where route templates live, where to listen, and how the proxy
//! passthrough and logging behave.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Main configuration for the mock server.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Root directory of the route table
    #[serde(default = "default_resources_path", alias = "MOCK_RESOURCES_PATH")]
    pub resources_path: PathBuf,

    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port", alias = "MOCK_PORT")]
    pub port: u16,

    /// Proxy passthrough settings
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            resources_path: default_resources_path(),
            host: default_host(),
            port: default_port(),
            proxy: ProxySettings::default(),
            settings: GlobalSettings::default(),
        }
    }
}

/// Configuration files tried, in order, when none is named explicitly.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["mock-server.yaml", "config.json"];

impl MockServerConfig {
    /// Pick the configuration file to load.
    ///
    /// An explicit path is used as given. Otherwise the first existing entry
    /// of [`DEFAULT_CONFIG_FILES`] under `dir` is chosen.
    pub fn locate(explicit: Option<&Path>, dir: &Path) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Load configuration from a YAML (or JSON) file.
    ///
    /// Only the shape of the file is checked here; call [`validate`](Self::validate)
    /// once command-line overrides have been applied.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port must be non-zero");
        }
        if self.proxy.timeout_ms == 0 {
            anyhow::bail!("Proxy timeout must be greater than zero");
        }
        if !self.resources_path.is_dir() {
            anyhow::bail!(
                "Resources path is not a directory: {}",
                self.resources_path.display()
            );
        }
        self.socket_addr()?;
        Ok(())
    }

    /// Address the HTTP listener binds to.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}:{}: {}", self.host, self.port, e))
    }
}

fn default_resources_path() -> PathBuf {
    PathBuf::from("resources")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2333
}

/// Proxy passthrough settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    /// Timeout for the outbound call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log every resolved response body at debug level
    #[serde(default = "default_true")]
    pub log_responses: bool,

    /// Rebuild the route table when the resources directory changes
    #[serde(default)]
    pub watch: bool,

    /// Body returned for `GET /`
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Largest request body accepted, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_responses: true,
            watch: false,
            greeting: default_greeting(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_greeting() -> String {
    "Naïve Easy Mock!".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
resources_path: /srv/mock
port: 8080
proxy:
  timeout_ms: 500
settings:
  watch: true
  greeting: "hi"
"#;
        let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.resources_path, PathBuf::from("/srv/mock"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.proxy.timeout_ms, 500);
        assert!(config.settings.watch);
        assert!(config.settings.log_responses);
        assert_eq!(config.settings.greeting, "hi");
    }

    #[test]
    fn test_parse_legacy_json_keys() {
        let json = r#"{ "MOCK_RESOURCES_PATH": "./mocks", "MOCK_PORT": 3000 }"#;
        let config: MockServerConfig = serde_yaml::from_str(json).unwrap();
        assert_eq!(config.resources_path, PathBuf::from("./mocks"));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_defaults() {
        let config = MockServerConfig::default();
        assert_eq!(config.port, 2333);
        assert_eq!(config.resources_path, PathBuf::from("resources"));
        assert_eq!(config.proxy.timeout_ms, 30_000);
        assert!(!config.settings.watch);
        assert_eq!(config.settings.greeting, "Naïve Easy Mock!");
        assert_eq!(config.socket_addr().unwrap().port(), 2333);
    }

    #[test]
    fn test_locate_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(MockServerConfig::locate(None, dir.path()), None);

        std::fs::write(dir.path().join("config.json"), r#"{"MOCK_PORT": 4000}"#).unwrap();
        let found = MockServerConfig::locate(None, dir.path()).unwrap();
        assert_eq!(found, dir.path().join("config.json"));
        assert_eq!(MockServerConfig::from_file(&found).unwrap().port, 4000);

        std::fs::write(dir.path().join("mock-server.yaml"), "port: 5000\n").unwrap();
        assert_eq!(
            MockServerConfig::locate(None, dir.path()),
            Some(dir.path().join("mock-server.yaml"))
        );

        let explicit = dir.path().join("other.yaml");
        assert_eq!(
            MockServerConfig::locate(Some(&explicit), dir.path()),
            Some(explicit.clone())
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "prot: 80\n";
        assert!(serde_yaml::from_str::<MockServerConfig>(yaml).is_err());
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MockServerConfig {
            resources_path: dir.path().to_path_buf(),
            ..MockServerConfig::default()
        };
        assert!(config.validate().is_ok());

        config.port = 0;
        assert!(config.validate().is_err());

        config.port = 2333;
        config.resources_path = dir.path().join("missing");
        assert!(config.validate().is_err());

        config.resources_path = dir.path().to_path_buf();
        config.host = "not an address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock-server.yaml");
        std::fs::write(&path, "port: 4000\n").unwrap();
        let config = MockServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 4000);
    }
}
