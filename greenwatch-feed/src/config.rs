use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::path::Path;
use std::time::Duration;

use greenwatch_core::{EnvCode, Environment};
use greenwatch_tls::TlsConfig;
use serde::Deserialize;

use crate::connection::ReconnectPolicy;

/// Environment variable that overrides the push endpoint URL.
pub const ENDPOINT_ENV: &str = "GREENWATCH_WS_URL";

/// Push endpoint used when neither the environment nor the config names one.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws/sensor_date";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Environments offered for selection.
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    /// Environment selected at startup. Frames for other environments are
    /// ignored once one is selected.
    #[serde(default)]
    pub current_env: Option<EnvCode>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedConfig {
    Websocket {
        /// Push endpoint. `GREENWATCH_WS_URL` takes precedence.
        #[serde(default)]
        url: Option<String>,
        /// Private CA settings for `wss://` endpoints
        #[serde(default)]
        tls: Option<TlsConfig>,
    },
    Mock {
        /// Environment the synthetic frames are tagged with
        env: EnvCode,
        /// Interval in seconds between sensor frames, at least 1
        frame_interval_secs: NonZeroU64,
        /// Number of simulated actuators and sensors
        device_count: usize,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub delay_secs: u64,
    /// Retries after the first failed attempt before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            delay_secs: policy.delay.as_secs(),
            max_attempts: policy.max_attempts,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_secs(self.delay_secs),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8082)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    pub code: EnvCode,
    #[serde(default)]
    pub name: Option<String>,
}

impl From<&EnvironmentConfig> for Environment {
    fn from(config: &EnvironmentConfig) -> Self {
        let env = Environment::new(config.code.clone());
        match &config.name {
            Some(name) => env.with_name(name),
            None => env,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn environments(&self) -> Vec<Environment> {
        self.environments.iter().map(Environment::from).collect()
    }

    /// The startup environment, taking its name from the environment list
    /// when it is listed there.
    pub fn current_environment(&self) -> Option<Environment> {
        let code = self.current_env.as_ref()?;
        let env = self
            .environments
            .iter()
            .find(|env| &env.code == code)
            .map(Environment::from)
            .unwrap_or_else(|| Environment::new(code.clone()));
        Some(env)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::Websocket {
                url: None,
                tls: None,
            },
            reconnect: ReconnectConfig::default(),
            server: ServerConfig::default(),
            environments: Vec::new(),
            current_env: None,
        }
    }
}

/// Pick the push endpoint: the override (normally `GREENWATCH_WS_URL`) wins,
/// then the configured URL, then `DEFAULT_ENDPOINT`. Blank values are
/// skipped.
pub fn resolve_endpoint(override_url: Option<String>, configured: Option<&str>) -> String {
    override_url
        .filter(|url| !url.trim().is_empty())
        .or_else(|| {
            configured
                .filter(|url| !url.trim().is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn websocket_config_parses() {
        let config: Config = toml::from_str(
            r#"
            current_env = "E1"

            [feed]
            type = "websocket"
            url = "wss://telemetry.example.net/ws/sensor_date"

            [feed.tls]
            root_ca = "/etc/greenwatch/ca.pem"

            [reconnect]
            delay_secs = 10

            [server]
            http_addr = "0.0.0.0:9090"

            [[environments]]
            code = "E1"
            name = "Greenhouse 1"

            [[environments]]
            code = "E2"
            "#,
        )
        .unwrap();

        let FeedConfig::Websocket { url, tls } = &config.feed else {
            panic!("expected websocket feed");
        };
        assert_eq!(
            url.as_deref(),
            Some("wss://telemetry.example.net/ws/sensor_date")
        );
        assert!(tls.is_some());

        assert_eq!(config.reconnect.delay_secs, 10);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.server.http_addr.port(), 9090);

        let current = config.current_environment().unwrap();
        assert_eq!(current.code.as_str(), "E1");
        assert_eq!(current.name.as_deref(), Some("Greenhouse 1"));
        assert_eq!(config.environments().len(), 2);
    }

    #[test]
    fn mock_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [feed]
            type = "mock"
            env = "E1"
            frame_interval_secs = 2
            device_count = 4
            "#,
        )
        .unwrap();

        let FeedConfig::Mock {
            frame_interval_secs,
            device_count,
            ..
        } = config.feed
        else {
            panic!("expected mock feed");
        };
        assert_eq!(frame_interval_secs.get(), 2);
        assert_eq!(device_count, 4);
        assert_eq!(config.reconnect.policy(), ReconnectPolicy::default());
        assert_eq!(config.server.http_addr, ServerConfig::default().http_addr);
        assert!(config.current_environment().is_none());
    }

    #[test]
    fn zero_mock_interval_is_rejected() {
        let parsed = toml::from_str::<Config>(
            r#"
            [feed]
            type = "mock"
            env = "E1"
            frame_interval_secs = 0
            device_count = 1
            "#,
        );

        assert!(parsed.is_err());
    }

    #[test]
    fn unlisted_current_env_has_no_name() {
        let config = Config {
            current_env: Some(EnvCode::from("E7")),
            ..Config::default()
        };

        let env = config.current_environment().unwrap();
        assert_eq!(env.code.as_str(), "E7");
        assert_eq!(env.name, None);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\ntype = \"websocket\"").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert!(matches!(config.feed, FeedConfig::Websocket { url: None, .. }));
    }

    #[test]
    fn endpoint_precedence() {
        assert_eq!(
            resolve_endpoint(Some("ws://env:1/ws".into()), Some("ws://file:2/ws")),
            "ws://env:1/ws"
        );
        assert_eq!(
            resolve_endpoint(Some("  ".into()), Some("ws://file:2/ws")),
            "ws://file:2/ws"
        );
        assert_eq!(resolve_endpoint(None, Some("")), DEFAULT_ENDPOINT);
        assert_eq!(resolve_endpoint(None, None), DEFAULT_ENDPOINT);
    }
}
