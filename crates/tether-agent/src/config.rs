use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use libtether::SupervisorConfig;

/// All knobs are fixed at process start; there is no runtime
/// reconfiguration. Loaded from the config file if present, then the
/// controller endpoint may be overridden through the environment
/// (`TETHER_CONTROLLER_HOST`, `TETHER_CONTROLLER_PORT`).
#[derive(Deserialize, Debug, Clone)]
pub struct AgentConfig {
    pub controller_host: String,
    pub controller_port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

impl AgentConfig {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("TETHER_CONFIG") {
            Ok(path) => Self::load_file(PathBuf::from(path))?,
            Err(_) => {
                let path = Self::config_path();
                if path.exists() {
                    Self::load_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(host) = std::env::var("TETHER_CONTROLLER_HOST") {
            config.controller_host = host;
        }
        if let Ok(port) = std::env::var("TETHER_CONTROLLER_PORT") {
            config.controller_port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid TETHER_CONTROLLER_PORT: {port}"))?;
        }
        Ok(config)
    }

    fn load_file(path: PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn config_path() -> PathBuf {
        if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(config_dir).join("tether").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("tether")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/tether/config.toml")
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            host: self.controller_host.clone(),
            port: self.controller_port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            controller_host: "127.0.0.1".to_string(),
            controller_port: 9700,
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            worker_count: default_worker_count(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_worker_count() -> usize {
    4
}
