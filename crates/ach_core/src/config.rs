use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "ach.toml";
pub const DEFAULT_STACK_URL: &str = "http://cozy.tools:8080";
pub const DEFAULT_USER_AGENT: &str = "ach/0.2";
pub const DEFAULT_BOUNCE_HOST: &str = "bounce2";
pub const DEFAULT_ADMIN_REMOTE_PORT: u16 = 6060;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AchConfig {
    #[serde(default)]
    pub stack: StackSection,
    #[serde(default)]
    pub admin: BTreeMap<String, AdminEnvConfig>,
    #[serde(default)]
    pub tunnel: TunnelSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StackSection {
    pub url: Option<String>,
    pub token: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub page_size: Option<usize>,
}

/// Administrative endpoint of one environment (e.g. `prod`, `int`).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AdminEnvConfig {
    pub admin_url: String,
    pub admin_auth: String,
    pub host: Option<String>,
    /// Instance domain suffixes served by this environment.
    #[serde(default)]
    pub domains: Vec<String>,
    pub logs: Option<LogsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LogsConfig {
    pub user: String,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TunnelSection {
    pub bounce_host: Option<String>,
    pub remote_port: Option<u16>,
    pub settle_ms: Option<u64>,
}

impl TunnelSection {
    pub fn bounce_host(&self) -> &str {
        self.bounce_host.as_deref().unwrap_or(DEFAULT_BOUNCE_HOST)
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port.unwrap_or(DEFAULT_ADMIN_REMOTE_PORT)
    }

    pub fn settle_ms(&self) -> u64 {
        self.settle_ms.unwrap_or(1_000)
    }
}

impl StackSection {
    /// Resolve the stack URL: flag > env ACH_URL > config > DEFAULT_STACK_URL.
    pub fn url(&self, flag: Option<&str>) -> String {
        if let Some(value) = flag.map(str::trim).filter(|value| !value.is_empty()) {
            return value.to_string();
        }
        env_string("ACH_URL")
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| DEFAULT_STACK_URL.to_string())
    }

    /// Resolve the stack token: env ACH_TOKEN > config.
    pub fn token(&self) -> Option<String> {
        env_string("ACH_TOKEN").or_else(|| self.token.clone())
    }

    pub fn user_agent(&self) -> String {
        env_string("ACH_USER_AGENT")
            .or_else(|| self.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        env_parsed("ACH_HTTP_TIMEOUT_MS")
            .or(self.timeout_ms)
            .unwrap_or(30_000)
    }

    pub fn retries(&self) -> usize {
        env_parsed("ACH_HTTP_RETRIES").or(self.retries).unwrap_or(2)
    }

    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_delay_ms.unwrap_or(500)
    }

    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(1_000)
    }
}

impl AchConfig {
    pub fn admin_for_env(&self, env_name: &str) -> Result<&AdminEnvConfig> {
        self.admin.get(env_name).ok_or_else(|| {
            anyhow::anyhow!(
                "no [admin.{env_name}] section in config (known: {})",
                known_envs(self)
            )
        })
    }

    /// Environment whose `domains` suffix-matches `domain`.
    pub fn admin_for_domain(&self, domain: &str) -> Result<(&str, &AdminEnvConfig)> {
        let domain = domain.trim().trim_start_matches("https://");
        self.admin
            .iter()
            .find(|(_, config)| {
                config
                    .domains
                    .iter()
                    .any(|suffix| domain == suffix || domain.ends_with(&format!(".{suffix}")))
            })
            .map(|(name, config)| (name.as_str(), config))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no admin environment serves {domain} (known: {})",
                    known_envs(self)
                )
            })
    }
}

impl AdminEnvConfig {
    /// Local port of `admin_url`, used as the tunnel's listening port.
    pub fn local_port(&self) -> Result<u16> {
        let port = self
            .admin_url
            .trim_end_matches('/')
            .rsplit(':')
            .next()
            .unwrap_or_default();
        port.parse::<u16>()
            .with_context(|| format!("admin_url has no port: {}", self.admin_url))
    }
}

/// Config path: explicit flag > env ACH_CONFIG > `ach.toml` in the working directory.
pub fn resolve_config_path(flag: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(value) = env_string("ACH_CONFIG") {
        return PathBuf::from(value);
    }
    cwd.join(DEFAULT_CONFIG_FILENAME)
}

/// Load and parse an AchConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AchConfig> {
    if !config_path.exists() {
        return Ok(AchConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AchConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn known_envs(config: &AchConfig) -> String {
    if config.admin.is_empty() {
        "<none>".to_string()
    } else {
        config.admin.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}
