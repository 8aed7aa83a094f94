use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings of one proxy instance. Fixed for the instance's lifetime.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProxySetup {
    pub id: String,
    /// Listen address; empty means all interfaces.
    pub addr: String,
    pub port: u16,
    /// Replaces the client's User-Agent on every request.
    pub user_agent: Option<String>,
    /// Injected into HTML responses; empty disables injection.
    pub payload: String,
    pub upstream_proxy: Option<String>,
    pub username: String,
    pub password: String,
}

impl Default for ProxySetup {
    fn default() -> Self {
        Self {
            id: "cli".to_string(),
            addr: String::new(),
            port: 8080,
            user_agent: None,
            payload: String::new(),
            upstream_proxy: None,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl ProxySetup {
    pub fn listen_addr(&self) -> String {
        let host = match self.addr.as_str() {
            "" => "0.0.0.0",
            addr => addr,
        };
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    pub fn user_agent_override(&self) -> Option<&str> {
        self.user_agent.as_deref().filter(|ua| !ua.is_empty())
    }

    pub fn upstream(&self) -> Option<&str> {
        self.upstream_proxy.as_deref().filter(|u| !u.is_empty())
    }
}

/// Process-wide settings shared by every instance.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HazeConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub verbose: bool,
}

impl Default for HazeConfig {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("cert.pem"),
            key: PathBuf::from("key.pem"),
            verbose: false,
        }
    }
}

/// JSON document describing several instances to run in one process.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub global: HazeConfig,
    #[serde(default)]
    pub instances: Vec<ProxySetup>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(raw)?;
        let mut seen = std::collections::HashSet::new();
        for setup in &file.instances {
            if !seen.insert(setup.id.as_str()) {
                return Err(ConfigError::DuplicateId(setup.id.clone()));
            }
        }
        Ok(file)
    }
}
