//! Configuration file handling
//!
//! ```toml
//! [defaults]
//! local_host = "127.0.0.1"
//! recv_timeout = 5000
//!
//! [client_defaults]
//! destaddr = "10.0.0.5:5060"
//!
//! [runner]
//! timeout_secs = 60
//!
//! [scenario]
//! autolocalsocks = false
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::Settings;
use crate::hooks::ScenarioConfig;
use crate::launch::{RunOptions, RunnerConfig};
use crate::scenario::ScenarioOptions;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Settings applied to every agent
    #[serde(default)]
    pub defaults: toml::Table,

    /// Settings applied to client agents
    #[serde(default)]
    pub client_defaults: toml::Table,

    /// Settings applied to server agents
    #[serde(default)]
    pub server_defaults: toml::Table,

    /// Run and timeout escalation settings
    #[serde(default)]
    pub runner: RunnerSettings,

    /// Scenario assembly settings
    #[serde(default)]
    pub scenario: ScenarioSettings,
}

/// Run settings, durations in seconds
#[derive(Debug, Deserialize)]
pub struct RunnerSettings {
    /// Deadline for a whole run
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Agent launches per second
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Wait after the first SIGUSR1 on timeout
    #[serde(default = "default_grace")]
    pub grace_secs: u64,

    /// Further SIGUSR1 attempts before SIGTERM
    #[serde(default = "default_stop_retries")]
    pub stop_retries: u32,

    #[serde(default = "default_retry_wait")]
    pub retry_wait_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            rate: default_rate(),
            grace_secs: default_grace(),
            stop_retries: default_stop_retries(),
            retry_wait_secs: default_retry_wait(),
        }
    }
}

fn default_timeout() -> u64 {
    180
}
fn default_rate() -> f64 {
    300.0
}
fn default_grace() -> u64 {
    10
}
fn default_stop_retries() -> u32 {
    3
}
fn default_retry_wait() -> u64 {
    1
}

/// Scenario assembly settings
#[derive(Debug, Deserialize)]
pub struct ScenarioSettings {
    /// Allocate local sockets for agents lacking them
    #[serde(default = "default_autolocalsocks")]
    pub autolocalsocks: bool,

    /// Directory agent logs are written to
    #[serde(default)]
    pub logdir: Option<PathBuf>,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            autolocalsocks: default_autolocalsocks(),
            logdir: None,
        }
    }
}

fn default_autolocalsocks() -> bool {
    true
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        if config.runner.rate < 0.0 {
            return Err(Error::ConfigParse(format!(
                "runner.rate must not be negative, got {}",
                config.runner.rate
            )));
        }
        Ok(config)
    }

    /// Default layers for scenario construction; setting keys are validated
    pub fn scenario_options(&self) -> Result<ScenarioOptions> {
        let table = |t: &toml::Table| -> Result<Option<Settings>> {
            if t.is_empty() {
                Ok(None)
            } else {
                Settings::from_toml(t).map(Some)
            }
        };

        Ok(ScenarioOptions {
            defaults: Settings::from_toml(&self.defaults)?,
            client_defaults: table(&self.client_defaults)?,
            server_defaults: table(&self.server_defaults)?,
            logdir: self.scenario.logdir.clone(),
        })
    }

    pub fn scenario_config(&self) -> Result<ScenarioConfig> {
        Ok(ScenarioConfig {
            autolocalsocks: self.scenario.autolocalsocks,
            options: self.scenario_options()?,
            ..Default::default()
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            grace: Duration::from_secs(self.runner.grace_secs),
            stop_retries: self.runner.stop_retries,
            retry_wait: Duration::from_secs(self.runner.retry_wait_secs),
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: Duration::from_secs(self.runner.timeout_secs),
            rate: self.runner.rate,
            raise_exc: true,
            runner: self.runner_config(),
        }
    }
}
