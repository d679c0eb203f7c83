//! Configuration loading for havoc.
//!
//! Configuration is loaded from a TOML file (default: `havoc.toml`). Every
//! section and field is optional; CLI flags override what the file says.

use havoc_core::{HelperImage, DEFAULT_STRESS_IMAGE};
use havoc_runtime::{ContainerdRuntime, CtrBinary, DockerRuntime, Engine, Runtime, RuntimeError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "havoc.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration for havoc.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Container engine selection.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Scheduling behaviour.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Helper container images and teardown bounds.
    #[serde(default)]
    pub helpers: HelpersConfig,
    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

/// Container engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Engine to drive (default: docker).
    #[serde(default)]
    pub engine: Engine,
    /// Docker daemon address (default: unix:///var/run/docker.sock).
    #[serde(default = "default_docker_host")]
    pub docker_host: String,
    /// containerd socket (default: /run/containerd/containerd.sock).
    #[serde(default = "default_containerd_address")]
    pub containerd_address: String,
    /// containerd namespace (default: k8s.io).
    #[serde(default = "default_containerd_namespace")]
    pub containerd_namespace: String,
    /// `ctr` binary (default: ctr).
    #[serde(default = "default_ctr_binary")]
    pub ctr_binary: String,
}

/// Scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Time between ticks (default: 0 = run once).
    #[serde(default, with = "humantime_serde")]
    pub interval: Duration,
    /// Log side effects instead of performing them.
    #[serde(default)]
    pub dry_run: bool,
    /// Keep ticking after a failed batch.
    #[serde(default)]
    pub skip_error: bool,
    /// Pick one random matching container per tick.
    #[serde(default)]
    pub random: bool,
    /// Give each target its own apply/hold/revert clock.
    #[serde(default)]
    pub per_target: bool,
    /// Bound on each revert (default: 30s).
    #[serde(default = "default_revert_timeout", with = "humantime_serde")]
    pub revert_timeout: Duration,
}

/// Helper container configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HelpersConfig {
    /// Sidecar image with `tc`. Unset runs `tc` inside the target.
    #[serde(default)]
    pub tc_image: Option<String>,
    /// Sidecar image with `iptables`. Unset runs `iptables` inside the target.
    #[serde(default)]
    pub iptables_image: Option<String>,
    /// Image with `stress-ng` (default: ghcr.io/alexei-led/stress-ng:latest).
    #[serde(default = "default_stress_image")]
    pub stress_image: String,
    /// Pull helper images before use.
    #[serde(default)]
    pub pull: bool,
    /// Wait for a helper to exit after SIGTERM before SIGKILL (default: 10s).
    #[serde(default = "default_teardown_timeout", with = "humantime_serde")]
    pub teardown_timeout: Duration,
    /// Wait for a container to stop after SIGKILL (default: 5s).
    #[serde(default = "default_stop_wait", with = "humantime_serde")]
    pub stop_wait: Duration,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset (default: info).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines.
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_docker_host() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_containerd_address() -> String {
    havoc_runtime::containerd::ctr::DEFAULT_ADDRESS.to_string()
}

fn default_containerd_namespace() -> String {
    havoc_runtime::containerd::ctr::DEFAULT_NAMESPACE.to_string()
}

fn default_ctr_binary() -> String {
    havoc_runtime::containerd::ctr::DEFAULT_CTR.to_string()
}

fn default_revert_timeout() -> Duration {
    crate::orchestrator::DEFAULT_REVERT_TIMEOUT
}

fn default_stress_image() -> String {
    DEFAULT_STRESS_IMAGE.to_string()
}

fn default_teardown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_stop_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            docker_host: default_docker_host(),
            containerd_address: default_containerd_address(),
            containerd_namespace: default_containerd_namespace(),
            ctr_binary: default_ctr_binary(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            dry_run: false,
            skip_error: false,
            random: false,
            per_target: false,
            revert_timeout: default_revert_timeout(),
        }
    }
}

impl Default for HelpersConfig {
    fn default() -> Self {
        Self {
            tc_image: None,
            iptables_image: None,
            stress_image: default_stress_image(),
            pull: false,
            teardown_timeout: default_teardown_timeout(),
            stop_wait: default_stop_wait(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// values are inconsistent.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `havoc.toml` if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "log.level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.log.level
            )));
        }
        if self.schedule.revert_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "schedule.revert_timeout must be positive".into(),
            ));
        }
        if self.helpers.teardown_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "helpers.teardown_timeout must be positive".into(),
            ));
        }
        if self.helpers.stress_image.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "helpers.stress_image must not be empty".into(),
            ));
        }
        if self.runtime.engine == Engine::Containerd && self.runtime.containerd_namespace.is_empty()
        {
            return Err(ConfigError::Invalid(
                "runtime.containerd_namespace must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Sidecar for `tc`, if configured.
    pub fn tc_helper(&self) -> Option<HelperImage> {
        HelperImage::optional(self.helpers.tc_image.clone(), self.helpers.pull)
    }

    /// Sidecar for `iptables`, if configured.
    pub fn iptables_helper(&self) -> Option<HelperImage> {
        HelperImage::optional(self.helpers.iptables_image.clone(), self.helpers.pull)
    }

    /// Connect to the configured engine.
    ///
    /// Dry run is applied by the scheduler, not here.
    pub fn connect(&self) -> Result<Arc<dyn Runtime>, RuntimeError> {
        let runtime: Arc<dyn Runtime> = match self.runtime.engine {
            Engine::Docker => Arc::new(DockerRuntime::connect(
                &self.runtime.docker_host,
                self.helpers.stop_wait,
            )?),
            Engine::Containerd => {
                let ctr = CtrBinary::new(
                    self.runtime.ctr_binary.clone(),
                    self.runtime.containerd_address.clone(),
                    self.runtime.containerd_namespace.clone(),
                );
                Arc::new(ContainerdRuntime::new(
                    Arc::new(ctr),
                    self.helpers.teardown_timeout,
                    self.helpers.stop_wait,
                ))
            }
        };
        Ok(runtime)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Values parsed but are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
