//! Server configuration: TOML file + CLI overrides.

use camtune_core::messages::{COMMAND_PORT, DEFAULT_MAX_PAYLOAD, PREVIEW_PORT};
use camtune_core::{TuneError, TuneResult};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    #[serde(default = "default_preview_port")]
    pub preview_port: u16,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u32,
    /// Seconds of silence before a client is dropped; 0 disables the check.
    #[serde(default)]
    pub client_idle_timeout: u64,
    /// Seconds a client may leave a response unread before it is dropped.
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            command_port: default_command_port(),
            preview_port: default_preview_port(),
            max_payload: default_max_payload(),
            max_chunk_size: default_max_chunk_size(),
            client_idle_timeout: 0,
            write_timeout: default_write_timeout(),
        }
    }
}

/// `[pipeline]` section: geometry of the simulated sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_width")]
    pub width: u16,
    #[serde(default = "default_height")]
    pub height: u16,
}

impl PipelineSection {
    /// Bytes in one NV21 frame (12 bits per pixel).
    pub fn frame_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 3 / 2
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_command_port() -> u16 {
    COMMAND_PORT
}
fn default_preview_port() -> u16 {
    PREVIEW_PORT
}
fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}
fn default_max_chunk_size() -> u32 {
    1 << 20
}
fn default_write_timeout() -> u64 {
    10
}
fn default_width() -> u16 {
    640
}
fn default_height() -> u16 {
    480
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<IpAddr>,
    pub command_port: Option<u16>,
    pub preview_port: Option<u16>,
    pub max_payload: Option<usize>,
    pub client_idle_timeout: Option<u64>,
    pub write_timeout: Option<u64>,
}

/// Resolved server configuration (file values with CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub command_port: u16,
    pub preview_port: u16,
    pub max_payload: usize,
    pub max_chunk_size: u32,
    pub client_idle_timeout: Option<Duration>,
    pub write_timeout: Duration,
    pub pipeline: PipelineSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(ConfigFile::default(), &ConfigOverrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> TuneResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| TuneError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let config = Self::resolve(file_config, overrides);
        config.validate()?;
        Ok(config)
    }

    fn resolve(file: ConfigFile, overrides: &ConfigOverrides) -> Self {
        let idle = overrides
            .client_idle_timeout
            .unwrap_or(file.server.client_idle_timeout);
        Self {
            bind: overrides.bind.unwrap_or(file.server.bind),
            command_port: overrides.command_port.unwrap_or(file.server.command_port),
            preview_port: overrides.preview_port.unwrap_or(file.server.preview_port),
            max_payload: overrides.max_payload.unwrap_or(file.server.max_payload),
            max_chunk_size: file.server.max_chunk_size,
            client_idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            write_timeout: Duration::from_secs(
                overrides.write_timeout.unwrap_or(file.server.write_timeout),
            ),
            pipeline: file.pipeline,
        }
    }

    fn validate(&self) -> TuneResult<()> {
        if self.command_port != 0 && self.command_port == self.preview_port {
            return Err(TuneError::Config(format!(
                "command and preview channels cannot share port {}",
                self.command_port
            )));
        }
        if self.max_chunk_size == 0 {
            return Err(TuneError::Config("max_chunk_size must be positive".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(TuneError::Config("write_timeout must be positive".into()));
        }
        if self.pipeline.width == 0 || self.pipeline.height == 0 {
            return Err(TuneError::Config("pipeline geometry must be non-zero".into()));
        }
        // Frame sizes travel as u32 in the capabilities record.
        if self.pipeline.frame_size() > u64::from(u32::MAX) {
            return Err(TuneError::Config(format!(
                "pipeline geometry {}x{} gives frames larger than 4 GiB",
                self.pipeline.width, self.pipeline.height
            )));
        }
        Ok(())
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
