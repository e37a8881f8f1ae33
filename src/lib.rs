pub mod backend;
pub mod capture;
pub mod error;
pub mod format;
pub mod property;
pub mod transform;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use backend::{BackendKind, CaptureBackend, SimulatedBackend, SimulatedDeviceConfig};
pub use capture::{Context, Frame, StreamId, StreamSession};
pub use error::{CaptureError, Result};
pub use format::{DeviceDescriptor, FormatDescriptor, FormatRequest, FormatSelection, FourCC, FrameRate};
pub use property::{PropertyAdapter, PropertyId, PropertyRange};
pub use transform::{TransformPipeline, TransformStage};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `VIDCAP__STREAM__CLOSE_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "VIDCAP";

/// Library configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub stream: StreamConfig,
    pub capture: CaptureConfig,
    pub log: LogConfig,
    /// Devices for the simulated backend; empty means the built-in set
    pub simulated: Vec<SimulatedDeviceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub close_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

/// The stream the demo binary opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: usize,
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub fps: f32,
    /// Frames to grab before exiting
    pub frames: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: 1000,
            read_timeout_ms: 100,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: 640,
            height: 480,
            fourcc: FourCC::YUY2,
            fps: 30.0,
            frames: 90,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "vidcap=info".into(),
        }
    }
}

impl Config {
    /// Defaults, then `path` if given, then `VIDCAP__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Parse a TOML document layered over the defaults, without touching the
    /// environment.
    pub fn from_toml(text: &str) -> Result<Config> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
