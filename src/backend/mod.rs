//! Native capture backends
//!
//! A backend enumerates devices, activates one as a [`NativeSource`] and
//! supplies the transform stages its samples need. The active backend is
//! chosen at runtime from [`BackendKind`].

pub mod simulated;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::format::{DeviceDescriptor, FormatSelection};
use crate::property::ControlSurface;
use crate::transform::{MediaType, NativeStatus, Sample, TransformFactory};
use crate::Config;

pub use simulated::{SimulatedBackend, SimulatedDeviceConfig};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Simulated,
    V4l2,
}

/// Entry point into one native capture subsystem.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Devices in native enumeration order.
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open the native source behind `device`. Fails with
    /// [`CaptureError::DeviceUnavailable`].
    fn activate(&self, device: &DeviceDescriptor) -> Result<Box<dyn NativeSource>>;

    fn transform_factory(&self) -> Arc<dyn TransformFactory>;
}

/// An activated, not yet streaming, native source.
pub trait NativeSource: Send {
    /// Make the selected format current and report the media type that
    /// samples will arrive in.
    fn configure(&mut self, selection: FormatSelection) -> std::result::Result<MediaType, NativeStatus>;

    /// Lens and exposure controls. Every working source has them.
    fn lens_controls(&self) -> Option<Arc<dyn ControlSurface>>;

    /// Image processing controls, if the device has any.
    fn image_controls(&self) -> Option<Arc<dyn ControlSurface>>;

    /// Begin delivery. The reader is moved onto the producer thread.
    fn start(&mut self) -> std::result::Result<Box<dyn SampleReader>, NativeStatus>;
}

/// What one read from the native stream produced.
#[derive(Debug)]
pub enum ReadEvent {
    Sample(Sample),
    /// The source signalled a gap without data; request the next sample.
    Tick,
    EndOfStream,
}

/// Blocking sample reader owned by the producer thread.
pub trait SampleReader: Send {
    /// Wait up to `timeout` for the next event. A timeout is reported as a
    /// [`ReadEvent::Tick`].
    fn read_sample(&mut self, timeout: Duration) -> std::result::Result<ReadEvent, NativeStatus>;
}

/// Build the backend selected in `config`.
pub fn create_backend(config: &Config) -> Result<Arc<dyn CaptureBackend>> {
    match config.backend.kind {
        BackendKind::Simulated => Ok(Arc::new(SimulatedBackend::from_config(&config.simulated))),
        #[cfg(feature = "v4l2")]
        BackendKind::V4l2 => Ok(Arc::new(V4l2Backend::new())),
        #[cfg(not(feature = "v4l2"))]
        BackendKind::V4l2 => Err(CaptureError::Config(::config::ConfigError::Message(
            "backend \"v4l2\" requires building with the `v4l2` feature".into(),
        ))),
    }
}
