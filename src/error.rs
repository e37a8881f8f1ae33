//! Error taxonomy shared by the negotiation, transform, session and property layers

use thiserror::Error;

use crate::format::FourCC;
use crate::property::PropertyId;
use crate::transform::{NativeStatus, TransformStage};

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Native activation of the device failed (unplugged, busy, bad path).
    #[error("device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// No transform pipeline could be built for the negotiated native format.
    #[error("unsupported format {fourcc}: {reason}")]
    UnsupportedFormat { fourcc: FourCC, reason: String },

    /// A decode or normalize stage rejected a sample.
    #[error("{stage} stage failed with status {status}")]
    TransformFailure {
        stage: TransformStage,
        status: NativeStatus,
    },

    /// End of stream or device removal; the session must be closed.
    #[error("stream stopped")]
    StreamStopped,

    #[error("stream is not open")]
    NotOpen,

    #[error("frame buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("invalid property id {0}")]
    InvalidProperty(u32),

    #[error("property {0:?} is not supported by this device")]
    PropertyUnsupported(PropertyId),

    #[error("control {property:?} failed with status {status}")]
    ControlFailure {
        property: PropertyId,
        status: NativeStatus,
    },

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("unknown stream {0}")]
    UnknownStream(u32),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl CaptureError {
    pub fn device_unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported_format(fourcc: FourCC, reason: impl ToString) -> Self {
        Self::UnsupportedFormat {
            fourcc,
            reason: reason.to_string(),
        }
    }
}
