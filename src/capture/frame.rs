use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::format::FourCC;

/// One published output frame: top-down RGB24, tightly packed.
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data, shared between producer and store without copying
    pub data: Bytes,

    pub meta: Arc<FrameMetadata>,
}

#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Native layout the frame was converted from
    pub source_format: FourCC,
    pub device_timestamp: Option<Duration>, // Sample time reported by the source
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, meta: FrameMetadata) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(meta),
        }
    }

    /// Size every frame of this geometry must have.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() == Self::expected_len(self.meta.width, self.meta.height)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}
