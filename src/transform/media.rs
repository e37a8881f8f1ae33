//! Media types, samples and the stage interface the pipeline drives

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::format::{FormatDescriptor, FourCC, FrameRate};

/// A native status code as reported by the platform (HRESULT style).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeStatus(pub i32);

impl NativeStatus {
    pub const FAIL: NativeStatus = NativeStatus(0x8000_4005_u32 as i32);
    pub const INVALID_ARG: NativeStatus = NativeStatus(0x8007_0057_u32 as i32);
    pub const NOT_IMPLEMENTED: NativeStatus = NativeStatus(0x8000_4001_u32 as i32);
    pub const INVALID_MEDIA_TYPE: NativeStatus = NativeStatus(0xC00D_36B4_u32 as i32);
    pub const NOT_ACCEPTING: NativeStatus = NativeStatus(0xC00D_36B5_u32 as i32);
    pub const NEED_MORE_INPUT: NativeStatus = NativeStatus(0xC00D_6D72_u32 as i32);
    pub const NO_MORE_TYPES: NativeStatus = NativeStatus(0xC00D_36B9_u32 as i32);
    pub const INVALID_STREAM_DATA: NativeStatus = NativeStatus(0xC00D_36CB_u32 as i32);
    pub const BUFFER_TOO_SMALL: NativeStatus = NativeStatus(0xC00D_36B1_u32 as i32);
    pub const TYPE_NOT_SET: NativeStatus = NativeStatus(0xC00D_6D60_u32 as i32);
    pub const END_OF_STREAM: NativeStatus = NativeStatus(0xC00D_3E84_u32 as i32);
    pub const DEVICE_REMOVED: NativeStatus = NativeStatus(0xC00D_3EA2_u32 as i32);
    pub const TIMEOUT: NativeStatus = NativeStatus(0x8000_05B4_u32 as i32);
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl fmt::Debug for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeStatus({self})")
    }
}

/// Description of the samples flowing into or out of a stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaType {
    pub subtype: FourCC,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Depth for layouts whose code does not imply it (DirectShow `RGB `).
    pub bits_per_pixel: Option<u32>,
}

impl MediaType {
    pub fn new(subtype: FourCC, width: u32, height: u32) -> Self {
        Self {
            subtype,
            width,
            height,
            frame_rate: FrameRate::unknown(),
            bits_per_pixel: None,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_bits_per_pixel(mut self, bits: Option<u32>) -> Self {
        self.bits_per_pixel = bits;
        self
    }

    /// The canonical normalize-stage output: uncompressed 24-bit RGB, same geometry.
    pub fn rgb24_like(&self) -> Self {
        MediaType::new(FourCC::RGB24, self.width, self.height).with_frame_rate(self.frame_rate)
    }

    pub fn is_compressed(&self) -> bool {
        self.subtype.is_compressed()
    }

    /// Row pitch of a frame in this layout when the sample does not carry one.
    /// Bottom-up RGB rows are DWORD aligned, as in Windows bitmaps.
    pub fn default_stride(&self) -> usize {
        let width = self.width as usize;
        match self.subtype {
            FourCC::RGB24 => (width * 3 + 3) & !3,
            FourCC::RGB32 | FourCC::ARGB32 => width * 4,
            FourCC::RGB => (width * self.bits_per_pixel.unwrap_or(24) as usize / 8 + 3) & !3,
            FourCC::RGB3 | FourCC::BGR3 => width * 3,
            FourCC::YUY2 | FourCC::YUYV | FourCC::UYVY => width.div_ceil(2) * 4,
            _ => width,
        }
    }

    /// Bytes in one uncompressed frame laid out with [`Self::default_stride`].
    pub fn frame_size(&self) -> Option<usize> {
        let width = self.width as usize;
        let height = self.height as usize;
        let stride = self.default_stride();
        match self.subtype {
            FourCC::RGB24
            | FourCC::RGB32
            | FourCC::ARGB32
            | FourCC::RGB
            | FourCC::RGB3
            | FourCC::BGR3
            | FourCC::YUY2
            | FourCC::YUYV
            | FourCC::UYVY => Some(stride * height),
            FourCC::NV12 => Some(width * height + width.div_ceil(2) * 2 * height.div_ceil(2)),
            FourCC::I420 | FourCC::IYUV => {
                Some(width * height + 2 * width.div_ceil(2) * height.div_ceil(2))
            }
            _ => None,
        }
    }
}

impl From<&FormatDescriptor> for MediaType {
    fn from(format: &FormatDescriptor) -> Self {
        MediaType::new(format.fourcc, format.width, format.height)
            .with_frame_rate(format.frame_rate)
            .with_bits_per_pixel(format.bits_per_pixel)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}",
            self.subtype, self.width, self.height, self.frame_rate
        )
    }
}

/// One unit of media data.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Bytes,
    /// Row pitch in bytes; `None` means rows are tightly packed.
    pub stride: Option<usize>,
    pub timestamp: Option<Duration>,
}

impl Sample {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            stride: None,
            timestamp: None,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Result of pulling output from a stage.
#[derive(Debug)]
pub enum StageOutput {
    Sample(Sample),
    /// The stage buffered the input and has nothing to emit yet.
    NeedMoreInput,
    /// The stage renegotiated its output type mid-stream.
    StreamChange(MediaType),
}

/// One native transform (decoder or video processor).
///
/// Stages follow a set-input, enumerate-output, set-output, then
/// process-input/process-output protocol.
pub trait MediaTransform: Send {
    fn name(&self) -> &str;

    fn set_input_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus>;

    /// Output types this stage can produce for the current input, in the
    /// stage's preference order. Returns `NO_MORE_TYPES` past the end.
    fn output_available_type(&self, index: usize) -> Result<MediaType, NativeStatus>;

    fn set_output_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus>;

    fn process_input(&mut self, sample: &Sample) -> Result<(), NativeStatus>;

    fn process_output(&mut self) -> Result<StageOutput, NativeStatus>;
}

/// Locates stages for the pipeline, best candidate first.
pub trait TransformFactory: Send + Sync {
    /// Decoders accepting `input` as their input type.
    fn decoders(&self, input: &MediaType) -> Vec<Box<dyn MediaTransform>>;

    /// Video processors converting `input` to `output`.
    fn video_processors(
        &self,
        input: &MediaType,
        output: &MediaType,
    ) -> Vec<Box<dyn MediaTransform>>;
}
