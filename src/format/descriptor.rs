use std::fmt;

use serde::{Deserialize, Serialize};

use super::FourCC;

/// Two frame rates closer than this are treated as equal.
pub const FRAME_RATE_TOLERANCE: f32 = 0.5;

/// A native frame rate, kept as the rational the platform reports it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub const fn from_fps(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    /// Native formats that do not report a rate.
    pub const fn unknown() -> Self {
        Self::new(0, 1)
    }

    pub fn fps(&self) -> f32 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f32 / self.denominator as f32
        }
    }

    /// Interval between frames, `None` when the rate is unknown.
    pub fn frame_interval(&self) -> Option<std::time::Duration> {
        let fps = self.fps();
        (fps > 0.0).then(|| std::time::Duration::from_secs_f32(1.0 / fps))
    }

    pub fn matches(&self, fps: f32) -> bool {
        (self.fps() - fps).abs() < FRAME_RATE_TOLERANCE
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} fps", self.fps())
    }
}

/// One native stream configuration of a capture device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    /// Only reported for raw native layouts.
    #[serde(default)]
    pub bits_per_pixel: Option<u32>,
    pub frame_rate: FrameRate,
}

impl FormatDescriptor {
    pub fn new(width: u32, height: u32, fourcc: FourCC, frame_rate: FrameRate) -> Self {
        Self {
            width,
            height,
            fourcc,
            bits_per_pixel: None,
            frame_rate,
        }
    }

    pub fn with_bits_per_pixel(mut self, bits: u32) -> Self {
        self.bits_per_pixel = Some(bits);
        self
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exact geometry and codec match, frame rate within tolerance.
    pub fn matches(&self, width: u32, height: u32, fourcc: FourCC, fps: f32) -> bool {
        self.width == width
            && self.height == height
            && self.fourcc == fourcc
            && self.frame_rate.matches(fps)
    }
}

impl PartialEq for FormatDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.width, other.height, other.fourcc, other.frame_rate.fps())
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {}  {}  FOURCC={}",
            self.width, self.height, self.frame_rate, self.fourcc
        )?;
        if let Some(bpp) = self.bits_per_pixel {
            write!(f, "  {bpp} bpp")?;
        }
        Ok(())
    }
}

/// A capture device as produced by enumeration.
///
/// `formats` keeps the native enumeration order: a format's position is the
/// index the native source expects when the format is activated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    /// Unique across devices and stable across re-enumeration.
    pub path: String,
    pub formats: Vec<FormatDescriptor>,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            formats: Vec::new(),
        }
    }

    pub fn with_formats(mut self, formats: Vec<FormatDescriptor>) -> Self {
        self.formats = formats;
        self
    }

    pub fn format(&self, index: usize) -> Option<&FormatDescriptor> {
        self.formats.get(index)
    }

    /// A device without formats cannot be opened.
    pub fn is_usable(&self) -> bool {
        !self.formats.is_empty()
    }
}
