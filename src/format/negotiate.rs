//! Native format negotiation
//!
//! Picks the native format index to activate for a caller's request: the
//! first exact match if one exists, otherwise a greedy best fit that climbs
//! toward the common 30 fps tier and prefers larger frames at equal rate.

use std::fmt;

use tracing::debug;

use super::{DeviceDescriptor, FourCC};

/// Best-fit stops preferring higher rates once the running best reaches this.
pub const SOFT_FRAME_RATE_CEILING: f32 = 29.9;

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatRequest {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub fps: f32,
}

impl FormatRequest {
    pub fn new(width: u32, height: u32, fourcc: FourCC, fps: f32) -> Self {
        Self {
            width,
            height,
            fourcc,
            fps,
        }
    }
}

/// Outcome of negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSelection {
    /// Activate the native format at this enumeration index.
    Index(usize),
    /// Nothing qualified; keep whatever the native source currently defaults to.
    Default,
}

impl FormatSelection {
    pub fn index(self) -> Option<usize> {
        match self {
            FormatSelection::Index(index) => Some(index),
            FormatSelection::Default => None,
        }
    }
}

impl fmt::Display for FormatSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSelection::Index(index) => write!(f, "format #{index}"),
            FormatSelection::Default => f.write_str("native default format"),
        }
    }
}

/// Select the native format index for `request`.
///
/// The best-fit pass is a heuristic: a candidate replaces the running best
/// when the best's rate is still under [`SOFT_FRAME_RATE_CEILING`] and the
/// candidate is faster, or when both rates are equal and the candidate has
/// more pixels. The outcome depends on enumeration order.
pub fn select_format_index(device: &DeviceDescriptor, request: &FormatRequest) -> FormatSelection {
    let mut selection = FormatSelection::Default;
    let mut best_area = 0u64;
    let mut best_rate = 0.0f32;

    for (index, format) in device.formats.iter().enumerate() {
        if format.matches(request.width, request.height, request.fourcc, request.fps) {
            debug!(index, %format, "exact format match");
            return FormatSelection::Index(index);
        }

        let rate = format.frame_rate.fps();
        let area = format.area();
        if (best_rate < SOFT_FRAME_RATE_CEILING && best_rate < rate)
            || (best_rate == rate && best_area < area)
        {
            best_area = area;
            best_rate = rate;
            selection = FormatSelection::Index(index);
        }
    }

    debug!(
        device = %device.name,
        width = request.width,
        height = request.height,
        fourcc = %request.fourcc,
        fps = request.fps,
        %selection,
        "no exact format match, using best fit"
    );
    selection
}
