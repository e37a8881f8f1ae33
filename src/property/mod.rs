//! Camera property adapter
//!
//! Maps the small public property id space onto the two native control
//! families. Every operation resolves the id through [`PROPERTY_TABLE`]
//! before any native control is touched.

pub mod control;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CaptureError, Result};

pub use control::{ControlFlags, ControlRange, ControlSurface};

/// Public property ids. The discriminants are the wire values callers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PropertyId {
    Exposure = 1,
    Focus = 2,
    Zoom = 3,
    WhiteBalance = 4,
    Gain = 5,
    Brightness = 6,
    Contrast = 7,
    Saturation = 8,
    Gamma = 9,
    Hue = 10,
    Sharpness = 11,
    BacklightCompensation = 12,
}

impl PropertyId {
    pub const ALL: [PropertyId; 12] = [
        PropertyId::Exposure,
        PropertyId::Focus,
        PropertyId::Zoom,
        PropertyId::WhiteBalance,
        PropertyId::Gain,
        PropertyId::Brightness,
        PropertyId::Contrast,
        PropertyId::Saturation,
        PropertyId::Gamma,
        PropertyId::Hue,
        PropertyId::Sharpness,
        PropertyId::BacklightCompensation,
    ];

    pub fn entry(self) -> &'static PropertyEntry {
        &PROPERTY_TABLE[self as usize - 1]
    }

    pub fn family(self) -> ControlFamily {
        self.entry().family
    }
}

impl From<PropertyId> for u32 {
    fn from(id: PropertyId) -> u32 {
        id as u32
    }
}

impl TryFrom<u32> for PropertyId {
    type Error = CaptureError;

    fn try_from(raw: u32) -> Result<Self> {
        lookup(raw).map(|entry| entry.id)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyId::Exposure => "exposure",
            PropertyId::Focus => "focus",
            PropertyId::Zoom => "zoom",
            PropertyId::WhiteBalance => "white balance",
            PropertyId::Gain => "gain",
            PropertyId::Brightness => "brightness",
            PropertyId::Contrast => "contrast",
            PropertyId::Saturation => "saturation",
            PropertyId::Gamma => "gamma",
            PropertyId::Hue => "hue",
            PropertyId::Sharpness => "sharpness",
            PropertyId::BacklightCompensation => "backlight compensation",
        };
        f.write_str(name)
    }
}

/// The two disjoint native control families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFamily {
    /// Lens and exposure class controls, present on every opened source.
    LensControl,
    /// Image processing controls, optional per device.
    ImageControl,
}

/// Native control codes of the lens family.
pub mod lens {
    pub const ZOOM: u32 = 3;
    pub const EXPOSURE: u32 = 4;
    pub const FOCUS: u32 = 6;
}

/// Native control codes of the image processing family.
pub mod imaging {
    pub const BRIGHTNESS: u32 = 0;
    pub const CONTRAST: u32 = 1;
    pub const HUE: u32 = 2;
    pub const SATURATION: u32 = 3;
    pub const SHARPNESS: u32 = 4;
    pub const GAMMA: u32 = 5;
    pub const WHITE_BALANCE: u32 = 7;
    pub const BACKLIGHT_COMPENSATION: u32 = 8;
    pub const GAIN: u32 = 9;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyEntry {
    pub id: PropertyId,
    pub family: ControlFamily,
    pub native_code: u32,
    /// Whether the property accepts an auto mode switch.
    pub auto_capable: bool,
}

const fn entry(id: PropertyId, family: ControlFamily, native_code: u32, auto_capable: bool) -> PropertyEntry {
    PropertyEntry {
        id,
        family,
        native_code,
        auto_capable,
    }
}

pub static PROPERTY_TABLE: [PropertyEntry; 12] = TABLE;

const TABLE: [PropertyEntry; 12] = [
    entry(PropertyId::Exposure, ControlFamily::LensControl, lens::EXPOSURE, true),
    entry(PropertyId::Focus, ControlFamily::LensControl, lens::FOCUS, true),
    entry(PropertyId::Zoom, ControlFamily::LensControl, lens::ZOOM, true),
    entry(PropertyId::WhiteBalance, ControlFamily::ImageControl, imaging::WHITE_BALANCE, true),
    entry(PropertyId::Gain, ControlFamily::ImageControl, imaging::GAIN, true),
    entry(PropertyId::Brightness, ControlFamily::ImageControl, imaging::BRIGHTNESS, false),
    entry(PropertyId::Contrast, ControlFamily::ImageControl, imaging::CONTRAST, false),
    entry(PropertyId::Saturation, ControlFamily::ImageControl, imaging::SATURATION, false),
    entry(PropertyId::Gamma, ControlFamily::ImageControl, imaging::GAMMA, false),
    entry(PropertyId::Hue, ControlFamily::ImageControl, imaging::HUE, false),
    entry(PropertyId::Sharpness, ControlFamily::ImageControl, imaging::SHARPNESS, false),
    entry(
        PropertyId::BacklightCompensation,
        ControlFamily::ImageControl,
        imaging::BACKLIGHT_COMPENSATION,
        false,
    ),
];

// Row i must describe id i + 1 so lookup can index directly.
const _: () = {
    let mut i = 0;
    while i < TABLE.len() {
        assert!(TABLE[i].id as u32 == i as u32 + 1);
        i += 1;
    }
};

/// Resolve a raw property id.
pub fn lookup(raw: u32) -> Result<&'static PropertyEntry> {
    match raw {
        1..=12 => Ok(&PROPERTY_TABLE[raw as usize - 1]),
        _ => Err(CaptureError::InvalidProperty(raw)),
    }
}

/// Range reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRange {
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

impl From<ControlRange> for PropertyRange {
    fn from(range: ControlRange) -> Self {
        Self {
            min: range.min,
            max: range.max,
            default: range.default,
        }
    }
}

/// Property access for one open native source.
#[derive(Clone)]
pub struct PropertyAdapter {
    lens: Arc<dyn ControlSurface>,
    image: Option<Arc<dyn ControlSurface>>,
}

impl PropertyAdapter {
    pub fn new(lens: Arc<dyn ControlSurface>, image: Option<Arc<dyn ControlSurface>>) -> Self {
        Self { lens, image }
    }

    pub fn has_image_controls(&self) -> bool {
        self.image.is_some()
    }

    fn route(&self, raw: u32) -> Result<(&'static PropertyEntry, &dyn ControlSurface)> {
        let entry = lookup(raw)?;
        let surface = match entry.family {
            ControlFamily::LensControl => self.lens.as_ref(),
            ControlFamily::ImageControl => self
                .image
                .as_deref()
                .ok_or(CaptureError::PropertyUnsupported(entry.id))?,
        };
        Ok((entry, surface))
    }

    fn control_failure(entry: &PropertyEntry, status: crate::transform::NativeStatus) -> CaptureError {
        warn!(property = %entry.id, %status, "native control call failed");
        CaptureError::ControlFailure {
            property: entry.id,
            status,
        }
    }

    pub fn get_range(&self, id: impl Into<u32>) -> Result<PropertyRange> {
        let (entry, surface) = self.route(id.into())?;
        surface
            .range(entry.native_code)
            .map(PropertyRange::from)
            .map_err(|status| Self::control_failure(entry, status))
    }

    pub fn get(&self, id: impl Into<u32>) -> Result<i32> {
        let (entry, surface) = self.route(id.into())?;
        let (value, _) = surface
            .get(entry.native_code)
            .map_err(|status| Self::control_failure(entry, status))?;
        Ok(value)
    }

    /// Set a value, resubmitting the control's current flags untouched.
    pub fn set(&self, id: impl Into<u32>, value: i32) -> Result<()> {
        let (entry, surface) = self.route(id.into())?;
        let (_, flags) = surface
            .get(entry.native_code)
            .map_err(|status| Self::control_failure(entry, status))?;
        surface
            .set(entry.native_code, value, flags)
            .map_err(|status| Self::control_failure(entry, status))
    }

    pub fn get_auto(&self, id: impl Into<u32>) -> Result<bool> {
        let (entry, surface) = self.route(id.into())?;
        let (_, flags) = surface
            .get(entry.native_code)
            .map_err(|status| Self::control_failure(entry, status))?;
        Ok(flags.is_auto())
    }

    /// Switch auto mode, resubmitting the current value.
    pub fn set_auto(&self, id: impl Into<u32>, enabled: bool) -> Result<()> {
        let (entry, surface) = self.route(id.into())?;
        if !entry.auto_capable {
            return Err(CaptureError::PropertyUnsupported(entry.id));
        }
        let (value, flags) = surface
            .get(entry.native_code)
            .map_err(|status| Self::control_failure(entry, status))?;
        surface
            .set(entry.native_code, value, flags.with_auto(enabled))
            .map_err(|status| Self::control_failure(entry, status))
    }

    /// Log the lens family ranges at debug level.
    pub fn dump(&self) {
        debug!("camera properties:");
        for id in [PropertyId::Exposure, PropertyId::Focus, PropertyId::Zoom] {
            match self.get_range(id) {
                Ok(range) => debug!(
                    "  {:<8} min={:<6} max={:<6} default={}",
                    id.to_string(),
                    range.min,
                    range.max,
                    range.default
                ),
                Err(_) => debug!("  {:<8} not supported", id.to_string()),
            }
        }
    }
}

impl fmt::Debug for PropertyAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyAdapter")
            .field("image_controls", &self.image.is_some())
            .finish()
    }
}
