//! Native control surfaces
//!
//! A backend exposes each control family it has as one [`ControlSurface`],
//! addressed by the family's own native control codes.

use std::fmt;
use std::ops::BitOr;

use crate::transform::NativeStatus;

/// Flag bits submitted alongside a control value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ControlFlags(pub u32);

impl ControlFlags {
    pub const NONE: ControlFlags = ControlFlags(0);
    pub const AUTO: ControlFlags = ControlFlags(0x1);
    pub const MANUAL: ControlFlags = ControlFlags(0x2);

    pub fn contains(self, other: ControlFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_auto(self) -> bool {
        self.contains(Self::AUTO)
    }

    /// Swap the auto/manual bits, keeping every other bit as it was.
    pub fn with_auto(self, enabled: bool) -> ControlFlags {
        let rest = self.0 & !(Self::AUTO.0 | Self::MANUAL.0);
        let mode = if enabled { Self::AUTO } else { Self::MANUAL };
        ControlFlags(rest | mode.0)
    }
}

impl BitOr for ControlFlags {
    type Output = ControlFlags;

    fn bitor(self, rhs: ControlFlags) -> ControlFlags {
        ControlFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for ControlFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::AUTO) {
            names.push("AUTO");
        }
        if self.contains(Self::MANUAL) {
            names.push("MANUAL");
        }
        let rest = self.0 & !(Self::AUTO.0 | Self::MANUAL.0);
        if rest != 0 {
            return write!(f, "ControlFlags({} | {:#x})", names.join(" | "), rest);
        }
        write!(f, "ControlFlags({})", names.join(" | "))
    }
}

/// Range a native control reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
    /// Flags the control supports (`AUTO`, `MANUAL` or both).
    pub capabilities: ControlFlags,
}

impl ControlRange {
    pub fn contains(&self, value: i32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One native control family.
pub trait ControlSurface: Send + Sync {
    fn range(&self, code: u32) -> Result<ControlRange, NativeStatus>;

    /// Current value and flags.
    fn get(&self, code: u32) -> Result<(i32, ControlFlags), NativeStatus>;

    fn set(&self, code: u32, value: i32, flags: ControlFlags) -> Result<(), NativeStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_auto_keeps_unrelated_bits() {
        let flags = ControlFlags(0x10) | ControlFlags::MANUAL;
        let auto = flags.with_auto(true);
        assert_eq!(auto, ControlFlags(0x10 | 0x1));
        assert_eq!(auto.with_auto(false), flags);
    }

    #[test]
    fn none_is_not_auto() {
        assert!(!ControlFlags::NONE.is_auto());
        assert!(!ControlFlags::NONE.contains(ControlFlags::NONE));
    }
}
