//! Four-character codes identifying native pixel layouts and codecs

use std::fmt;

use serde::{Deserialize, Serialize};

/// A packed four-character code, first character in the lowest byte.
///
/// Media-Foundation style subtypes are carried the same way: the numeric
/// `D3DFMT` values 20, 21 and 22 name the bottom-up RGB layouts.
///
/// Serialized as its readable name; deserializes from a name or a raw number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "FourCCRepr", into = "String")]
pub struct FourCC(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum FourCCRepr {
    Raw(u32),
    Text(String),
}

impl TryFrom<FourCCRepr> for FourCC {
    type Error = String;

    fn try_from(repr: FourCCRepr) -> Result<Self, Self::Error> {
        match repr {
            FourCCRepr::Raw(raw) => Ok(FourCC(raw)),
            FourCCRepr::Text(text) => {
                FourCC::parse(&text).ok_or_else(|| format!("invalid four-character code {text:?}"))
            }
        }
    }
}

impl From<FourCC> for String {
    fn from(fourcc: FourCC) -> String {
        fourcc.to_string()
    }
}

impl FourCC {
    /// Bottom-up BGR, 3 bytes per pixel.
    pub const RGB24: FourCC = FourCC(20);
    /// Bottom-up BGRA, 4 bytes per pixel.
    pub const ARGB32: FourCC = FourCC(21);
    /// Bottom-up BGRX, 4 bytes per pixel.
    pub const RGB32: FourCC = FourCC(22);
    /// DirectShow `BI_RGB`: bottom-up BGR(X), depth given by bits per pixel.
    pub const RGB: FourCC = FourCC::new(b"RGB ");
    /// Top-down packed R, G, B.
    pub const RGB3: FourCC = FourCC::new(b"RGB3");
    /// Top-down packed B, G, R.
    pub const BGR3: FourCC = FourCC::new(b"BGR3");
    pub const YUY2: FourCC = FourCC::new(b"YUY2");
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    pub const UYVY: FourCC = FourCC::new(b"UYVY");
    pub const NV12: FourCC = FourCC::new(b"NV12");
    pub const I420: FourCC = FourCC::new(b"I420");
    pub const IYUV: FourCC = FourCC::new(b"IYUV");
    pub const MJPG: FourCC = FourCC::new(b"MJPG");
    pub const JPEG: FourCC = FourCC::new(b"JPEG");
    pub const H264: FourCC = FourCC::new(b"H264");
    pub const HEVC: FourCC = FourCC::new(b"HEVC");

    pub const fn new(code: &[u8; 4]) -> Self {
        FourCC(
            (code[0] as u32)
                | ((code[1] as u32) << 8)
                | ((code[2] as u32) << 16)
                | ((code[3] as u32) << 24),
        )
    }

    /// Parse a textual code such as `"MJPG"`, `"RGB24"` or `"0x00000007"`.
    /// Codes shorter than four characters are padded with spaces.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "RGB24" => return Some(Self::RGB24),
            "ARGB32" => return Some(Self::ARGB32),
            "RGB32" => return Some(Self::RGB32),
            _ => {}
        }
        if let Some(hex) = text.strip_prefix("0x") {
            return u32::from_str_radix(hex, 16).ok().map(FourCC);
        }
        let bytes = text.as_bytes();
        if bytes.is_empty()
            || bytes.len() > 4
            || !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
        {
            return None;
        }
        let mut code = [b' '; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Some(Self::new(&code))
    }

    pub fn bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Whether frames in this format need a decode stage before normalization.
    pub fn is_compressed(self) -> bool {
        COMPRESSED_CODECS.contains(&self)
    }
}

/// Closed set of compressed codecs that require a decode stage.
pub const COMPRESSED_CODECS: &[FourCC] = &[
    FourCC::new(b"MP43"),
    FourCC::new(b"MP4S"),
    FourCC::new(b"M4S2"),
    FourCC::new(b"MP4V"),
    FourCC::new(b"WMV1"),
    FourCC::new(b"WMV2"),
    FourCC::new(b"WMV3"),
    FourCC::new(b"WVC1"),
    FourCC::new(b"MSS1"),
    FourCC::new(b"MSS2"),
    FourCC::new(b"MPG1"),
    FourCC::new(b"dvsl"),
    FourCC::new(b"dvsd"),
    FourCC::new(b"dvhd"),
    FourCC::new(b"dv25"),
    FourCC::new(b"dv50"),
    FourCC::new(b"dvh1"),
    FourCC::new(b"dvc "),
    FourCC::H264,
    FourCC::new(b"H265"),
    FourCC::MJPG,
    FourCC::JPEG,
    FourCC::new(b"420O"),
    FourCC::HEVC,
    FourCC::new(b"HEVS"),
    FourCC::new(b"VP80"),
    FourCC::new(b"VP90"),
    FourCC::new(b"VP10"),
    FourCC::new(b"AV01"),
];

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::RGB24 => return f.write_str("RGB24"),
            Self::ARGB32 => return f.write_str("ARGB32"),
            Self::RGB32 => return f.write_str("RGB32"),
            _ => {}
        }
        let bytes = self.bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in bytes {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(code: [u8; 4]) -> Self {
        FourCC::new(&code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_first_character_low() {
        assert_eq!(FourCC::new(b"MJPG").0 & 0xFF, b'M' as u32);
        assert_eq!(FourCC::MJPG.to_string(), "MJPG");
    }

    #[test]
    fn numeric_subtypes_have_names() {
        assert_eq!(FourCC::RGB24.to_string(), "RGB24");
        assert_eq!(FourCC::parse("RGB32"), Some(FourCC::RGB32));
        assert_eq!(FourCC(7).to_string(), "0x00000007");
    }

    #[test]
    fn parse_pads_short_codes() {
        assert_eq!(FourCC::parse("RGB"), Some(FourCC::RGB));
        assert_eq!(FourCC::parse("RGB "), Some(FourCC::RGB));
        assert_eq!(FourCC::parse("0x00000007"), Some(FourCC(7)));
        assert_eq!(FourCC::parse("TOOLONG"), None);
        assert_eq!(FourCC::parse(""), None);
    }

    #[test]
    fn compressed_set_is_closed() {
        assert!(FourCC::MJPG.is_compressed());
        assert!(FourCC::new(b"dvsd").is_compressed());
        assert!(!FourCC::YUY2.is_compressed());
        assert!(!FourCC::RGB24.is_compressed());
    }
}
