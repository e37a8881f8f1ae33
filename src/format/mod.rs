pub mod descriptor;
pub mod fourcc;
pub mod negotiate;

pub use descriptor::{DeviceDescriptor, FormatDescriptor, FrameRate, FRAME_RATE_TOLERANCE};
pub use fourcc::{FourCC, COMPRESSED_CODECS};
pub use negotiate::{select_format_index, FormatRequest, FormatSelection};
