//! V4L2 capture backend (Linux)
//!
//! Devices come from `/dev/video*`, samples are read from memory-mapped
//! buffers on the producer thread, and the camera/user control classes are
//! exposed as the lens and image control families.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use super::{CaptureBackend, NativeSource, ReadEvent, SampleReader};
use crate::error::{CaptureError, Result};
use crate::format::{DeviceDescriptor, FormatDescriptor, FormatSelection, FourCC, FrameRate};
use crate::property::{imaging, lens, ControlFlags, ControlRange, ControlSurface};
use crate::transform::{MediaType, NativeStatus, Sample, SoftwareTransformFactory, TransformFactory};

const BUFFER_COUNT: u32 = 4;

/// Win32-style failure code wrapping an errno.
fn status_from_io(err: &io::Error) -> NativeStatus {
    match (err.kind(), err.raw_os_error()) {
        (io::ErrorKind::TimedOut, _) => NativeStatus::TIMEOUT,
        (_, Some(code)) => NativeStatus((0x8007_0000_u32 | (code as u32 & 0xFFFF)) as i32),
        _ => NativeStatus::FAIL,
    }
}

fn to_fourcc(fourcc: v4l::FourCC) -> FourCC {
    match &fourcc.repr {
        b"YU12" => FourCC::I420,
        repr => FourCC::new(repr),
    }
}

fn to_v4l(fourcc: FourCC) -> v4l::FourCC {
    match fourcc {
        FourCC::I420 | FourCC::IYUV => v4l::FourCC::new(b"YU12"),
        FourCC::YUY2 => v4l::FourCC::new(b"YUYV"),
        other => v4l::FourCC::new(&other.bytes()),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Backend {
    factory: SoftwareTransformFactory,
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self::default()
    }

    fn describe(path: &str) -> io::Result<Option<DeviceDescriptor>> {
        let device = Device::with_path(path)?;
        let caps = device.query_caps()?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let mut formats = Vec::new();
        for description in device.enum_formats()? {
            let fourcc = description.fourcc;
            for size in device.enum_framesizes(fourcc)? {
                let (width, height) = match size.size {
                    FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
                    FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
                };
                for interval in device.enum_frameintervals(fourcc, width, height)? {
                    let fraction = match interval.interval {
                        FrameIntervalEnum::Discrete(fraction) => fraction,
                        FrameIntervalEnum::Stepwise(stepwise) => stepwise.min,
                    };
                    // An interval of n/d seconds is a rate of d/n
                    let rate = FrameRate::new(fraction.denominator, fraction.numerator);
                    formats.push(FormatDescriptor::new(width, height, to_fourcc(fourcc), rate));
                }
            }
        }
        debug!("{}: {} ({}) with {} formats", path, caps.card, caps.driver, formats.len());
        Ok(Some(DeviceDescriptor::new(caps.card, path).with_formats(formats)))
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        info!("Enumerating V4L2 capture devices...");
        let mut devices = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().to_string_lossy().into_owned();
            match Self::describe(&path) {
                Ok(Some(device)) => devices.push(device),
                Ok(None) => debug!("{} is not a capture device", path),
                Err(e) => warn!("skipping {}: {}", path, e),
            }
        }
        Ok(devices)
    }

    #[instrument(skip(self, device), fields(path = %device.path))]
    fn activate(&self, device: &DeviceDescriptor) -> Result<Box<dyn NativeSource>> {
        let handle = Device::with_path(&device.path).map_err(|e| CaptureError::device_unavailable(&device.name, e))?;
        let caps = handle
            .query_caps()
            .map_err(|e| CaptureError::device_unavailable(&device.name, e))?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::device_unavailable(&device.name, "device doesn't support video capture"));
        }
        info!("Device: {} ({})", caps.card, caps.driver);

        let handle = Arc::new(handle);
        let controls = handle.query_controls().unwrap_or_default();
        let present: Vec<u32> = controls.iter().map(|c| c.id).collect();
        let ranges = controls
            .iter()
            .map(|c| {
                (
                    c.id,
                    ControlRange {
                        min: c.minimum as i32,
                        max: c.maximum as i32,
                        step: c.step as i32,
                        default: c.default as i32,
                        capabilities: ControlFlags::MANUAL,
                    },
                )
            })
            .collect::<Vec<_>>();

        let lens = Arc::new(V4l2Controls::new(handle.clone(), LENS_MAP, &ranges, &present));
        let image = IMAGE_MAP
            .iter()
            .any(|m| present.contains(&m.value_id))
            .then(|| Arc::new(V4l2Controls::new(handle.clone(), IMAGE_MAP, &ranges, &present)));

        Ok(Box::new(V4l2Source {
            device: handle,
            descriptor: device.clone(),
            current: None,
            lens,
            image,
        }))
    }

    fn transform_factory(&self) -> Arc<dyn TransformFactory> {
        Arc::new(self.factory)
    }
}

struct V4l2Source {
    device: Arc<Device>,
    descriptor: DeviceDescriptor,
    current: Option<MediaType>,
    lens: Arc<V4l2Controls>,
    image: Option<Arc<V4l2Controls>>,
}

impl NativeSource for V4l2Source {
    fn configure(&mut self, selection: FormatSelection) -> std::result::Result<MediaType, NativeStatus> {
        let mut fmt = self.device.format().map_err(|e| status_from_io(&e))?;
        let mut rate = FrameRate::unknown();
        if let Some(index) = selection.index() {
            let wanted = self.descriptor.format(index).ok_or(NativeStatus::INVALID_ARG)?;
            fmt.width = wanted.width;
            fmt.height = wanted.height;
            fmt.fourcc = to_v4l(wanted.fourcc);
            fmt = self.device.set_format(&fmt).map_err(|e| status_from_io(&e))?;

            let fps = wanted.frame_rate.fps().round() as u32;
            if fps > 0 {
                if let Err(e) = self.device.set_params(&Parameters::with_fps(fps)) {
                    warn!("could not set frame rate {}: {}", fps, e);
                }
            }
            rate = wanted.frame_rate;
        }

        let media = MediaType::new(to_fourcc(fmt.fourcc), fmt.width, fmt.height).with_frame_rate(rate);
        info!("V4L2 format set: {} (stride {})", media, fmt.stride);
        self.current = Some(media);
        Ok(media)
    }

    fn lens_controls(&self) -> Option<Arc<dyn ControlSurface>> {
        Some(self.lens.clone())
    }

    fn image_controls(&self) -> Option<Arc<dyn ControlSurface>> {
        self.image.clone().map(|image| image as Arc<dyn ControlSurface>)
    }

    fn start(&mut self) -> std::result::Result<Box<dyn SampleReader>, NativeStatus> {
        let media = self.current.ok_or(NativeStatus::TYPE_NOT_SET)?;
        let fmt = self.device.format().map_err(|e| status_from_io(&e))?;
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| status_from_io(&e))?;
        info!("Capture stream started with {} buffers", BUFFER_COUNT);
        Ok(Box::new(V4l2Reader {
            stream,
            stride: (!media.is_compressed() && fmt.stride > 0).then_some(fmt.stride as usize),
            timeout: None,
        }))
    }
}

struct V4l2Reader {
    stream: MmapStream<'static>,
    stride: Option<usize>,
    timeout: Option<Duration>,
}

impl SampleReader for V4l2Reader {
    fn read_sample(&mut self, timeout: Duration) -> std::result::Result<ReadEvent, NativeStatus> {
        if self.timeout != Some(timeout) {
            self.stream.set_timeout(timeout);
            self.timeout = Some(timeout);
        }
        let (buf, meta) = match self.stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(ReadEvent::Tick),
            Err(e) if e.raw_os_error() == Some(19) => return Ok(ReadEvent::EndOfStream), // ENODEV
            Err(e) => return Err(status_from_io(&e)),
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Ok(ReadEvent::Tick);
        }
        let data = Bytes::copy_from_slice(&buf[..used]);
        let timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);
        let mut sample = Sample::new(data).with_timestamp(timestamp);
        if let Some(stride) = self.stride {
            sample = sample.with_stride(stride);
        }
        Ok(ReadEvent::Sample(sample))
    }
}

/// How one control code maps onto V4L2 control ids.
struct ControlMapping {
    code: u32,
    value_id: u32,
    /// Companion auto switch: id, value meaning auto, value meaning manual.
    auto: Option<(u32, i64, i64)>,
}

const fn map(code: u32, value_id: u32, auto: Option<(u32, i64, i64)>) -> ControlMapping {
    ControlMapping { code, value_id, auto }
}

const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_FOCUS_ABSOLUTE: u32 = 0x009a_090a;
const CID_FOCUS_AUTO: u32 = 0x009a_090c;
const CID_ZOOM_ABSOLUTE: u32 = 0x009a_090d;

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_CONTRAST: u32 = 0x0098_0901;
const CID_SATURATION: u32 = 0x0098_0902;
const CID_HUE: u32 = 0x0098_0903;
const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const CID_GAMMA: u32 = 0x0098_0910;
const CID_AUTOGAIN: u32 = 0x0098_0912;
const CID_GAIN: u32 = 0x0098_0913;
const CID_WHITE_BALANCE_TEMPERATURE: u32 = 0x0098_091a;
const CID_SHARPNESS: u32 = 0x0098_091b;
const CID_BACKLIGHT_COMPENSATION: u32 = 0x0098_091c;

// V4L2_EXPOSURE_APERTURE_PRIORITY (3) is what UVC cameras accept as auto
const LENS_MAP: &[ControlMapping] = &[
    map(lens::EXPOSURE, CID_EXPOSURE_ABSOLUTE, Some((CID_EXPOSURE_AUTO, 3, 1))),
    map(lens::FOCUS, CID_FOCUS_ABSOLUTE, Some((CID_FOCUS_AUTO, 1, 0))),
    map(lens::ZOOM, CID_ZOOM_ABSOLUTE, None),
];

const IMAGE_MAP: &[ControlMapping] = &[
    map(imaging::BRIGHTNESS, CID_BRIGHTNESS, None),
    map(imaging::CONTRAST, CID_CONTRAST, None),
    map(imaging::HUE, CID_HUE, None),
    map(imaging::SATURATION, CID_SATURATION, None),
    map(imaging::SHARPNESS, CID_SHARPNESS, None),
    map(imaging::GAMMA, CID_GAMMA, None),
    map(
        imaging::WHITE_BALANCE,
        CID_WHITE_BALANCE_TEMPERATURE,
        Some((CID_AUTO_WHITE_BALANCE, 1, 0)),
    ),
    map(imaging::BACKLIGHT_COMPENSATION, CID_BACKLIGHT_COMPENSATION, None),
    map(imaging::GAIN, CID_GAIN, Some((CID_AUTOGAIN, 1, 0))),
];

struct V4l2Controls {
    device: Arc<Device>,
    mapping: &'static [ControlMapping],
    ranges: Vec<(u32, ControlRange)>,
}

impl V4l2Controls {
    fn new(
        device: Arc<Device>,
        mapping: &'static [ControlMapping],
        ranges: &[(u32, ControlRange)],
        present: &[u32],
    ) -> Self {
        let ranges = mapping
            .iter()
            .filter_map(|m| {
                let (_, mut range) = *ranges.iter().find(|(id, _)| *id == m.value_id)?;
                if m.auto.is_some_and(|(id, _, _)| present.contains(&id)) {
                    range.capabilities = ControlFlags::AUTO | ControlFlags::MANUAL;
                }
                Some((m.code, range))
            })
            .collect();
        Self {
            device,
            mapping,
            ranges,
        }
    }

    fn mapping(&self, code: u32) -> std::result::Result<&ControlMapping, NativeStatus> {
        self.mapping
            .iter()
            .find(|m| m.code == code)
            .ok_or(NativeStatus::NOT_IMPLEMENTED)
    }

    fn read(&self, id: u32) -> std::result::Result<i64, NativeStatus> {
        match self.device.control(id).map_err(|e| status_from_io(&e))?.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(value as i64),
            _ => Err(NativeStatus::INVALID_MEDIA_TYPE),
        }
    }

    fn write(&self, id: u32, value: i64) -> std::result::Result<(), NativeStatus> {
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|e| status_from_io(&e))
    }
}

impl ControlSurface for V4l2Controls {
    fn range(&self, code: u32) -> std::result::Result<ControlRange, NativeStatus> {
        self.ranges
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, range)| *range)
            .ok_or(NativeStatus::NOT_IMPLEMENTED)
    }

    fn get(&self, code: u32) -> std::result::Result<(i32, ControlFlags), NativeStatus> {
        let mapping = self.mapping(code)?;
        let value = self.read(mapping.value_id)? as i32;
        let flags = match mapping.auto {
            Some((id, auto_value, _)) => match self.read(id) {
                Ok(v) if v == auto_value => ControlFlags::AUTO,
                _ => ControlFlags::MANUAL,
            },
            None => ControlFlags::MANUAL,
        };
        Ok((value, flags))
    }

    fn set(&self, code: u32, value: i32, flags: ControlFlags) -> std::result::Result<(), NativeStatus> {
        let mapping = self.mapping(code)?;
        match mapping.auto {
            Some((id, auto_value, _)) if flags.is_auto() => self.write(id, auto_value),
            Some((id, _, manual_value)) => {
                self.write(id, manual_value)?;
                self.write(mapping.value_id, value as i64)
            }
            None => self.write(mapping.value_id, value as i64),
        }
    }
}
