//! Synthetic capture backend
//!
//! Devices are described in configuration (or built in code) and deliver a
//! moving test pattern encoded in their native format, so every stage of the
//! pipeline can be driven without hardware. Failure injection covers
//! activation errors, device removal, end of stream and corrupt samples.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CaptureBackend, NativeSource, ReadEvent, SampleReader};
use crate::error::{CaptureError, Result};
use crate::format::{DeviceDescriptor, FormatDescriptor, FormatSelection, FourCC, FrameRate};
use crate::property::{imaging, lens, ControlFlags, ControlRange, ControlSurface};
use crate::transform::{MediaType, NativeStatus, Sample, SoftwareTransformFactory, TransformFactory};

const FALLBACK_INTERVAL: Duration = Duration::from_millis(33);
const JPEG_QUALITY: u8 = 85;

fn default_true() -> bool {
    true
}

/// One simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
    /// Index the source starts out configured to.
    #[serde(default)]
    pub default_format: usize,
    #[serde(default = "default_true")]
    pub image_controls: bool,
    #[serde(default)]
    pub fail_activation: bool,
    /// Report end of stream after this many samples.
    #[serde(default)]
    pub end_after_frames: Option<u64>,
    /// Every n-th sample is delivered damaged.
    #[serde(default)]
    pub corrupt_every: Option<u64>,
}

impl SimulatedDeviceConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>, formats: Vec<FormatDescriptor>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            formats,
            default_format: 0,
            image_controls: true,
            fail_activation: false,
            end_after_frames: None,
            corrupt_every: None,
        }
    }

    pub fn without_image_controls(mut self) -> Self {
        self.image_controls = false;
        self
    }

    pub fn failing_activation(mut self) -> Self {
        self.fail_activation = true;
        self
    }

    pub fn ending_after(mut self, frames: u64) -> Self {
        self.end_after_frames = Some(frames);
        self
    }

    pub fn corrupting_every(mut self, n: u64) -> Self {
        self.corrupt_every = Some(n);
        self
    }

    pub fn with_default_format(mut self, index: usize) -> Self {
        self.default_format = index;
        self
    }

    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(self.name.clone(), self.path.clone()).with_formats(self.formats.clone())
    }
}

/// Devices used when configuration lists none. Both share a display name and
/// differ by path.
pub fn default_devices() -> Vec<SimulatedDeviceConfig> {
    let fps30 = FrameRate::from_fps(30);
    let fps15 = FrameRate::from_fps(15);
    vec![
        SimulatedDeviceConfig::new(
            "Simulated Camera",
            "sim://camera/0",
            vec![
                FormatDescriptor::new(640, 480, FourCC::YUY2, fps30),
                FormatDescriptor::new(1280, 720, FourCC::MJPG, fps30),
                FormatDescriptor::new(640, 480, FourCC::MJPG, fps30),
                FormatDescriptor::new(320, 240, FourCC::RGB24, fps15),
                FormatDescriptor::new(640, 480, FourCC::NV12, fps30),
            ],
        ),
        SimulatedDeviceConfig::new(
            "Simulated Camera",
            "sim://camera/1",
            vec![
                FormatDescriptor::new(320, 240, FourCC::YUY2, fps30),
                FormatDescriptor::new(160, 120, FourCC::UYVY, fps15),
            ],
        )
        .without_image_controls(),
    ]
}

struct SimulatedDevice {
    config: SimulatedDeviceConfig,
    lens: Arc<SimulatedControls>,
    image: Option<Arc<SimulatedControls>>,
    unplugged: Arc<AtomicBool>,
}

pub struct SimulatedBackend {
    devices: Vec<SimulatedDevice>,
    factory: Arc<SoftwareTransformFactory>,
}

impl SimulatedBackend {
    pub fn new(devices: Vec<SimulatedDeviceConfig>) -> Self {
        let devices = devices
            .into_iter()
            .map(|config| SimulatedDevice {
                lens: Arc::new(SimulatedControls::lens()),
                image: config.image_controls.then(|| Arc::new(SimulatedControls::imaging())),
                unplugged: Arc::new(AtomicBool::new(false)),
                config,
            })
            .collect();
        Self {
            devices,
            factory: Arc::new(SoftwareTransformFactory),
        }
    }

    /// Devices from configuration, or the built-in pair if none are listed.
    pub fn from_config(devices: &[SimulatedDeviceConfig]) -> Self {
        if devices.is_empty() {
            Self::new(default_devices())
        } else {
            Self::new(devices.to_vec())
        }
    }

    /// Simulate removal: running readers fail and new activations are refused.
    pub fn unplug(&self, path: &str) {
        if let Some(device) = self.find(path) {
            warn!(path, "simulated device unplugged");
            device.unplugged.store(true, Ordering::Release);
        }
    }

    pub fn replug(&self, path: &str) {
        if let Some(device) = self.find(path) {
            device.unplugged.store(false, Ordering::Release);
        }
    }

    fn find(&self, path: &str) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.config.path == path)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(default_devices())
    }
}

impl CaptureBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| !d.unplugged.load(Ordering::Acquire))
            .map(|d| d.config.descriptor())
            .collect())
    }

    fn activate(&self, device: &DeviceDescriptor) -> Result<Box<dyn NativeSource>> {
        let sim = self
            .find(&device.path)
            .ok_or_else(|| CaptureError::device_unavailable(&device.name, format!("no device at {}", device.path)))?;
        if sim.config.fail_activation {
            return Err(CaptureError::device_unavailable(&device.name, "activation refused"));
        }
        if sim.unplugged.load(Ordering::Acquire) {
            return Err(CaptureError::device_unavailable(&device.name, "device removed"));
        }
        debug!(path = %device.path, "activated simulated device");
        Ok(Box::new(SimulatedSource {
            config: sim.config.clone(),
            current: None,
            lens: sim.lens.clone(),
            image: sim.image.clone(),
            unplugged: sim.unplugged.clone(),
        }))
    }

    fn transform_factory(&self) -> Arc<dyn TransformFactory> {
        self.factory.clone()
    }
}

struct SimulatedSource {
    config: SimulatedDeviceConfig,
    current: Option<MediaType>,
    lens: Arc<SimulatedControls>,
    image: Option<Arc<SimulatedControls>>,
    unplugged: Arc<AtomicBool>,
}

impl NativeSource for SimulatedSource {
    fn configure(&mut self, selection: FormatSelection) -> std::result::Result<MediaType, NativeStatus> {
        let index = selection.index().unwrap_or(self.config.default_format);
        let format = self.config.formats.get(index).ok_or(NativeStatus::INVALID_ARG)?;
        let media = MediaType::from(format);
        info!(path = %self.config.path, %media, "configured simulated source");
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
        let interval = media.frame_rate.frame_interval().unwrap_or(FALLBACK_INTERVAL);
        Ok(Box::new(SimulatedReader {
            media,
            interval,
            next_due: Instant::now(),
            delivered: 0,
            end_after: self.config.end_after_frames,
            corrupt_every: self.config.corrupt_every,
            unplugged: self.unplugged.clone(),
        }))
    }
}

struct SimulatedReader {
    media: MediaType,
    interval: Duration,
    next_due: Instant,
    delivered: u64,
    end_after: Option<u64>,
    corrupt_every: Option<u64>,
    unplugged: Arc<AtomicBool>,
}

impl SampleReader for SimulatedReader {
    fn read_sample(&mut self, timeout: Duration) -> std::result::Result<ReadEvent, NativeStatus> {
        if self.unplugged.load(Ordering::Acquire) {
            return Err(NativeStatus::DEVICE_REMOVED);
        }
        if self.end_after.is_some_and(|limit| self.delivered >= limit) {
            return Ok(ReadEvent::EndOfStream);
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(ReadEvent::Tick);
            }
            thread::sleep(wait);
        }
        self.next_due = Instant::now() + self.interval;

        let frame = self.delivered;
        self.delivered += 1;
        let timestamp = self.interval * frame as u32;

        if self.corrupt_every.is_some_and(|n| n > 0 && self.delivered % n == 0) {
            debug!(frame, "delivering corrupt sample");
            return Ok(ReadEvent::Sample(corrupt_sample(&self.media).with_timestamp(timestamp)));
        }

        let rgb = test_pattern(self.media.width, self.media.height, frame);
        let data = encode_native(&self.media, &rgb)?;
        Ok(ReadEvent::Sample(Sample::new(data).with_timestamp(timestamp)))
    }
}

fn corrupt_sample(media: &MediaType) -> Sample {
    match media.frame_size() {
        Some(size) => Sample::new(vec![0u8; size / 2]),
        // No start-of-image marker, so a decoder cannot make sense of it
        None => Sample::new(vec![0u8; 16]),
    }
}

/// A top-down RGB test pattern: horizontal gradient, vertical gradient and a
/// bar that moves one step per frame.
pub fn test_pattern(width: u32, height: u32, frame: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let bar = if w == 0 { 0 } else { (frame as usize * 4) % w };
    let mut rgb = vec![0u8; w * h * 3];
    for (y, row) in rgb.chunks_exact_mut((w * 3).max(1)).enumerate() {
        for (x, px) in row.chunks_exact_mut(3).enumerate() {
            if x >= bar && x < bar + 4 {
                px.copy_from_slice(&[255, 255, 255]);
            } else {
                px[0] = (x * 255 / w.max(1)) as u8;
                px[1] = (y * 255 / h.max(1)) as u8;
                px[2] = ((frame * 3) % 256) as u8;
            }
        }
    }
    rgb
}

#[inline]
fn rgb_to_yuv(px: &[u8]) -> (u8, u8, u8) {
    let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
    (
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}

/// Encode a top-down RGB image into `media`'s native layout, using the
/// layout's default stride.
pub fn encode_native(media: &MediaType, rgb: &[u8]) -> std::result::Result<Vec<u8>, NativeStatus> {
    let w = media.width as usize;
    let h = media.height as usize;
    if rgb.len() < w * h * 3 {
        return Err(NativeStatus::INVALID_ARG);
    }
    let stride = media.default_stride();
    let pixel = |x: usize, y: usize| &rgb[(y * w + x) * 3..(y * w + x) * 3 + 3];

    let bottom_up = |bytes_per_pixel: usize| {
        let mut out = vec![0u8; stride * h];
        for y in 0..h {
            let row = &mut out[(h - 1 - y) * stride..];
            for x in 0..w {
                let px = pixel(x, y);
                let at = x * bytes_per_pixel;
                row[at] = px[2];
                row[at + 1] = px[1];
                row[at + 2] = px[0];
                if bytes_per_pixel == 4 {
                    row[at + 3] = 255;
                }
            }
        }
        out
    };

    let out = match media.subtype {
        FourCC::RGB24 => bottom_up(3),
        FourCC::RGB32 | FourCC::ARGB32 => bottom_up(4),
        FourCC::RGB => bottom_up(media.bits_per_pixel.unwrap_or(24) as usize / 8),
        FourCC::RGB3 => rgb[..w * h * 3].to_vec(),
        FourCC::BGR3 => rgb[..w * h * 3]
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        FourCC::YUY2 | FourCC::YUYV | FourCC::UYVY => {
            let mut out = vec![0u8; stride * h];
            let y_first = media.subtype != FourCC::UYVY;
            for y in 0..h {
                for pair in 0..w.div_ceil(2) {
                    let x = pair * 2;
                    let (y0, u, v) = rgb_to_yuv(pixel(x, y));
                    let y1 = if x + 1 < w { rgb_to_yuv(pixel(x + 1, y)).0 } else { y0 };
                    let at = y * stride + pair * 4;
                    let quad = if y_first { [y0, u, y1, v] } else { [u, y0, v, y1] };
                    out[at..at + 4].copy_from_slice(&quad);
                }
            }
            out
        }
        FourCC::NV12 | FourCC::I420 | FourCC::IYUV => {
            let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
            let mut luma = vec![0u8; w * h];
            let mut u_plane = vec![0u8; cw * ch];
            let mut v_plane = vec![0u8; cw * ch];
            for y in 0..h {
                for x in 0..w {
                    let (ly, u, v) = rgb_to_yuv(pixel(x, y));
                    luma[y * w + x] = ly;
                    if x % 2 == 0 && y % 2 == 0 {
                        u_plane[(y / 2) * cw + x / 2] = u;
                        v_plane[(y / 2) * cw + x / 2] = v;
                    }
                }
            }
            if media.subtype == FourCC::NV12 {
                luma.extend(u_plane.iter().zip(&v_plane).flat_map(|(&u, &v)| [u, v]));
            } else {
                luma.extend_from_slice(&u_plane);
                luma.extend_from_slice(&v_plane);
            }
            luma
        }
        FourCC::MJPG | FourCC::JPEG => {
            let mut jpeg = Cursor::new(Vec::new());
            JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
                .write_image(&rgb[..w * h * 3], media.width, media.height, ExtendedColorType::Rgb8)
                .map_err(|e| {
                    warn!("test pattern JPEG encode failed: {}", e);
                    NativeStatus::FAIL
                })?;
            jpeg.into_inner()
        }
        _ => return Err(NativeStatus::INVALID_MEDIA_TYPE),
    };
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
struct ControlState {
    range: ControlRange,
    value: i32,
    flags: ControlFlags,
}

/// In-memory control family.
pub struct SimulatedControls {
    controls: Mutex<HashMap<u32, ControlState>>,
}

impl SimulatedControls {
    fn with(entries: &[(u32, i32, i32, i32, bool)]) -> Self {
        let controls = entries
            .iter()
            .map(|&(code, min, max, default, auto)| {
                let capabilities = if auto {
                    ControlFlags::AUTO | ControlFlags::MANUAL
                } else {
                    ControlFlags::MANUAL
                };
                let state = ControlState {
                    range: ControlRange {
                        min,
                        max,
                        step: 1,
                        default,
                        capabilities,
                    },
                    value: default,
                    flags: ControlFlags::MANUAL,
                };
                (code, state)
            })
            .collect();
        Self {
            controls: Mutex::new(controls),
        }
    }

    pub fn lens() -> Self {
        Self::with(&[
            (lens::EXPOSURE, -13, -1, -6, true),
            (lens::FOCUS, 0, 250, 0, true),
            (lens::ZOOM, 100, 500, 100, true),
        ])
    }

    pub fn imaging() -> Self {
        Self::with(&[
            (imaging::BRIGHTNESS, 0, 255, 128, false),
            (imaging::CONTRAST, 0, 255, 128, false),
            (imaging::HUE, -180, 180, 0, false),
            (imaging::SATURATION, 0, 255, 128, false),
            (imaging::SHARPNESS, 0, 255, 128, false),
            (imaging::GAMMA, 100, 500, 100, false),
            (imaging::WHITE_BALANCE, 2800, 6500, 4600, true),
            (imaging::BACKLIGHT_COMPENSATION, 0, 2, 1, false),
            (imaging::GAIN, 0, 255, 0, true),
        ])
    }
}

impl ControlSurface for SimulatedControls {
    fn range(&self, code: u32) -> std::result::Result<ControlRange, NativeStatus> {
        self.controls
            .lock()
            .get(&code)
            .map(|state| state.range)
            .ok_or(NativeStatus::NOT_IMPLEMENTED)
    }

    fn get(&self, code: u32) -> std::result::Result<(i32, ControlFlags), NativeStatus> {
        self.controls
            .lock()
            .get(&code)
            .map(|state| (state.value, state.flags))
            .ok_or(NativeStatus::NOT_IMPLEMENTED)
    }

    fn set(&self, code: u32, value: i32, flags: ControlFlags) -> std::result::Result<(), NativeStatus> {
        let mut controls = self.controls.lock();
        let state = controls.get_mut(&code).ok_or(NativeStatus::NOT_IMPLEMENTED)?;
        if !state.range.contains(value) {
            return Err(NativeStatus::INVALID_ARG);
        }
        if flags.is_auto() && !state.range.capabilities.is_auto() {
            return Err(NativeStatus::INVALID_ARG);
        }
        state.value = value;
        state.flags = flags;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuy2_pattern_has_expected_size() {
        let media = MediaType::new(FourCC::YUY2, 5, 3);
        let rgb = test_pattern(5, 3, 0);
        let data = encode_native(&media, &rgb).unwrap();
        assert_eq!(data.len(), media.frame_size().unwrap());
    }

    #[test]
    fn rgb24_is_bottom_up_and_padded() {
        let media = MediaType::new(FourCC::RGB24, 1, 2);
        let rgb = [1, 2, 3, 4, 5, 6];
        let data = encode_native(&media, &rgb).unwrap();
        // stride rounds 3 up to 4
        assert_eq!(data, vec![6, 5, 4, 0, 3, 2, 1, 0]);
    }

    #[test]
    fn controls_reject_out_of_range_values() {
        let controls = SimulatedControls::lens();
        assert_eq!(
            controls.set(lens::FOCUS, 999, ControlFlags::MANUAL),
            Err(NativeStatus::INVALID_ARG)
        );
        assert_eq!(controls.get(lens::FOCUS), Ok((0, ControlFlags::MANUAL)));
    }

    #[test]
    fn reader_reports_end_of_stream() {
        let config = SimulatedDeviceConfig::new(
            "cam",
            "sim://eos",
            vec![FormatDescriptor::new(4, 4, FourCC::RGB3, FrameRate::from_fps(1000))],
        )
        .ending_after(2);
        let backend = SimulatedBackend::new(vec![config]);
        let device = backend.enumerate_devices().unwrap().remove(0);
        let mut source = backend.activate(&device).unwrap();
        source.configure(FormatSelection::Index(0)).unwrap();
        let mut reader = source.start().unwrap();
        let timeout = Duration::from_millis(100);
        assert!(matches!(reader.read_sample(timeout), Ok(ReadEvent::Sample(_))));
        assert!(matches!(reader.read_sample(timeout), Ok(ReadEvent::Sample(_))));
        assert!(matches!(reader.read_sample(timeout), Ok(ReadEvent::EndOfStream)));
    }
}
