//! Software decode and normalize stages
//!
//! Used when a backend has no platform transforms of its own (the simulated
//! backend, V4L2). They speak the same [`MediaTransform`] protocol as
//! hardware stages so the pipeline cannot tell them apart.

use bytes::Bytes;
use tracing::{debug, warn};
use zune_jpeg::JpegDecoder;

use super::convert;
use super::media::{MediaTransform, MediaType, NativeStatus, Sample, StageOutput, TransformFactory};
use crate::format::FourCC;

/// Converts any supported raw layout to bottom-up RGB24.
#[derive(Default)]
pub struct SoftwareVideoProcessor {
    input: Option<MediaType>,
    output: Option<MediaType>,
    pending: Option<Sample>,
}

impl SoftwareVideoProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supports(input: &MediaType) -> bool {
        match input.subtype {
            FourCC::RGB => matches!(input.bits_per_pixel, None | Some(24) | Some(32)),
            FourCC::RGB24
            | FourCC::RGB32
            | FourCC::ARGB32
            | FourCC::RGB3
            | FourCC::BGR3
            | FourCC::YUY2
            | FourCC::YUYV
            | FourCC::UYVY
            | FourCC::NV12
            | FourCC::I420
            | FourCC::IYUV => true,
            _ => false,
        }
    }

    fn convert(&self, input: &MediaType, sample: &Sample) -> Result<Vec<u8>, NativeStatus> {
        let width = input.width as usize;
        let height = input.height as usize;
        let stride = sample.stride.unwrap_or_else(|| input.default_stride());
        let src = &sample.data[..];
        let mut out = vec![0u8; width * height * 3];

        match input.subtype {
            FourCC::RGB24 => convert::bgr24_bottom_up(src, width, height, stride, &mut out)?,
            FourCC::RGB32 | FourCC::ARGB32 => convert::bgrx_bottom_up(src, width, height, stride, &mut out)?,
            FourCC::RGB if input.bits_per_pixel == Some(32) => {
                convert::bgrx_bottom_up(src, width, height, stride, &mut out)?
            }
            FourCC::RGB => convert::bgr24_bottom_up(src, width, height, stride, &mut out)?,
            FourCC::RGB3 => convert::rgb24_top_down(src, width, height, stride, &mut out)?,
            FourCC::BGR3 => convert::bgr24_top_down(src, width, height, stride, &mut out)?,
            FourCC::YUY2 | FourCC::YUYV => convert::yuyv(src, width, height, stride, &mut out)?,
            FourCC::UYVY => convert::uyvy(src, width, height, stride, &mut out)?,
            FourCC::NV12 => convert::nv12(src, width, height, stride, &mut out)?,
            FourCC::I420 | FourCC::IYUV => convert::i420(src, width, height, stride, &mut out)?,
            _ => return Err(NativeStatus::INVALID_MEDIA_TYPE),
        }
        Ok(out)
    }
}

impl MediaTransform for SoftwareVideoProcessor {
    fn name(&self) -> &str {
        "software video processor"
    }

    fn set_input_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus> {
        if !Self::supports(media_type) {
            return Err(NativeStatus::INVALID_MEDIA_TYPE);
        }
        self.input = Some(*media_type);
        self.output = None;
        self.pending = None;
        Ok(())
    }

    fn output_available_type(&self, index: usize) -> Result<MediaType, NativeStatus> {
        let input = self.input.as_ref().ok_or(NativeStatus::TYPE_NOT_SET)?;
        match index {
            0 => Ok(input.rgb24_like()),
            _ => Err(NativeStatus::NO_MORE_TYPES),
        }
    }

    fn set_output_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus> {
        let input = self.input.as_ref().ok_or(NativeStatus::TYPE_NOT_SET)?;
        if media_type.subtype != FourCC::RGB24
            || media_type.width != input.width
            || media_type.height != input.height
        {
            return Err(NativeStatus::INVALID_MEDIA_TYPE);
        }
        self.output = Some(*media_type);
        Ok(())
    }

    fn process_input(&mut self, sample: &Sample) -> Result<(), NativeStatus> {
        if self.output.is_none() {
            return Err(NativeStatus::TYPE_NOT_SET);
        }
        if self.pending.is_some() {
            return Err(NativeStatus::NOT_ACCEPTING);
        }
        self.pending = Some(sample.clone());
        Ok(())
    }

    fn process_output(&mut self) -> Result<StageOutput, NativeStatus> {
        let input = self.input.ok_or(NativeStatus::TYPE_NOT_SET)?;
        let Some(sample) = self.pending.take() else {
            return Ok(StageOutput::NeedMoreInput);
        };
        let data = self.convert(&input, &sample)?;
        let mut out = Sample::new(data).with_stride(input.width as usize * 3);
        out.timestamp = sample.timestamp;
        Ok(StageOutput::Sample(out))
    }
}

/// Motion-JPEG decoder producing top-down packed RGB.
#[derive(Default)]
pub struct MjpegDecoder {
    input: Option<MediaType>,
    output: Option<MediaType>,
    decoded: Option<Sample>,
    changed: Option<MediaType>,
}

impl MjpegDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supports(input: &MediaType) -> bool {
        matches!(input.subtype, FourCC::MJPG | FourCC::JPEG)
    }

    fn decode(data: &[u8]) -> Result<(Vec<u8>, u32, u32), NativeStatus> {
        let mut decoder = JpegDecoder::new(data);
        let pixels = decoder.decode().map_err(|e| {
            warn!("MJPEG decode failed: {}", e);
            NativeStatus::INVALID_STREAM_DATA
        })?;
        let (width, height) = decoder
            .dimensions()
            .ok_or(NativeStatus::INVALID_STREAM_DATA)?;
        let count = width * height;
        if count == 0 {
            return Err(NativeStatus::INVALID_STREAM_DATA);
        }

        // Normalize whatever component count the decoder produced to RGB
        let rgb = match pixels.len() / count {
            3 => pixels,
            1 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
            4 => pixels
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            _ => return Err(NativeStatus::INVALID_STREAM_DATA),
        };
        Ok((rgb, width as u32, height as u32))
    }
}

impl MediaTransform for MjpegDecoder {
    fn name(&self) -> &str {
        "software MJPEG decoder"
    }

    fn set_input_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus> {
        if !Self::supports(media_type) {
            return Err(NativeStatus::INVALID_MEDIA_TYPE);
        }
        self.input = Some(*media_type);
        self.output = None;
        self.decoded = None;
        self.changed = None;
        Ok(())
    }

    fn output_available_type(&self, index: usize) -> Result<MediaType, NativeStatus> {
        let input = self.input.as_ref().ok_or(NativeStatus::TYPE_NOT_SET)?;
        let subtype = match index {
            0 => FourCC::RGB3,
            1 => FourCC::BGR3,
            _ => return Err(NativeStatus::NO_MORE_TYPES),
        };
        Ok(MediaType::new(subtype, input.width, input.height).with_frame_rate(input.frame_rate))
    }

    fn set_output_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus> {
        let input = self.input.as_ref().ok_or(NativeStatus::TYPE_NOT_SET)?;
        if !matches!(media_type.subtype, FourCC::RGB3 | FourCC::BGR3)
            || media_type.width != input.width
            || media_type.height != input.height
        {
            return Err(NativeStatus::INVALID_MEDIA_TYPE);
        }
        self.output = Some(*media_type);
        Ok(())
    }

    fn process_input(&mut self, sample: &Sample) -> Result<(), NativeStatus> {
        let output = self.output.ok_or(NativeStatus::TYPE_NOT_SET)?;
        if self.decoded.is_some() {
            return Err(NativeStatus::NOT_ACCEPTING);
        }
        if sample.data.is_empty() {
            // Nothing to decode yet; the next pull reports need-more-input
            return Ok(());
        }

        let (mut rgb, width, height) = Self::decode(&sample.data)?;
        if width != output.width || height != output.height {
            debug!(width, height, "MJPEG frame size changed mid-stream");
            self.changed = Some(MediaType::new(output.subtype, width, height).with_frame_rate(output.frame_rate));
            return Ok(());
        }
        if output.subtype == FourCC::BGR3 {
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        let mut decoded = Sample::new(Bytes::from(rgb)).with_stride(width as usize * 3);
        decoded.timestamp = sample.timestamp;
        self.decoded = Some(decoded);
        Ok(())
    }

    fn process_output(&mut self) -> Result<StageOutput, NativeStatus> {
        if self.output.is_none() {
            return Err(NativeStatus::TYPE_NOT_SET);
        }
        if let Some(changed) = self.changed.take() {
            if let Some(input) = self.input.as_mut() {
                input.width = changed.width;
                input.height = changed.height;
            }
            self.output = Some(changed);
            return Ok(StageOutput::StreamChange(changed));
        }
        match self.decoded.take() {
            Some(sample) => Ok(StageOutput::Sample(sample)),
            None => Ok(StageOutput::NeedMoreInput),
        }
    }
}

/// Offers the software stages to the pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareTransformFactory;

impl TransformFactory for SoftwareTransformFactory {
    fn decoders(&self, input: &MediaType) -> Vec<Box<dyn MediaTransform>> {
        if MjpegDecoder::supports(input) {
            vec![Box::new(MjpegDecoder::new())]
        } else {
            Vec::new()
        }
    }

    fn video_processors(
        &self,
        input: &MediaType,
        output: &MediaType,
    ) -> Vec<Box<dyn MediaTransform>> {
        if SoftwareVideoProcessor::supports(input) && output.subtype == FourCC::RGB24 {
            vec![Box::new(SoftwareVideoProcessor::new())]
        } else {
            Vec::new()
        }
    }
}
