use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use vidcap::backend::simulated::encode_native;
use vidcap::transform::{
    MediaTransform, MediaType, NativeStatus, PipelineState, Sample, SoftwareTransformFactory, SoftwareVideoProcessor,
    StageOutput, TransformError, TransformFactory, TransformOutcome, TransformPipeline, MAX_OUTPUT_TYPES,
};
use vidcap::{CaptureError, FourCC, TransformStage};

fn software() -> Arc<dyn TransformFactory> {
    Arc::new(SoftwareTransformFactory)
}

fn jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let rgb: Vec<u8> = (0..width * height).flat_map(|_| color).collect();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, 95)
        .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out.into_inner()
}

fn assert_close(actual: &[u8], expected: [u8; 3], tolerance: u8) {
    for px in actual.chunks_exact(3) {
        for c in 0..3 {
            assert!(
                px[c].abs_diff(expected[c]) <= tolerance,
                "pixel {px:?} not within {tolerance} of {expected:?}"
            );
        }
    }
}

// --- Raw input: flip and channel order ---

#[test]
fn test_bottom_up_bgr_round_trip_any_size() {
    for (width, height) in [(1, 1), (2, 2), (3, 2), (5, 7), (7, 3), (16, 9)] {
        let media = MediaType::new(FourCC::RGB24, width, height);
        let stride = media.default_stride();
        let (w, h) = (width as usize, height as usize);

        // memory row m, pixel x: distinct value per channel
        let mut native = vec![0u8; stride * h];
        for m in 0..h {
            for x in 0..w {
                let at = m * stride + x * 3;
                native[at] = (m * 40 + x) as u8;
                native[at + 1] = (m * 40 + x + 100) as u8;
                native[at + 2] = (m * 40 + x + 200) as u8;
            }
        }

        let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
        assert!(!pipeline.has_decoder());
        assert_eq!(pipeline.frame_bytes(), w * h * 3);

        let mut out = vec![0u8; pipeline.frame_bytes()];
        let outcome = pipeline.transform(&Sample::new(native.clone()), &mut out).unwrap();
        assert_eq!(outcome, TransformOutcome::Frame);

        for y in 0..h {
            let m = h - 1 - y;
            for x in 0..w {
                let src = &native[m * stride + x * 3..m * stride + x * 3 + 3];
                let dst = &out[(y * w + x) * 3..(y * w + x) * 3 + 3];
                assert_eq!(dst, &[src[2], src[1], src[0]], "{width}x{height} at ({x}, {y})");
            }
        }
    }
}

#[test]
fn test_top_down_rgb3_passes_through() {
    let media = MediaType::new(FourCC::RGB3, 3, 2);
    let native: Vec<u8> = (0..18).collect();
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    let mut out = vec![0u8; 18];
    pipeline.transform(&Sample::new(native.clone()), &mut out).unwrap();
    assert_eq!(out, native);
}

#[test]
fn test_uniform_yuv_layouts_convert_to_rgb() {
    let color = [60, 160, 200];
    for fourcc in [FourCC::YUY2, FourCC::UYVY, FourCC::NV12, FourCC::I420] {
        let media = MediaType::new(fourcc, 6, 4);
        let rgb: Vec<u8> = (0..24).flat_map(|_| color).collect();
        let native = encode_native(&media, &rgb).unwrap();

        let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
        let mut out = vec![0u8; pipeline.frame_bytes()];
        pipeline.transform(&Sample::new(native), &mut out).unwrap();
        assert_close(&out, color, 4);
    }
}

#[test]
fn test_bgrx_input_drops_alpha() {
    let media = MediaType::new(FourCC::RGB32, 2, 1);
    let native = vec![10, 20, 30, 255, 40, 50, 60, 255];
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    let mut out = vec![0u8; 6];
    pipeline.transform(&Sample::new(native), &mut out).unwrap();
    assert_eq!(out, vec![30, 20, 10, 60, 50, 40]);
}

// --- Failures ---

#[test]
fn test_short_sample_fails_in_normalize() {
    let media = MediaType::new(FourCC::YUY2, 4, 4);
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    let mut out = vec![0u8; pipeline.frame_bytes()];
    let err = pipeline.transform(&Sample::new(vec![0u8; 8]), &mut out).unwrap_err();
    assert_eq!(
        err,
        TransformError::Failure {
            stage: TransformStage::Normalize,
            status: NativeStatus::INVALID_STREAM_DATA,
        }
    );
}

#[test]
fn test_small_output_buffer_is_rejected() {
    let media = MediaType::new(FourCC::RGB3, 2, 2);
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    let mut out = vec![0u8; 11];
    let err = pipeline.transform(&Sample::new(vec![0u8; 12]), &mut out).unwrap_err();
    assert!(matches!(
        err,
        TransformError::Failure {
            status: NativeStatus::BUFFER_TOO_SMALL,
            ..
        }
    ));
}

#[test]
fn test_compressed_without_decoder_is_unsupported() {
    let media = MediaType::new(FourCC::H264, 640, 480);
    let err = TransformPipeline::for_input(software(), &media).unwrap_err();
    assert!(matches!(err, CaptureError::UnsupportedFormat { fourcc, .. } if fourcc == FourCC::H264));
}

#[test]
fn test_unknown_raw_layout_is_unsupported() {
    let media = MediaType::new(FourCC::new(b"Y41P"), 64, 48);
    assert!(!SoftwareVideoProcessor::supports(&media));
    let err = TransformPipeline::for_input(software(), &media).unwrap_err();
    assert!(matches!(err, CaptureError::UnsupportedFormat { .. }));
}

#[test]
fn test_uninitialized_pipeline_refuses_samples() {
    let mut pipeline = TransformPipeline::new(software());
    assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    let mut out = vec![0u8; 4];
    assert!(pipeline.transform(&Sample::new(vec![0u8; 4]), &mut out).is_err());
}

// --- MJPEG decode stage ---

#[test]
fn test_mjpeg_frames_are_decoded() {
    let color = [200, 40, 90];
    let media = MediaType::new(FourCC::MJPG, 16, 8);
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    assert!(pipeline.has_decoder());

    let mut out = vec![0u8; pipeline.frame_bytes()];
    let outcome = pipeline.transform(&Sample::new(jpeg(16, 8, color)), &mut out).unwrap();
    assert_eq!(outcome, TransformOutcome::Frame);
    assert_close(&out, color, 12);
}

#[test]
fn test_empty_mjpeg_sample_needs_more_input() {
    let media = MediaType::new(FourCC::MJPG, 16, 8);
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    let mut out = vec![0u8; pipeline.frame_bytes()];
    let outcome = pipeline.transform(&Sample::new(Vec::new()), &mut out).unwrap();
    assert_eq!(outcome, TransformOutcome::NeedMoreInput);
}

#[test]
fn test_garbage_mjpeg_fails_in_decode() {
    let media = MediaType::new(FourCC::MJPG, 16, 8);
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    let mut out = vec![0u8; pipeline.frame_bytes()];
    let err = pipeline.transform(&Sample::new(vec![0u8; 32]), &mut out).unwrap_err();
    assert!(matches!(
        err,
        TransformError::Failure {
            stage: TransformStage::Decode,
            ..
        }
    ));
}

#[test]
fn test_mjpeg_size_change_requires_reinitialization() {
    let media = MediaType::new(FourCC::MJPG, 16, 8);
    let mut pipeline = TransformPipeline::for_input(software(), &media).unwrap();
    let mut out = vec![0u8; pipeline.frame_bytes()];

    let err = pipeline
        .transform(&Sample::new(jpeg(32, 16, [0, 0, 255])), &mut out)
        .unwrap_err();
    let TransformError::StreamChanged(changed) = err else {
        panic!("expected a stream change, got {err:?}");
    };
    assert_eq!((changed.width, changed.height), (32, 16));

    pipeline.reinitialize(&changed).unwrap();
    assert_eq!(pipeline.output_size(), Some((32, 16)));
    assert_eq!(pipeline.input_type().map(|t| t.subtype), Some(FourCC::MJPG));

    let mut out = vec![0u8; pipeline.frame_bytes()];
    let outcome = pipeline.transform(&Sample::new(jpeg(32, 16, [0, 0, 255])), &mut out).unwrap();
    assert_eq!(outcome, TransformOutcome::Frame);
    assert_close(&out, [0, 0, 255], 12);
}

// --- Pluggable stages ---

/// Pass-through "decoder" for H264 that offers `offers` output layouts,
/// alternating RGB3 and BGR3.
struct RecordingDecoder {
    chosen: Arc<Mutex<Option<FourCC>>>,
    queries: Arc<AtomicUsize>,
    offers: usize,
    input: Option<MediaType>,
    pending: Option<Sample>,
}

impl MediaTransform for RecordingDecoder {
    fn name(&self) -> &str {
        "recording decoder"
    }

    fn set_input_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus> {
        self.input = Some(*media_type);
        Ok(())
    }

    fn output_available_type(&self, index: usize) -> Result<MediaType, NativeStatus> {
        let input = self.input.ok_or(NativeStatus::TYPE_NOT_SET)?;
        self.queries.fetch_add(1, Ordering::Relaxed);
        if index >= self.offers {
            return Err(NativeStatus::NO_MORE_TYPES);
        }
        let subtype = if index % 2 == 0 { FourCC::RGB3 } else { FourCC::BGR3 };
        Ok(MediaType::new(subtype, input.width, input.height))
    }

    fn set_output_type(&mut self, media_type: &MediaType) -> Result<(), NativeStatus> {
        *self.chosen.lock().unwrap() = Some(media_type.subtype);
        Ok(())
    }

    fn process_input(&mut self, sample: &Sample) -> Result<(), NativeStatus> {
        self.pending = Some(sample.clone());
        Ok(())
    }

    fn process_output(&mut self) -> Result<StageOutput, NativeStatus> {
        Ok(match self.pending.take() {
            Some(sample) => StageOutput::Sample(sample),
            None => StageOutput::NeedMoreInput,
        })
    }
}

struct RecordingFactory {
    chosen: Arc<Mutex<Option<FourCC>>>,
    queries: Arc<AtomicUsize>,
    offers: usize,
}

impl RecordingFactory {
    fn new(offers: usize) -> Self {
        Self {
            chosen: Arc::new(Mutex::new(None)),
            queries: Arc::new(AtomicUsize::new(0)),
            offers,
        }
    }
}

impl TransformFactory for RecordingFactory {
    fn decoders(&self, _input: &MediaType) -> Vec<Box<dyn MediaTransform>> {
        vec![Box::new(RecordingDecoder {
            chosen: self.chosen.clone(),
            queries: self.queries.clone(),
            offers: self.offers,
            input: None,
            pending: None,
        })]
    }

    fn video_processors(&self, input: &MediaType, output: &MediaType) -> Vec<Box<dyn MediaTransform>> {
        SoftwareTransformFactory.video_processors(input, output)
    }
}

#[test]
fn test_decoder_output_is_first_offered_type() {
    let factory = Arc::new(RecordingFactory::new(2));
    let chosen = factory.chosen.clone();
    let media = MediaType::new(FourCC::H264, 2, 2);

    let mut pipeline = TransformPipeline::for_input(factory, &media).unwrap();
    assert!(pipeline.has_decoder());
    assert_eq!(*chosen.lock().unwrap(), Some(FourCC::RGB3));

    // the "decoded" payload is top-down RGB, so it comes out unchanged
    let payload: Vec<u8> = (1..=12).collect();
    let mut out = vec![0u8; 12];
    pipeline.transform(&Sample::new(payload.clone()), &mut out).unwrap();
    assert_eq!(out, payload);
}

#[test]
fn test_endless_type_offers_are_capped() {
    let factory = Arc::new(RecordingFactory::new(usize::MAX));
    let chosen = factory.chosen.clone();
    let queries = factory.queries.clone();
    let media = MediaType::new(FourCC::H264, 2, 2);

    let pipeline = TransformPipeline::for_input(factory, &media).unwrap();
    assert!(pipeline.has_decoder());
    assert_eq!(*chosen.lock().unwrap(), Some(FourCC::RGB3));
    assert_eq!(queries.load(Ordering::Relaxed), MAX_OUTPUT_TYPES);
}
