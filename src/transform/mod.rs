//! Frame transform pipeline
//!
//! An optional decode stage followed by a mandatory normalize stage. The
//! pipeline is configured once per activated native format and then turns
//! each native sample into one top-down RGB24 frame.

pub mod convert;
pub mod media;
pub mod software;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::CaptureError;

pub use media::{MediaTransform, MediaType, NativeStatus, Sample, StageOutput, TransformFactory};
pub use software::{MjpegDecoder, SoftwareTransformFactory, SoftwareVideoProcessor};

/// Which stage of the pipeline reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStage {
    Decode,
    Normalize,
}

impl fmt::Display for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformStage::Decode => f.write_str("decode"),
            TransformStage::Normalize => f.write_str("normalize"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    DecodeConfigured,
    NormalizeConfigured,
    Ready,
}

/// Per-frame failure modes.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    Failure {
        stage: TransformStage,
        status: NativeStatus,
    },
    /// The decoder renegotiated its output mid-stream; call
    /// [`TransformPipeline::reinitialize`] before feeding more samples.
    StreamChanged(MediaType),
}

impl TransformError {
    fn decode(status: NativeStatus) -> Self {
        TransformError::Failure {
            stage: TransformStage::Decode,
            status,
        }
    }

    fn normalize(status: NativeStatus) -> Self {
        TransformError::Failure {
            stage: TransformStage::Normalize,
            status,
        }
    }
}

impl From<TransformError> for CaptureError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Failure { stage, status } => CaptureError::TransformFailure { stage, status },
            TransformError::StreamChanged(_) => CaptureError::TransformFailure {
                stage: TransformStage::Decode,
                status: NativeStatus::INVALID_MEDIA_TYPE,
            },
        }
    }
}

/// What a successful `transform` call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    /// The output buffer now holds a complete frame.
    Frame,
    /// The decoder absorbed the sample without emitting a frame.
    NeedMoreInput,
}

pub struct TransformPipeline {
    factory: Arc<dyn TransformFactory>,
    state: PipelineState,
    input: Option<MediaType>,
    decoder: Option<Box<dyn MediaTransform>>,
    processor: Option<Box<dyn MediaTransform>>,
    output: Option<MediaType>,
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("state", &self.state)
            .field("input", &self.input)
            .field("decoder", &self.decoder.is_some())
            .field("processor", &self.processor.is_some())
            .field("output", &self.output)
            .finish()
    }
}

impl TransformPipeline {
    pub fn new(factory: Arc<dyn TransformFactory>) -> Self {
        Self {
            factory,
            state: PipelineState::Uninitialized,
            input: None,
            decoder: None,
            processor: None,
            output: None,
        }
    }

    /// Build a ready pipeline for `input` in one step.
    pub fn for_input(factory: Arc<dyn TransformFactory>, input: &MediaType) -> Result<Self, CaptureError> {
        let mut pipeline = Self::new(factory);
        pipeline.initialize(input)?;
        Ok(pipeline)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn input_type(&self) -> Option<&MediaType> {
        self.input.as_ref()
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Output width and height once ready.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.output.map(|t| (t.width, t.height))
    }

    /// Bytes of one output frame.
    pub fn frame_bytes(&self) -> usize {
        self.output
            .map(|t| t.width as usize * t.height as usize * 3)
            .unwrap_or(0)
    }

    /// Drop both stages and return to `Uninitialized`.
    pub fn reset(&mut self) {
        self.decoder = None;
        self.processor = None;
        self.input = None;
        self.output = None;
        self.state = PipelineState::Uninitialized;
    }

    /// Configure the stages for `input`, replacing any previous configuration.
    #[instrument(skip(self), fields(input = %input))]
    pub fn initialize(&mut self, input: &MediaType) -> Result<(), CaptureError> {
        self.reset();

        let intermediate = if input.is_compressed() {
            let (decoder, decoded) = self.configure_decoder(input)?;
            self.decoder = Some(decoder);
            self.state = PipelineState::DecodeConfigured;
            decoded
        } else {
            *input
        };

        let output = intermediate.rgb24_like();
        let processor = self.configure_processor(input.subtype, &intermediate, &output)?;
        self.processor = Some(processor);
        self.state = PipelineState::NormalizeConfigured;

        self.input = Some(*input);
        self.output = Some(output);
        self.state = PipelineState::Ready;
        info!(
            decode = self.decoder.is_some(),
            width = output.width,
            height = output.height,
            "transform pipeline ready"
        );
        Ok(())
    }

    /// Rebuild after the decoder reported a new output type.
    pub fn reinitialize(&mut self, changed: &MediaType) -> Result<(), CaptureError> {
        let mut input = self
            .input
            .ok_or_else(|| CaptureError::unsupported_format(changed.subtype, "pipeline was never initialized"))?;
        input.width = changed.width;
        input.height = changed.height;
        warn!(width = input.width, height = input.height, "reinitializing pipeline after stream change");
        self.initialize(&input)
    }

    fn configure_decoder(&self, input: &MediaType) -> Result<(Box<dyn MediaTransform>, MediaType), CaptureError> {
        let candidates = self.factory.decoders(input);
        debug!("decoder candidates for {}:", input.subtype);
        for candidate in &candidates {
            debug!(" * {}", candidate.name());
        }
        let mut decoder = candidates
            .into_iter()
            .next()
            .ok_or_else(|| CaptureError::unsupported_format(input.subtype, "no decoder available"))?;

        decoder
            .set_input_type(input)
            .map_err(|status| CaptureError::unsupported_format(input.subtype, format!("decoder rejected input type ({status})")))?;

        let available = enumerate_output_types(decoder.as_ref());
        // The first offered type is taken as-is, without ranking
        let decoded = available
            .first()
            .copied()
            .ok_or_else(|| CaptureError::unsupported_format(input.subtype, "decoder offers no output type"))?;

        decoder
            .set_output_type(&decoded)
            .map_err(|status| CaptureError::unsupported_format(input.subtype, format!("decoder rejected output type ({status})")))?;

        debug!(decoder = decoder.name(), output = %decoded, "decode stage configured");
        Ok((decoder, decoded))
    }

    fn configure_processor(
        &self,
        native: crate::format::FourCC,
        input: &MediaType,
        output: &MediaType,
    ) -> Result<Box<dyn MediaTransform>, CaptureError> {
        let candidates = self.factory.video_processors(input, output);
        debug!("video processor candidates for {} -> {}:", input.subtype, output.subtype);
        for candidate in &candidates {
            debug!(" * {}", candidate.name());
        }
        let mut processor = candidates
            .into_iter()
            .next()
            .ok_or_else(|| CaptureError::unsupported_format(native, format!("no video processor for {}", input.subtype)))?;

        processor
            .set_input_type(input)
            .map_err(|status| CaptureError::unsupported_format(native, format!("video processor rejected input type ({status})")))?;
        for available in enumerate_output_types(processor.as_ref()) {
            debug!("   video processor can output {}", available.subtype);
        }
        processor
            .set_output_type(output)
            .map_err(|status| CaptureError::unsupported_format(native, format!("video processor rejected output type ({status})")))?;
        Ok(processor)
    }

    /// Turn one native sample into a top-down RGB24 frame in `out`.
    ///
    /// On `Ok(TransformOutcome::Frame)` exactly [`Self::frame_bytes`] bytes of
    /// `out` were written. On error `out` holds no usable frame.
    pub fn transform(&mut self, sample: &Sample, out: &mut [u8]) -> Result<TransformOutcome, TransformError> {
        if self.state != PipelineState::Ready {
            return Err(TransformError::normalize(NativeStatus::TYPE_NOT_SET));
        }
        let output = self.output.ok_or(TransformError::normalize(NativeStatus::TYPE_NOT_SET))?;
        let frame_bytes = self.frame_bytes();
        if out.len() < frame_bytes {
            return Err(TransformError::normalize(NativeStatus::BUFFER_TOO_SMALL));
        }

        let decoded = match self.decoder.as_mut() {
            Some(decoder) => {
                decoder.process_input(sample).map_err(TransformError::decode)?;
                match decoder.process_output().map_err(TransformError::decode)? {
                    StageOutput::Sample(decoded) => decoded,
                    StageOutput::NeedMoreInput => return Ok(TransformOutcome::NeedMoreInput),
                    StageOutput::StreamChange(changed) => return Err(TransformError::StreamChanged(changed)),
                }
            }
            None => sample.clone(),
        };

        let processor = self
            .processor
            .as_mut()
            .ok_or(TransformError::normalize(NativeStatus::TYPE_NOT_SET))?;
        processor.process_input(&decoded).map_err(TransformError::normalize)?;
        let normalized = match processor.process_output().map_err(TransformError::normalize)? {
            StageOutput::Sample(normalized) => normalized,
            StageOutput::NeedMoreInput => return Err(TransformError::normalize(NativeStatus::NEED_MORE_INPUT)),
            StageOutput::StreamChange(changed) => return Err(TransformError::StreamChanged(changed)),
        };

        let stride = normalized.stride.unwrap_or_else(|| output.default_stride());
        convert::flip_bgr_to_rgb(
            &normalized.data,
            stride,
            output.width as usize,
            output.height as usize,
            &mut out[..frame_bytes],
        )
        .map_err(TransformError::normalize)?;
        Ok(TransformOutcome::Frame)
    }
}

/// Stages never offer more output types than this.
pub const MAX_OUTPUT_TYPES: usize = 64;

fn enumerate_output_types(stage: &dyn MediaTransform) -> Vec<MediaType> {
    let mut types = Vec::new();
    for index in 0..MAX_OUTPUT_TYPES {
        let Ok(available) = stage.output_available_type(index) else {
            break;
        };
        debug!("   {} offers {}", stage.name(), available.subtype);
        types.push(available);
    }
    types
}
