//! Stream session: one open native source, its transform pipeline and the
//! producer thread that feeds the frame store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::frame::{Frame, FrameMetadata};
use super::slot::{frame_slot, FramePublisher, FrameStore};
use crate::backend::{CaptureBackend, NativeSource, ReadEvent, SampleReader};
use crate::error::{CaptureError, Result};
use crate::format::{select_format_index, DeviceDescriptor, FormatRequest, FormatSelection, FourCC};
use crate::property::PropertyAdapter;
use crate::transform::{MediaType, TransformError, TransformOutcome, TransformPipeline};
use crate::StreamConfig;

/// Timing knobs for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// How long `close` waits for the producer to acknowledge the stop.
    pub close: Duration,
    /// Upper bound on one blocking native read, so the stop flag is seen.
    pub read: Duration,
}

impl From<&StreamConfig> for SessionTimeouts {
    fn from(config: &StreamConfig) -> Self {
        Self {
            close: Duration::from_millis(config.close_timeout_ms),
            read: Duration::from_millis(config.read_timeout_ms),
        }
    }
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

struct ActiveStream {
    device: DeviceDescriptor,
    selection: FormatSelection,
    // Replaced by the producer when the decoder renegotiates
    native: Arc<Mutex<MediaType>>,
    properties: PropertyAdapter,
    store: Arc<FrameStore>,
    stop: Arc<AtomicBool>,
    done: flume::Receiver<()>,
    producer: Option<JoinHandle<()>>,
    // Released after the producer has been stopped
    _source: Mutex<Box<dyn NativeSource>>,
}

pub struct StreamSession {
    backend: Arc<dyn CaptureBackend>,
    timeouts: SessionTimeouts,
    active: Option<ActiveStream>,
}

impl StreamSession {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self::with_timeouts(backend, SessionTimeouts::default())
    }

    pub fn with_timeouts(backend: Arc<dyn CaptureBackend>, timeouts: SessionTimeouts) -> Self {
        Self {
            backend,
            timeouts,
            active: None,
        }
    }

    /// Open `device` at the format closest to `request`. Any stream already
    /// open on this session is closed first.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub fn open(&mut self, device: &DeviceDescriptor, request: &FormatRequest) -> Result<()> {
        self.close();

        if !device.is_usable() {
            return Err(CaptureError::device_unavailable(&device.name, "device reports no formats"));
        }

        let selection = select_format_index(device, request);
        let mut source = self.backend.activate(device)?;
        let native = source.configure(selection).map_err(|status| {
            CaptureError::device_unavailable(&device.name, format!("could not select {selection} ({status})"))
        })?;
        info!(%selection, %native, "native format configured");

        let lens = source
            .lens_controls()
            .ok_or_else(|| CaptureError::device_unavailable(&device.name, "no lens control surface"))?;
        let properties = PropertyAdapter::new(lens, source.image_controls());
        properties.dump();

        let pipeline = TransformPipeline::for_input(self.backend.transform_factory(), &native)?;
        let (width, height) = pipeline
            .output_size()
            .ok_or_else(|| CaptureError::unsupported_format(native.subtype, "pipeline has no output"))?;

        let (publisher, store) = frame_slot(width, height);
        let store = Arc::new(store);

        let reader = source
            .start()
            .map_err(|status| CaptureError::device_unavailable(&device.name, format!("could not start reading ({status})")))?;

        let stop = Arc::new(AtomicBool::new(false));
        let native = Arc::new(Mutex::new(native));
        let (done_tx, done) = flume::bounded(1);
        let producer = Producer {
            reader,
            pipeline,
            publisher,
            stop: stop.clone(),
            read_timeout: self.timeouts.read,
            native: native.clone(),
            sequence: 0,
        };
        let handle = thread::Builder::new()
            .name("vidcap-producer".into())
            .spawn(move || {
                producer.run();
                let _ = done_tx.send(());
            })
            .map_err(|e| CaptureError::device_unavailable(&device.name, e))?;

        info!(width, height, "stream open");
        self.active = Some(ActiveStream {
            device: device.clone(),
            selection,
            native,
            properties,
            store,
            stop,
            done,
            producer: Some(handle),
            _source: Mutex::new(source),
        });
        Ok(())
    }

    /// Stop delivery and release the native source. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.stop.store(true, Ordering::Release);

        match active.done.recv_timeout(self.timeouts.close) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = active.producer.take() {
                    if handle.join().is_err() {
                        error!("producer thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Tear down anyway; the thread exits on its next read
                warn!(timeout = ?self.timeouts.close, "producer did not stop in time, detaching");
            }
        }

        active.store.clear();
        info!(device = %active.device.name, "stream closed");
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    fn active(&self) -> Result<&ActiveStream> {
        self.active.as_ref().ok_or(CaptureError::NotOpen)
    }

    /// `Err(StreamStopped)` once the producer has ended on its own.
    pub fn status(&self) -> Result<()> {
        let active = self.active()?;
        if active.store.stats().is_stopped() {
            return Err(CaptureError::StreamStopped);
        }
        Ok(())
    }

    pub fn is_new_frame_available(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| active.store.has_new_frame())
            .unwrap_or(false)
    }

    /// Copy the current frame into `buffer`. Never blocks for a new frame.
    pub fn capture_frame(&self, buffer: &mut [u8]) -> Result<usize> {
        self.active()?.store.copy_into(buffer)
    }

    /// Shared handle to the current frame without copying.
    pub fn latest_frame(&self) -> Result<(Bytes, Option<Arc<FrameMetadata>>)> {
        Ok(self.active()?.store.latest())
    }

    /// Output width and height.
    pub fn resolved_format(&self) -> Option<(u32, u32)> {
        self.active.as_ref().map(|active| active.store.resolution())
    }

    pub fn frame_len(&self) -> usize {
        self.active
            .as_ref()
            .map(|active| active.store.frame_len())
            .unwrap_or(0)
    }

    /// Native format samples currently arrive in. Starts as the configured
    /// format and follows decoder stream changes.
    pub fn native_format(&self) -> Option<MediaType> {
        self.active.as_ref().map(|active| *active.native.lock())
    }

    pub fn fourcc(&self) -> Option<FourCC> {
        self.native_format().map(|native| native.subtype)
    }

    pub fn selection(&self) -> Option<FormatSelection> {
        self.active.as_ref().map(|active| active.selection)
    }

    pub fn frame_count(&self) -> u64 {
        self.active
            .as_ref()
            .map(|active| active.store.stats().published())
            .unwrap_or(0)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.active
            .as_ref()
            .map(|active| active.store.stats().dropped())
            .unwrap_or(0)
    }

    pub fn properties(&self) -> Result<&PropertyAdapter> {
        Ok(&self.active()?.properties)
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.active.as_ref().map(|active| &active.device)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// State moved onto the producer thread.
struct Producer {
    reader: Box<dyn SampleReader>,
    pipeline: TransformPipeline,
    publisher: FramePublisher,
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
    native: Arc<Mutex<MediaType>>,
    sequence: u64,
}

impl Producer {
    fn run(mut self) {
        debug!("producer started");
        while !self.stop.load(Ordering::Acquire) {
            match self.reader.read_sample(self.read_timeout) {
                Ok(ReadEvent::Tick) => continue,
                Ok(ReadEvent::EndOfStream) => {
                    info!("native end of stream");
                    break;
                }
                Ok(ReadEvent::Sample(sample)) => {
                    if !self.handle(sample) {
                        break;
                    }
                }
                Err(status) => {
                    error!(%status, "native read failed, stopping stream");
                    break;
                }
            }
        }
        debug!(frames = self.publisher.stats().published(), "producer finished");
    }

    /// Transform and publish one sample. Returns false when the stream
    /// cannot continue.
    fn handle(&mut self, sample: crate::transform::Sample) -> bool {
        let started = Instant::now();
        let mut out = vec![0u8; self.pipeline.frame_bytes()];

        match self.pipeline.transform(&sample, &mut out) {
            Ok(TransformOutcome::Frame) => {
                metrics::histogram!("vidcap_transform_time_us").record(started.elapsed().as_micros() as f64);
                let Some((width, height)) = self.pipeline.output_size() else {
                    return false;
                };
                self.sequence += 1;
                let frame = Frame::new(
                    out,
                    FrameMetadata {
                        sequence: self.sequence,
                        width,
                        height,
                        source_format: self.native.lock().subtype,
                        device_timestamp: sample.timestamp,
                    },
                );
                if !self.publisher.publish(frame) {
                    debug!("frame store gone");
                    return false;
                }
            }
            Ok(TransformOutcome::NeedMoreInput) => {}
            Err(TransformError::StreamChanged(changed)) => {
                self.publisher.stats().record_drop();
                if let Err(e) = self.pipeline.reinitialize(&changed) {
                    error!("pipeline re-initialization failed: {}", e);
                    return false;
                }
                if let Some(input) = self.pipeline.input_type() {
                    *self.native.lock() = *input;
                }
            }
            Err(TransformError::Failure { stage, status }) => {
                self.publisher.stats().record_drop();
                debug!(%stage, %status, "dropped frame");
            }
        }
        true
    }
}

impl Drop for Producer {
    // Runs on every exit from `run`, unwinding included
    fn drop(&mut self) {
        if thread::panicking() {
            error!("producer thread panicked, stopping stream");
        }
        self.publisher.stats().mark_stopped();
    }
}
