//! Capture context: the device list and every open stream, addressed by
//! small integer ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::session::{SessionTimeouts, StreamSession};
use crate::backend::{create_backend, CaptureBackend};
use crate::error::{CaptureError, Result};
use crate::format::{DeviceDescriptor, FormatDescriptor, FormatRequest, FourCC};
use crate::property::PropertyRange;
use crate::{Config, CONFIG};

pub type StreamId = u32;

pub struct Context {
    backend: Arc<dyn CaptureBackend>,
    timeouts: SessionTimeouts,
    devices: Vec<DeviceDescriptor>,
    streams: Mutex<HashMap<StreamId, StreamSession>>,
    next_stream: AtomicU32,
}

impl Context {
    /// Build from the process-wide [`CONFIG`].
    pub fn new() -> Result<Self> {
        Self::with_config(&CONFIG.load())
    }

    pub fn with_config(config: &Config) -> Result<Self> {
        let backend = create_backend(config)?;
        Self::with_backend(backend, SessionTimeouts::from(&config.stream))
    }

    pub fn with_backend(backend: Arc<dyn CaptureBackend>, timeouts: SessionTimeouts) -> Result<Self> {
        let devices = backend.enumerate_devices()?;
        info!(backend = backend.name(), devices = devices.len(), "capture context created");
        for (index, device) in devices.iter().enumerate() {
            debug!("device {}: {} ({}), {} formats", index, device.name, device.path, device.formats.len());
        }
        Ok(Self {
            backend,
            timeouts,
            devices,
            streams: Mutex::new(HashMap::new()),
            next_stream: AtomicU32::new(1),
        })
    }

    /// Enumerate again. Open streams keep the descriptor they were opened with.
    pub fn refresh_devices(&mut self) -> Result<()> {
        self.devices = self.backend.enumerate_devices()?;
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, index: usize) -> Result<&DeviceDescriptor> {
        self.devices
            .get(index)
            .ok_or_else(|| CaptureError::UnknownDevice(index.to_string()))
    }

    pub fn device_name(&self, index: usize) -> Result<&str> {
        Ok(&self.device(index)?.name)
    }

    /// Stable path, unique even when display names repeat.
    pub fn device_unique_id(&self, index: usize) -> Result<&str> {
        Ok(&self.device(index)?.path)
    }

    pub fn format_count(&self, index: usize) -> Result<usize> {
        Ok(self.device(index)?.formats.len())
    }

    pub fn format_info(&self, index: usize, format: usize) -> Result<&FormatDescriptor> {
        let device = self.device(index)?;
        device
            .format(format)
            .ok_or_else(|| CaptureError::UnknownDevice(format!("{index} format #{format}")))
    }

    /// Open a stream on device `index`. Ids are never reused.
    pub fn open_stream(&self, index: usize, width: u32, height: u32, fourcc: FourCC, fps: f32) -> Result<StreamId> {
        let device = self.device(index)?;
        let mut session = StreamSession::with_timeouts(self.backend.clone(), self.timeouts);
        session.open(device, &FormatRequest::new(width, height, fourcc, fps))?;

        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, session);
        info!(stream = id, device = %device.name, "stream registered");
        Ok(id)
    }

    pub fn close_stream(&self, id: StreamId) -> Result<()> {
        let session = self.streams.lock().remove(&id);
        match session {
            Some(mut session) => {
                // Outside the table lock, since closing waits for the producer
                session.close();
                Ok(())
            }
            None => Err(CaptureError::UnknownStream(id)),
        }
    }

    fn with_stream<T>(&self, id: StreamId, f: impl FnOnce(&StreamSession) -> Result<T>) -> Result<T> {
        let streams = self.streams.lock();
        let session = streams.get(&id).ok_or(CaptureError::UnknownStream(id))?;
        f(session)
    }

    pub fn is_open_stream(&self, id: StreamId) -> bool {
        self.with_stream(id, |s| Ok(s.is_open() && s.status().is_ok()))
            .unwrap_or(false)
    }

    pub fn has_new_frame(&self, id: StreamId) -> Result<bool> {
        self.with_stream(id, |s| Ok(s.is_new_frame_available()))
    }

    pub fn capture_frame(&self, id: StreamId, buffer: &mut [u8]) -> Result<usize> {
        self.with_stream(id, |s| s.capture_frame(buffer))
    }

    pub fn stream_status(&self, id: StreamId) -> Result<()> {
        self.with_stream(id, |s| s.status())
    }

    pub fn stream_resolution(&self, id: StreamId) -> Result<(u32, u32)> {
        self.with_stream(id, |s| s.resolved_format().ok_or(CaptureError::NotOpen))
    }

    pub fn stream_fourcc(&self, id: StreamId) -> Result<FourCC> {
        self.with_stream(id, |s| s.fourcc().ok_or(CaptureError::NotOpen))
    }

    pub fn stream_frame_count(&self, id: StreamId) -> Result<u64> {
        self.with_stream(id, |s| Ok(s.frame_count()))
    }

    pub fn stream_dropped_count(&self, id: StreamId) -> Result<u64> {
        self.with_stream(id, |s| Ok(s.dropped_frames()))
    }

    pub fn get_property_range(&self, id: StreamId, property: u32) -> Result<PropertyRange> {
        self.with_stream(id, |s| s.properties()?.get_range(property))
    }

    pub fn get_property(&self, id: StreamId, property: u32) -> Result<i32> {
        self.with_stream(id, |s| s.properties()?.get(property))
    }

    pub fn set_property(&self, id: StreamId, property: u32, value: i32) -> Result<()> {
        self.with_stream(id, |s| s.properties()?.set(property, value))
    }

    pub fn get_auto_property(&self, id: StreamId, property: u32) -> Result<bool> {
        self.with_stream(id, |s| s.properties()?.get_auto(property))
    }

    pub fn set_auto_property(&self, id: StreamId, property: u32, enabled: bool) -> Result<()> {
        self.with_stream(id, |s| s.properties()?.set_auto(property, enabled))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let streams: Vec<_> = self.streams.lock().drain().collect();
        for (id, mut session) in streams {
            debug!(stream = id, "closing stream on context drop");
            session.close();
        }
    }
}
