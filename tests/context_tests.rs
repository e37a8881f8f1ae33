use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vidcap::capture::SessionTimeouts;
use vidcap::{
    CaptureError, Config, Context, FormatDescriptor, FourCC, FrameRate, PropertyId, SimulatedBackend,
    SimulatedDeviceConfig,
};

fn default_context() -> Context {
    Context::with_config(&Config::default()).unwrap()
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// --- Devices ---

#[test]
fn test_duplicate_names_have_distinct_ids() {
    let context = default_context();
    assert_eq!(context.device_count(), 2);
    assert_eq!(context.device_name(0).unwrap(), context.device_name(1).unwrap());
    assert_ne!(context.device_unique_id(0).unwrap(), context.device_unique_id(1).unwrap());
}

#[test]
fn test_format_listing_keeps_native_order() {
    let context = default_context();
    assert_eq!(context.format_count(0).unwrap(), 5);
    let second = context.format_info(0, 1).unwrap();
    assert_eq!((second.width, second.height, second.fourcc), (1280, 720, FourCC::MJPG));
    assert!(matches!(context.format_info(0, 5), Err(CaptureError::UnknownDevice(_))));
}

#[test]
fn test_unknown_device_index() {
    let context = default_context();
    assert!(matches!(context.device_name(2), Err(CaptureError::UnknownDevice(_))));
    assert!(matches!(
        context.open_stream(7, 640, 480, FourCC::YUY2, 30.0),
        Err(CaptureError::UnknownDevice(_))
    ));
}

// --- Streams ---

#[test]
fn test_stream_ids_are_never_reused() {
    let context = default_context();
    let first = context.open_stream(1, 320, 240, FourCC::YUY2, 30.0).unwrap();
    let second = context.open_stream(1, 160, 120, FourCC::UYVY, 15.0).unwrap();
    assert_ne!(first, second);

    context.close_stream(first).unwrap();
    let third = context.open_stream(1, 320, 240, FourCC::YUY2, 30.0).unwrap();
    assert!(third > second);
    assert!(!context.is_open_stream(first));
    assert!(context.is_open_stream(second));
    assert!(context.is_open_stream(third));
}

#[test]
fn test_closed_stream_is_unknown() {
    let context = default_context();
    let id = context.open_stream(1, 320, 240, FourCC::YUY2, 30.0).unwrap();
    context.close_stream(id).unwrap();

    assert!(matches!(context.close_stream(id), Err(CaptureError::UnknownStream(i)) if i == id));
    let mut buffer = vec![0u8; 320 * 240 * 3];
    assert!(matches!(context.capture_frame(id, &mut buffer), Err(CaptureError::UnknownStream(_))));
    assert!(matches!(context.get_property(id, 1), Err(CaptureError::UnknownStream(_))));
}

#[test]
fn test_stream_reports_negotiated_format() {
    let context = default_context();
    let id = context.open_stream(0, 640, 480, FourCC::MJPG, 30.0).unwrap();
    assert_eq!(context.stream_resolution(id).unwrap(), (640, 480));
    assert_eq!(context.stream_fourcc(id).unwrap(), FourCC::MJPG);

    assert!(wait_for(|| context.has_new_frame(id).unwrap()));
    let mut buffer = vec![0u8; 640 * 480 * 3];
    assert_eq!(context.capture_frame(id, &mut buffer).unwrap(), buffer.len());
    assert!(context.stream_frame_count(id).unwrap() >= 1);
    assert!(context.stream_status(id).is_ok());
}

#[test]
fn test_best_fit_when_no_exact_match() {
    let context = default_context();
    // nothing at 800x600 NV12; best fit is the largest 30 fps mode
    let id = context.open_stream(0, 800, 600, FourCC::NV12, 30.0).unwrap();
    assert_eq!(context.stream_resolution(id).unwrap(), (1280, 720));
    assert_eq!(context.stream_fourcc(id).unwrap(), FourCC::MJPG);
}

#[test]
fn test_stopped_stream_is_not_open() {
    let device = SimulatedDeviceConfig::new(
        "Short",
        "sim://short",
        vec![FormatDescriptor::new(16, 16, FourCC::RGB24, FrameRate::from_fps(60))],
    )
    .ending_after(2);
    let backend = Arc::new(SimulatedBackend::new(vec![device]));
    let context = Context::with_backend(backend, SessionTimeouts::default()).unwrap();

    let id = context.open_stream(0, 16, 16, FourCC::RGB24, 60.0).unwrap();
    assert!(wait_for(|| !context.is_open_stream(id)));
    assert!(matches!(context.stream_status(id), Err(CaptureError::StreamStopped)));
    // stale frame is still readable
    let mut buffer = vec![0u8; 16 * 16 * 3];
    assert_eq!(context.capture_frame(id, &mut buffer).unwrap(), buffer.len());
    context.close_stream(id).unwrap();
}

// --- Properties by raw id ---

#[test]
fn test_properties_through_context() {
    let context = default_context();
    let id = context.open_stream(0, 640, 480, FourCC::YUY2, 30.0).unwrap();

    let zoom = PropertyId::Zoom as u32;
    let range = context.get_property_range(id, zoom).unwrap();
    assert_eq!((range.min, range.max, range.default), (100, 500, 100));
    context.set_property(id, zoom, 250).unwrap();
    assert_eq!(context.get_property(id, zoom).unwrap(), 250);

    let gain = PropertyId::Gain as u32;
    context.set_auto_property(id, gain, true).unwrap();
    assert!(context.get_auto_property(id, gain).unwrap());

    assert!(matches!(context.get_property(id, 0), Err(CaptureError::InvalidProperty(0))));
    assert!(matches!(context.set_property(id, 13, 1), Err(CaptureError::InvalidProperty(13))));
}

#[test]
fn test_image_properties_missing_on_second_camera() {
    let context = default_context();
    let id = context.open_stream(1, 320, 240, FourCC::YUY2, 30.0).unwrap();
    assert!(matches!(
        context.get_property(id, PropertyId::Brightness as u32),
        Err(CaptureError::PropertyUnsupported(PropertyId::Brightness))
    ));
    assert!(context.get_property(id, PropertyId::Exposure as u32).is_ok());
}
