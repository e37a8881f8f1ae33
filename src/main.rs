//! vidcap demo: list devices, open a stream and pull frames

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vidcap::{Config, Context, PropertyId};

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Load configuration: optional TOML path as the only argument
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("vidcap starting with {:?} backend", config.backend.kind);
    vidcap::CONFIG.store(Arc::new(config.clone()));

    let context = Context::new()?;
    if context.device_count() == 0 {
        return Err(eyre!("no capture devices found"));
    }

    for index in 0..context.device_count() {
        info!("device {}: {} [{}]", index, context.device_name(index)?, context.device_unique_id(index)?);
        for format in 0..context.format_count(index)? {
            info!("  #{:<2} {}", format, context.format_info(index, format)?);
        }
    }

    let request = &config.capture;
    let stream = context.open_stream(request.device, request.width, request.height, request.fourcc, request.fps)?;
    let (width, height) = context.stream_resolution(stream)?;
    info!(
        "stream {} open: {}x{} from {}",
        stream,
        width,
        height,
        context.stream_fourcc(stream)?
    );

    for id in [PropertyId::Exposure, PropertyId::Focus, PropertyId::Zoom, PropertyId::Gain] {
        match context.get_property(stream, id as u32) {
            Ok(value) => info!("{} = {} (auto: {})", id, value, context.get_auto_property(stream, id as u32)?),
            Err(e) => info!("{}: {}", id, e),
        }
    }

    let mut buffer = vec![0u8; width as usize * height as usize * 3];
    let started = Instant::now();
    let mut grabbed = 0u64;
    while grabbed < request.frames {
        if let Err(e) = context.stream_status(stream) {
            warn!("stream ended early: {}", e);
            break;
        }
        if context.has_new_frame(stream)? {
            context.capture_frame(stream, &mut buffer)?;
            grabbed += 1;
        } else {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "grabbed {} frames in {:.2}s ({:.1} fps), published {}, dropped {}",
        grabbed,
        elapsed,
        grabbed as f64 / elapsed.max(f64::EPSILON),
        context.stream_frame_count(stream)?,
        context.stream_dropped_count(stream)?
    );

    context.close_stream(stream)?;
    info!("vidcap shutting down");
    Ok(())
}
