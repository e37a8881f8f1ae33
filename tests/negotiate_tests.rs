use vidcap::format::negotiate::SOFT_FRAME_RATE_CEILING;
use vidcap::format::select_format_index;
use vidcap::{DeviceDescriptor, FormatDescriptor, FormatRequest, FormatSelection, FourCC, FrameRate};

fn device(formats: Vec<FormatDescriptor>) -> DeviceDescriptor {
    DeviceDescriptor::new("cam", "test://cam").with_formats(formats)
}

fn fmt(width: u32, height: u32, fourcc: FourCC, fps: u32) -> FormatDescriptor {
    FormatDescriptor::new(width, height, fourcc, FrameRate::from_fps(fps))
}

// --- Exact matches ---

#[test]
fn test_exact_match_returns_first_duplicate() {
    let dev = device(vec![
        fmt(320, 240, FourCC::YUY2, 30),
        fmt(640, 480, FourCC::MJPG, 30),
        fmt(640, 480, FourCC::MJPG, 30),
    ]);
    let req = FormatRequest::new(640, 480, FourCC::MJPG, 30.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(1));
}

#[test]
fn test_exact_match_tolerates_rational_rates() {
    let ntsc = FormatDescriptor::new(640, 480, FourCC::YUY2, FrameRate::new(30000, 1001));
    let dev = device(vec![fmt(640, 480, FourCC::YUY2, 15), ntsc]);
    let req = FormatRequest::new(640, 480, FourCC::YUY2, 30.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(1));
}

#[test]
fn test_exact_match_requires_same_fourcc() {
    let dev = device(vec![fmt(640, 480, FourCC::YUY2, 30), fmt(640, 480, FourCC::MJPG, 15)]);
    let req = FormatRequest::new(640, 480, FourCC::NV12, 30.0);
    // falls through to best fit, which prefers the 30 fps entry
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(0));
}

#[test]
fn test_rate_outside_tolerance_is_not_exact() {
    let dev = device(vec![fmt(640, 480, FourCC::YUY2, 25), fmt(320, 240, FourCC::YUY2, 30)]);
    let req = FormatRequest::new(640, 480, FourCC::YUY2, 30.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(1));
}

// --- Best fit ---

#[test]
fn test_best_fit_climbs_then_prefers_area() {
    let dev = device(vec![
        fmt(640, 480, FourCC::YUY2, 15),
        fmt(320, 240, FourCC::YUY2, 30),
        fmt(1280, 720, FourCC::YUY2, 30),
    ]);
    let req = FormatRequest::new(999, 999, FourCC::YUY2, 30.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(2));
}

#[test]
fn test_best_fit_stops_climbing_at_ceiling() {
    let dev = device(vec![fmt(320, 240, FourCC::YUY2, 30), fmt(640, 480, FourCC::YUY2, 60)]);
    let req = FormatRequest::new(1, 1, FourCC::MJPG, 5.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(0));
}

#[test]
fn test_best_fit_can_overshoot_from_below() {
    // the running best is under the ceiling, so a faster mode still wins
    let dev = device(vec![fmt(640, 480, FourCC::YUY2, 25), fmt(320, 240, FourCC::YUY2, 60)]);
    let req = FormatRequest::new(1, 1, FourCC::MJPG, 5.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(1));
}

#[test]
fn test_no_formats_selects_native_default() {
    let dev = device(Vec::new());
    let req = FormatRequest::new(640, 480, FourCC::YUY2, 30.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Default);
    assert_eq!(FormatSelection::Default.index(), None);
}

#[test]
fn test_unknown_rates_still_pick_largest() {
    let unknown = FrameRate::unknown();
    let dev = device(vec![
        FormatDescriptor::new(320, 240, FourCC::YUY2, unknown),
        FormatDescriptor::new(640, 480, FourCC::YUY2, unknown),
    ]);
    let req = FormatRequest::new(1, 1, FourCC::MJPG, 30.0);
    assert_eq!(select_format_index(&dev, &req), FormatSelection::Index(1));
}

// --- Greedy properties over generated format lists ---

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[(self.next() % items.len() as u64) as usize]
    }
}

#[test]
fn test_greedy_properties_hold() {
    let rates = [
        FrameRate::from_fps(5),
        FrameRate::from_fps(10),
        FrameRate::from_fps(15),
        FrameRate::from_fps(25),
        FrameRate::new(30000, 1001),
        FrameRate::from_fps(30),
        FrameRate::from_fps(60),
    ];
    let sizes = [(160, 120), (320, 240), (640, 480), (800, 600), (1280, 720), (1920, 1080)];
    let mut rng = Lcg(0x5eed);

    for _ in 0..500 {
        let count = 1 + (rng.next() % 8) as usize;
        let formats: Vec<_> = (0..count)
            .map(|_| {
                let (w, h) = rng.pick(&sizes);
                FormatDescriptor::new(w, h, FourCC::YUY2, rng.pick(&rates))
            })
            .collect();
        let dev = device(formats.clone());
        // never an exact match: no format uses NV12
        let req = FormatRequest::new(640, 480, FourCC::NV12, 30.0);

        let chosen = select_format_index(&dev, &req).index().expect("non-empty list picks an index");
        let best = formats[chosen];
        let best_rate = best.frame_rate.fps();

        for other in &formats {
            let rate = other.frame_rate.fps();
            if rate <= SOFT_FRAME_RATE_CEILING {
                assert!(rate <= best_rate, "{other} is under the ceiling and faster than {best}");
            }
            if rate == best_rate {
                assert!(other.area() <= best.area(), "{other} has the same rate as {best} but more pixels");
            }
        }
    }
}
