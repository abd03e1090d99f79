//! End-to-end flows through the coordinator: fallback first, viewport
//! renders chasing the visible region, throttling and supersession under
//! bursts of viewport changes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serial_test::serial;

use pdfpane::backend::{BackendError, PageRenderer};
use pdfpane::{
    Canvas, PageSize, PixelSize, RectF, RenderConfig, RenderCoordinator, RenderEvent,
};

/// Renderer that records when each rasterization starts
struct RecordingRenderer {
    size: PageSize,
    starts: Arc<Mutex<Vec<Instant>>>,
}

impl RecordingRenderer {
    fn new(width: f64, height: f64) -> (Self, Arc<Mutex<Vec<Instant>>>) {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let renderer = Self {
            size: PageSize::new(width, height),
            starts: Arc::clone(&starts),
        };
        (renderer, starts)
    }
}

impl PageRenderer for RecordingRenderer {
    fn page_size(&self) -> PageSize {
        self.size
    }

    fn render(&mut self, _canvas: &mut Canvas, _page_rect: RectF) -> Result<(), BackendError> {
        self.starts.lock().unwrap().push(Instant::now());
        Ok(())
    }
}

fn drain_for(coordinator: &mut RenderCoordinator, window: Duration) -> Vec<RenderEvent> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        events.extend(coordinator.poll_events());
        std::thread::sleep(Duration::from_millis(2));
    }
    events
}

fn viewport_placements(events: &[RenderEvent]) -> Vec<RectF> {
    events
        .iter()
        .filter_map(|event| match event {
            RenderEvent::ViewportReady { placement, .. } => Some(*placement),
            _ => None,
        })
        .collect()
}

#[test]
fn fallback_then_viewport_flow() {
    let config = RenderConfig::new(0.0, 0.1, 3.0).unwrap();
    let mut coordinator =
        RenderCoordinator::new(config, PixelSize::new(300, 150), PixelSize::new(300, 150));

    let (renderer, _) = RecordingRenderer::new(200.0, 100.0);
    coordinator.attach(Box::new(renderer));

    let events = drain_for(&mut coordinator, Duration::from_millis(200));
    let fallback = events
        .iter()
        .find_map(|event| match event {
            RenderEvent::FallbackReady(image) => Some(image.clone()),
            _ => None,
        })
        .expect("fallback image");
    // pixel budget 300*150*3 over a 200x100 page
    assert_eq!(fallback.size(), PixelSize::new(520, 260));
    assert_eq!(fallback.pixels().len(), 520 * 260 * 3);
    assert!(events.iter().any(|e| matches!(e, RenderEvent::FinishedLoading)));

    // zoom into the top-left quarter-height square
    coordinator.request_viewport_render(RectF::new(0.0, 0.0, 50.0, 50.0));
    let events = drain_for(&mut coordinator, Duration::from_millis(200));

    // 10% overrender per side around (0,0)-(50,50)
    assert_eq!(
        viewport_placements(&events),
        vec![RectF::new(-5.0, -5.0, 60.0, 60.0)]
    );
    let (image, _) = coordinator.viewport_image().expect("viewport image");
    assert_eq!(image.size(), PixelSize::new(360, 180));
}

#[test]
#[serial]
fn viewport_bursts_are_throttled_and_superseded() {
    let config = RenderConfig::new(0.05, 0.1, 3.0).unwrap();
    let mut coordinator =
        RenderCoordinator::new(config, PixelSize::new(300, 150), PixelSize::new(300, 150));

    let (renderer, starts) = RecordingRenderer::new(200.0, 100.0);
    coordinator.attach(Box::new(renderer));

    // wait for the fallback so the burst cannot supersede it
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut events = Vec::new();
    while !events.iter().any(|e| matches!(e, RenderEvent::FallbackReady(_))) {
        assert!(Instant::now() < deadline, "fallback never completed");
        events.extend(coordinator.poll_events());
    }

    // a burst of viewport changes inside the throttle window opened by the
    // fallback's run-start: the intermediate positions never render, and the
    // survivor starts one full window later
    coordinator.request_viewport_render(RectF::new(0.0, 0.0, 50.0, 25.0));
    coordinator.request_viewport_render(RectF::new(10.0, 0.0, 50.0, 25.0));
    coordinator.request_viewport_render(RectF::new(20.0, 0.0, 50.0, 25.0));

    events.extend(drain_for(&mut coordinator, Duration::from_millis(300)));

    // exactly one viewport render survived the burst, at the last position
    assert_eq!(
        viewport_placements(&events),
        vec![RectF::new(15.0, -2.5, 60.0, 30.0)]
    );

    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), 2, "one fallback start and one viewport start");
    assert!(
        starts[1] - starts[0] >= Duration::from_millis(50),
        "viewport run-start not throttled against the fallback's"
    );
}

#[test]
fn page_switch_discards_in_flight_results() {
    let config = RenderConfig::new(0.0, 0.1, 3.0).unwrap();
    let mut coordinator =
        RenderCoordinator::new(config, PixelSize::new(300, 150), PixelSize::new(300, 150));

    let (first, _) = RecordingRenderer::new(200.0, 100.0);
    coordinator.attach(Box::new(first));
    let (second, _) = RecordingRenderer::new(100.0, 200.0);
    coordinator.attach(Box::new(second));

    let events = drain_for(&mut coordinator, Duration::from_millis(200));
    let fallback_sizes: Vec<PixelSize> = events
        .iter()
        .filter_map(|event| match event {
            RenderEvent::FallbackReady(image) => Some(image.size()),
            _ => None,
        })
        .collect();

    // whatever happened to the first page's render, only the second page's
    // fallback may reach the display slot
    assert_eq!(fallback_sizes, vec![PixelSize::new(260, 520)]);
}
