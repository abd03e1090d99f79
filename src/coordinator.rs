//! Viewport-to-render translation, staleness checks, and display slots

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use image::Rgb;
use log::{debug, trace, warn};

use crate::backend::{BackendError, PageRenderer};
use crate::canvas::{Canvas, PageImage};
use crate::config::RenderConfig;
use crate::geometry::{PageSize, PixelSize, RectF};
use crate::request::{RenderOutcome, RequestId};
use crate::scheduler::{RenderScheduler, Ticket};

type SharedRenderer = Arc<Mutex<Box<dyn PageRenderer>>>;
type RenderResult = Result<PageImage, BackendError>;

/// Which display slot a completed render feeds
#[derive(Clone, Copy, Debug)]
enum Slot {
    Fallback,
    Viewport { placement: RectF },
}

/// Notifications for the UI layer, drained with
/// [`RenderCoordinator::poll_events`]
#[derive(Debug)]
pub enum RenderEvent {
    /// A whole-page low-resolution image is ready
    FallbackReady(PageImage),
    /// The bound page has its first presentable image
    FinishedLoading,
    /// A viewport image is ready; `placement` says where it goes, in page
    /// units (it covers more than the nominal viewport)
    ViewportReady { image: PageImage, placement: RectF },
    /// The viewport layer should be dropped; the fallback already matches
    /// the density a dedicated render would provide
    ViewportCleared,
}

struct InFlight {
    ticket: Ticket<RenderResult>,
    epoch: u64,
    slot: Slot,
    forced: bool,
}

/// Turns viewport state into render requests and routes the results.
///
/// Owned by the control thread. Renders run one at a time on the scheduler's
/// worker; the only state the worker touches is the bound page renderer,
/// behind its own lock. Completed images come back through [`Self::poll_events`],
/// where they are checked against the currently bound page before being
/// accepted into a display slot.
pub struct RenderCoordinator {
    config: RenderConfig,
    scheduler: RenderScheduler<RenderResult>,
    screen_size: PixelSize,
    surface_size: PixelSize,
    background: Rgb<u8>,
    page: Option<SharedRenderer>,
    page_size: Option<PageSize>,
    epoch: u64,
    fallback_density: Option<f64>,
    fallback_image: Option<PageImage>,
    viewport_image: Option<(PageImage, RectF)>,
    last_visible_rect: Option<RectF>,
    in_flight: Vec<InFlight>,
    pending_events: Vec<RenderEvent>,
}

impl RenderCoordinator {
    /// `screen_size` feeds the fallback pixel budget; `surface_size` is the
    /// resolution viewport renders are produced at (before the overrender
    /// margin is added).
    #[must_use]
    pub fn new(config: RenderConfig, screen_size: PixelSize, surface_size: PixelSize) -> Self {
        Self {
            scheduler: RenderScheduler::new(config.min_render_delay),
            config,
            screen_size,
            surface_size,
            background: Rgb([255, 255, 255]),
            page: None,
            page_size: None,
            epoch: 0,
            fallback_density: None,
            fallback_image: None,
            viewport_image: None,
            last_visible_rect: None,
            in_flight: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Update the throttle spacing for subsequent renders
    pub fn set_min_render_delay(&mut self, delay: Duration) {
        self.config.min_render_delay = delay;
        self.scheduler.set_min_delay(delay);
    }

    /// Change the paper color behind transparent page content; re-renders
    /// both layers
    pub fn set_background(&mut self, background: Rgb<u8>) {
        if self.background != background {
            self.background = background;
            self.force_full_refresh();
        }
    }

    /// The surface size changed (e.g. a layout pass); subsequent viewport
    /// renders are produced at the new resolution
    pub fn set_surface_size(&mut self, surface_size: PixelSize) {
        self.surface_size = surface_size;
    }

    /// Bind a new page.
    ///
    /// Work still in flight for the previous page is left to finish, but its
    /// results are discarded when they arrive. The new page gets a fresh
    /// fallback render immediately.
    pub fn attach(&mut self, page: Box<dyn PageRenderer>) {
        self.epoch += 1;
        self.page_size = Some(page.page_size());
        self.page = Some(Arc::new(Mutex::new(page)));
        self.fallback_density = None;
        self.fallback_image = None;
        self.viewport_image = None;
        self.last_visible_rect = None;
        debug!("attached page, epoch {}", self.epoch);
        self.submit_fallback(false);
    }

    /// The most recently accepted whole-page image
    #[must_use]
    pub fn fallback_image(&self) -> Option<&PageImage> {
        self.fallback_image.as_ref()
    }

    /// The most recently accepted viewport image and its placement in page
    /// units
    #[must_use]
    pub fn viewport_image(&self) -> Option<(&PageImage, RectF)> {
        self.viewport_image
            .as_ref()
            .map(|(image, placement)| (image, *placement))
    }

    /// Render the whole page at a resolution holding the total pixel count
    /// near screen area × the configured multiplier, regardless of the
    /// page's aspect ratio
    pub fn request_fallback_render(&mut self) -> Option<RequestId> {
        self.submit_fallback(false)
    }

    /// Render the region around `visible_rect` (page units) at the surface
    /// resolution.
    ///
    /// Skipped entirely when the fallback already matches or beats the
    /// density this render would provide; the viewport slot is cleared
    /// instead, since the fallback suffices at that zoom level.
    pub fn request_viewport_render(&mut self, visible_rect: RectF) -> Option<RequestId> {
        self.page.as_ref()?;
        self.page_size?;
        self.last_visible_rect = Some(visible_rect);

        let expanded = visible_rect.expanded_by(self.config.overrender_fraction);
        let candidate_density = f64::from(self.render_surface_size().width) / expanded.width;
        let fallback_density = self.fallback_density.unwrap_or(0.0);
        if candidate_density <= fallback_density {
            trace!(
                "viewport render skipped: {candidate_density:.3} px/unit <= fallback {fallback_density:.3}"
            );
            self.clear_viewport_slot();
            return None;
        }

        self.submit_viewport(visible_rect)
    }

    /// Re-render both layers unconditionally, e.g. after a theme change.
    ///
    /// The viewport pass is issued only once the fallback pass has actually
    /// run; issuing both at once would let the second supersede the first.
    pub fn force_full_refresh(&mut self) -> Option<RequestId> {
        self.submit_fallback(true)
    }

    /// Drain finished work and hand back what the UI should do.
    ///
    /// Staleness is decided here, on the thread that owns the display slots:
    /// a result whose page was swapped out mid-flight is dropped no matter
    /// what the scheduler did with it.
    pub fn poll_events(&mut self) -> Vec<RenderEvent> {
        let mut events = std::mem::take(&mut self.pending_events);
        let mut reissue_viewport = false;

        let entries = std::mem::take(&mut self.in_flight);
        for entry in entries {
            let Some(outcome) = entry.ticket.poll() else {
                self.in_flight.push(entry);
                continue;
            };
            // only a forced fallback that actually ran triggers the viewport
            // pass; one superseded by a newer forced fallback leaves the
            // reissue to its replacement, which would otherwise never start
            if entry.forced && matches!(outcome, RenderOutcome::Completed(_)) {
                reissue_viewport = true;
            }
            match outcome {
                RenderOutcome::Superseded | RenderOutcome::Cancelled => {
                    trace!("render {:?} dropped before completion", entry.ticket.id());
                }
                RenderOutcome::Completed(Err(err)) => {
                    warn!("render {:?} failed: {err}", entry.ticket.id());
                }
                RenderOutcome::Completed(Ok(image)) => {
                    if entry.epoch == self.epoch {
                        self.accept(image, entry.slot, &mut events);
                    } else {
                        trace!("render {:?} is for a detached page, discarding", entry.ticket.id());
                    }
                }
            }
        }

        if reissue_viewport {
            if let Some(rect) = self.last_visible_rect {
                self.submit_viewport(rect);
            }
        }

        events
    }

    fn accept(&mut self, image: PageImage, slot: Slot, events: &mut Vec<RenderEvent>) {
        match slot {
            Slot::Fallback => {
                self.fallback_image = Some(image.clone());
                events.push(RenderEvent::FallbackReady(image));
                events.push(RenderEvent::FinishedLoading);
            }
            Slot::Viewport { placement } => {
                self.viewport_image = Some((image.clone(), placement));
                events.push(RenderEvent::ViewportReady { image, placement });
            }
        }
    }

    fn submit_fallback(&mut self, forced: bool) -> Option<RequestId> {
        let page = Arc::clone(self.page.as_ref()?);
        let page_size = self.page_size?;

        let budget = self.screen_size.area() * self.config.fallback_budget_multiplier;
        let scale = (budget / page_size.area()).sqrt();
        let canvas_size = PixelSize::covering(page_size, scale);
        // fixed before the render completes; a later viewport request must
        // compare against what this render will provide, not what the slot
        // currently holds
        self.fallback_density = Some(f64::from(canvas_size.width) / page_size.width);

        Some(self.submit(page, canvas_size, RectF::UNIT, Slot::Fallback, forced))
    }

    fn submit_viewport(&mut self, visible_rect: RectF) -> Option<RequestId> {
        let page = Arc::clone(self.page.as_ref()?);
        let page_size = self.page_size?;

        let expanded = visible_rect.expanded_by(self.config.overrender_fraction);
        let canvas_size = self.render_surface_size();
        let bounds = expanded.normalized_to(page_size);

        Some(self.submit(
            page,
            canvas_size,
            bounds,
            Slot::Viewport { placement: expanded },
            false,
        ))
    }

    fn submit(
        &mut self,
        page: SharedRenderer,
        canvas_size: PixelSize,
        bounds: RectF,
        slot: Slot,
        forced: bool,
    ) -> RequestId {
        let background = self.background;
        let work = move || -> RenderResult {
            let mut canvas = Canvas::new(canvas_size, background);
            let page_rect = bounds.page_rect_in_canvas(canvas_size);
            let mut renderer = page.lock().unwrap_or_else(PoisonError::into_inner);
            renderer.render(&mut canvas, page_rect)?;
            Ok(canvas.snapshot())
        };

        let ticket = self.scheduler.enqueue(work);
        let id = ticket.id();
        trace!("submitted {slot:?} render {id:?} at {canvas_size:?}");
        self.in_flight.push(InFlight {
            ticket,
            epoch: self.epoch,
            slot,
            forced,
        });
        id
    }

    fn render_surface_size(&self) -> PixelSize {
        self.surface_size
            .scaled(1.0 + 2.0 * self.config.overrender_fraction)
    }

    fn clear_viewport_slot(&mut self) {
        if self.viewport_image.take().is_some() {
            self.pending_events.push(RenderEvent::ViewportCleared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::mpsc;
    use std::time::Instant;

    struct FakeRenderer {
        size: PageSize,
        gate: Option<mpsc::Receiver<()>>,
        fail: bool,
    }

    impl FakeRenderer {
        fn sized(width: f64, height: f64) -> Self {
            Self {
                size: PageSize::new(width, height),
                gate: None,
                fail: false,
            }
        }
    }

    impl PageRenderer for FakeRenderer {
        fn page_size(&self) -> PageSize {
            self.size
        }

        fn render(&mut self, _canvas: &mut Canvas, _page_rect: RectF) -> Result<(), BackendError> {
            if let Some(gate) = &self.gate {
                gate.recv().ok();
            }
            if self.fail {
                return Err(BackendError::generic("no pixels today"));
            }
            Ok(())
        }
    }

    fn coordinator() -> RenderCoordinator {
        RenderCoordinator::new(
            RenderConfig::new(0.0, 0.1, 3.0).unwrap(),
            PixelSize::new(300, 150),
            PixelSize::new(300, 150),
        )
    }

    /// Poll until nothing is in flight any more
    fn settle(coordinator: &mut RenderCoordinator) -> Vec<RenderEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut events = Vec::new();
        loop {
            events.extend(coordinator.poll_events());
            if coordinator.in_flight.is_empty() {
                return events;
            }
            assert!(Instant::now() < deadline, "renders never settled");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn fallback_sizes(events: &[RenderEvent]) -> Vec<PixelSize> {
        events
            .iter()
            .filter_map(|event| match event {
                RenderEvent::FallbackReady(image) => Some(image.size()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn attach_renders_a_fallback_at_the_budgeted_resolution() {
        let mut coordinator = coordinator();
        coordinator.attach(Box::new(FakeRenderer::sized(200.0, 100.0)));

        let events = settle(&mut coordinator);

        // budget 300*150*3 px over a 200x100 page: scale = sqrt(6.75)
        assert_eq!(fallback_sizes(&events), vec![PixelSize::new(520, 260)]);
        assert!(events.iter().any(|e| matches!(e, RenderEvent::FinishedLoading)));
        assert_eq!(
            coordinator.fallback_image().map(PageImage::size),
            Some(PixelSize::new(520, 260))
        );
    }

    #[test]
    fn viewport_render_is_gated_by_fallback_density() {
        let mut coordinator = coordinator();
        coordinator.attach(Box::new(FakeRenderer::sized(200.0, 100.0)));
        settle(&mut coordinator);
        // fallback density: 520 px over 200 units = 2.6 px/unit

        // fully zoomed out: candidate density 360/240 = 1.5, gated
        assert!(coordinator.request_viewport_render(RectF::new(0.0, 0.0, 200.0, 100.0)).is_none());
        assert!(coordinator.viewport_image().is_none());

        // zoomed in: candidate density 360/60 = 6.0, submitted
        let id = coordinator.request_viewport_render(RectF::new(0.0, 0.0, 50.0, 25.0));
        assert!(id.is_some());
        let events = settle(&mut coordinator);
        let placements: Vec<RectF> = events
            .iter()
            .filter_map(|event| match event {
                RenderEvent::ViewportReady { placement, .. } => Some(*placement),
                _ => None,
            })
            .collect();
        assert_eq!(placements, vec![RectF::new(-5.0, -2.5, 60.0, 30.0)]);

        // zooming back out clears the slot
        assert!(coordinator.request_viewport_render(RectF::new(0.0, 0.0, 200.0, 100.0)).is_none());
        let events = settle(&mut coordinator);
        assert!(events.iter().any(|e| matches!(e, RenderEvent::ViewportCleared)));
        assert!(coordinator.viewport_image().is_none());
    }

    #[test]
    fn late_result_for_a_detached_page_is_never_applied() {
        let mut coordinator = coordinator();

        let (gate_tx, gate_rx) = mpsc::channel();
        let mut slow = FakeRenderer::sized(200.0, 100.0);
        slow.gate = Some(gate_rx);
        coordinator.attach(Box::new(slow));
        // let the worker pick the render up and block inside it
        std::thread::sleep(Duration::from_millis(20));

        coordinator.attach(Box::new(FakeRenderer::sized(100.0, 200.0)));
        gate_tx.send(()).ok();

        let events = settle(&mut coordinator);
        // only the second page's fallback lands; 200x100's 520x260 never shows
        assert_eq!(fallback_sizes(&events), vec![PixelSize::new(260, 520)]);
    }

    #[test]
    fn render_failure_skips_the_slot_and_spares_future_requests() {
        let mut coordinator = coordinator();
        let mut failing = FakeRenderer::sized(200.0, 100.0);
        failing.fail = true;
        coordinator.attach(Box::new(failing));

        let events = settle(&mut coordinator);
        assert!(events.is_empty());
        assert!(coordinator.fallback_image().is_none());

        coordinator.attach(Box::new(FakeRenderer::sized(200.0, 100.0)));
        let events = settle(&mut coordinator);
        assert_eq!(fallback_sizes(&events), vec![PixelSize::new(520, 260)]);
    }

    #[test]
    fn forced_refresh_reissues_both_layers() {
        let mut coordinator = coordinator();
        coordinator.attach(Box::new(FakeRenderer::sized(200.0, 100.0)));
        settle(&mut coordinator);
        coordinator.request_viewport_render(RectF::new(0.0, 0.0, 50.0, 25.0));
        settle(&mut coordinator);

        coordinator.force_full_refresh();
        let events = settle(&mut coordinator);

        assert_eq!(fallback_sizes(&events), vec![PixelSize::new(520, 260)]);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RenderEvent::ViewportReady { .. })),
            "forced refresh must re-render the viewport layer too"
        );
    }

    #[test]
    #[serial]
    fn back_to_back_forced_refreshes_still_render_the_fallback() {
        let mut coordinator = RenderCoordinator::new(
            RenderConfig::new(0.05, 0.1, 3.0).unwrap(),
            PixelSize::new(300, 150),
            PixelSize::new(300, 150),
        );
        coordinator.attach(Box::new(FakeRenderer::sized(200.0, 100.0)));
        settle(&mut coordinator);
        coordinator.request_viewport_render(RectF::new(0.0, 0.0, 50.0, 25.0));
        settle(&mut coordinator);

        // both land in the same throttle window, so the first forced pass is
        // superseded by the second; the survivor must still render the
        // fallback before the viewport pass goes out
        coordinator.force_full_refresh();
        coordinator.force_full_refresh();
        let events = settle(&mut coordinator);

        assert_eq!(fallback_sizes(&events), vec![PixelSize::new(520, 260)]);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RenderEvent::ViewportReady { .. })),
            "the surviving forced pass must re-render the viewport layer"
        );
    }

    #[test]
    fn background_change_triggers_a_refresh() {
        let mut coordinator = coordinator();
        coordinator.attach(Box::new(FakeRenderer::sized(200.0, 100.0)));
        settle(&mut coordinator);

        coordinator.set_background(Rgb([20, 20, 20]));
        let events = settle(&mut coordinator);
        assert_eq!(fallback_sizes(&events).len(), 1);

        // same color again: nothing to do
        coordinator.set_background(Rgb([20, 20, 20]));
        assert!(settle(&mut coordinator).is_empty());
    }

    #[test]
    fn requests_without_a_bound_page_are_ignored() {
        let mut coordinator = coordinator();
        assert!(coordinator.request_fallback_render().is_none());
        assert!(coordinator.request_viewport_render(RectF::UNIT).is_none());
        assert!(coordinator.force_full_refresh().is_none());
        assert!(coordinator.poll_events().is_empty());
    }
}
