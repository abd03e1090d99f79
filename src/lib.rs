//! Progressive rendering core for a zoomable single-page PDF view.
//!
//! A low-resolution whole-page fallback is rendered immediately; as the
//! viewport moves, higher-resolution renders of the visible region replace
//! it. All rendering goes through a serialized, rate-limited scheduler that
//! drops stale work instead of queueing it.

pub mod backend;
mod canvas;
mod config;
mod coordinator;
mod geometry;
mod request;
mod scheduler;

pub use canvas::{Canvas, PageImage};
pub use config::{
    ConfigError, DEFAULT_FALLBACK_BUDGET_MULTIPLIER, DEFAULT_MIN_RENDER_DELAY,
    DEFAULT_OVERRENDER_FRACTION, RenderConfig,
};
pub use coordinator::{RenderCoordinator, RenderEvent};
pub use geometry::{PageSize, PixelSize, RectF};
pub use request::{RenderOutcome, RequestId};
pub use scheduler::{Phase, RenderScheduler, Ticket};
