//! Tuning knobs for the render pipeline

use std::time::Duration;

/// Minimum spacing between successive render run-starts
pub const DEFAULT_MIN_RENDER_DELAY: Duration = Duration::from_millis(100);

/// Extra margin rendered beyond the visible viewport, per side
pub const DEFAULT_OVERRENDER_FRACTION: f64 = 0.1;

/// Fallback pixel budget as a multiple of the screen pixel count
pub const DEFAULT_FALLBACK_BUDGET_MULTIPLIER: f64 = 3.0;

/// Rejected configuration values
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("fallback budget multiplier must be positive, got {0}")]
    ZeroBudget(f64),
}

/// Render pipeline configuration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderConfig {
    /// Minimum spacing between successive render run-starts
    pub min_render_delay: Duration,
    /// Margin rendered beyond the visible viewport, per side, as a fraction
    /// of the viewport size
    pub overrender_fraction: f64,
    /// Fallback pixel budget as a multiple of the screen pixel count
    pub fallback_budget_multiplier: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            min_render_delay: DEFAULT_MIN_RENDER_DELAY,
            overrender_fraction: DEFAULT_OVERRENDER_FRACTION,
            fallback_budget_multiplier: DEFAULT_FALLBACK_BUDGET_MULTIPLIER,
        }
    }
}

impl RenderConfig {
    /// Build a validated configuration from raw values; the delay is in
    /// seconds. Invalid values are rejected here, never at enqueue time.
    pub fn new(
        min_render_delay_secs: f64,
        overrender_fraction: f64,
        fallback_budget_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        checked("min_render_delay", min_render_delay_secs)?;
        checked("overrender_fraction", overrender_fraction)?;
        checked("fallback_budget_multiplier", fallback_budget_multiplier)?;
        if fallback_budget_multiplier == 0.0 {
            return Err(ConfigError::ZeroBudget(fallback_budget_multiplier));
        }

        Ok(Self {
            min_render_delay: Duration::from_secs_f64(min_render_delay_secs),
            overrender_fraction,
            fallback_budget_multiplier,
        })
    }
}

fn checked(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite { field, value });
    }
    if value < 0.0 {
        return Err(ConfigError::Negative { field, value });
    }
    Ok(())
}
