//! Page-space and pixel-space geometry

/// Page dimensions in the page's own coordinate units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn area(self) -> f64 {
        self.width * self.height
    }
}

/// Pixel dimensions of a render surface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count
    #[must_use]
    pub fn area(self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }

    /// Uniformly scale both dimensions, rounding to whole pixels
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self::from_f64(f64::from(self.width) * factor, f64::from(self.height) * factor)
    }

    /// Pixel size covering `page` at `scale` pixels per page unit
    #[must_use]
    pub fn covering(page: PageSize, scale: f64) -> Self {
        Self::from_f64(page.width * scale, page.height * scale)
    }

    fn from_f64(width: f64, height: f64) -> Self {
        Self {
            width: width.round().max(1.0) as u32,
            height: height.round().max(1.0) as u32,
        }
    }
}

/// Axis-aligned rectangle with `f64` coordinates.
///
/// Used both for page-space rects (page units) and for normalized bounds,
/// where the unit square is the whole page. Normalized bounds may extend
/// outside the unit square; the extra area is the overrender margin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectF {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectF {
    /// The unit square: the whole page in normalized coordinates
    pub const UNIT: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Grow by `fraction` of the rect's own size on each side
    #[must_use]
    pub fn expanded_by(self, fraction: f64) -> Self {
        Self {
            x: self.x - fraction * self.width,
            y: self.y - fraction * self.height,
            width: self.width * (1.0 + 2.0 * fraction),
            height: self.height * (1.0 + 2.0 * fraction),
        }
    }

    /// Express a page-space rect as a fraction of the page
    #[must_use]
    pub fn normalized_to(self, page: PageSize) -> Self {
        Self {
            x: self.x / page.width,
            y: self.y / page.height,
            width: self.width / page.width,
            height: self.height / page.height,
        }
    }

    /// Where the whole page lands, in canvas pixels, when this normalized
    /// region fills the canvas exactly
    #[must_use]
    pub fn page_rect_in_canvas(self, canvas: PixelSize) -> Self {
        let scale_x = f64::from(canvas.width) / self.width;
        let scale_y = f64::from(canvas.height) / self.height;
        Self {
            x: -self.x * scale_x,
            y: -self.y * scale_y,
            width: scale_x,
            height: scale_y,
        }
    }
}
