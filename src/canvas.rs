//! Render surfaces and immutable page snapshots

use std::fmt;
use std::sync::Arc;

use image::{ImageBuffer, Rgb, RgbImage};

use crate::geometry::PixelSize;

/// Opaque RGB surface the backends draw into
pub struct Canvas {
    buffer: RgbImage,
}

impl Canvas {
    /// Allocate a surface filled with `background`
    #[must_use]
    pub fn new(size: PixelSize, background: Rgb<u8>) -> Self {
        Self {
            buffer: ImageBuffer::from_pixel(size.width, size.height, background),
        }
    }

    #[must_use]
    pub fn size(&self) -> PixelSize {
        PixelSize::new(self.buffer.width(), self.buffer.height())
    }

    /// Copy a window of `src` onto the surface.
    ///
    /// `src` holds tightly packed rows of `channels`-byte pixels with RGB in
    /// the leading bytes. Source pixel (0, 0) lands at `origin` in surface
    /// coordinates; anything falling outside the surface is clipped.
    pub fn blit_rgb(&mut self, src: &[u8], src_size: PixelSize, channels: usize, origin: (i64, i64)) {
        debug_assert!(channels >= 3);
        let dest_size = self.size();
        let dest_width = i64::from(dest_size.width);
        let dest_height = i64::from(dest_size.height);
        let src_width = i64::from(src_size.width);
        let src_height = i64::from(src_size.height);
        let src_stride = src_size.width as usize * channels;

        let first_col = (-origin.0).max(0);
        let last_col = (dest_width - origin.0).min(src_width);
        if first_col >= last_col {
            return;
        }

        let dest_stride = dest_size.width as usize * 3;
        let dest: &mut [u8] = &mut self.buffer;

        for src_y in 0..src_height {
            let dest_y = origin.1 + src_y;
            if dest_y < 0 || dest_y >= dest_height {
                continue;
            }
            let src_row = &src[src_y as usize * src_stride..(src_y as usize + 1) * src_stride];
            let dest_row_start = dest_y as usize * dest_stride;

            if channels == 3 {
                let src_start = first_col as usize * 3;
                let src_end = last_col as usize * 3;
                let dest_start = dest_row_start + (origin.0 + first_col) as usize * 3;
                let dest_end = dest_start + (src_end - src_start);
                dest[dest_start..dest_end].copy_from_slice(&src_row[src_start..src_end]);
            } else {
                for src_x in first_col..last_col {
                    let px = &src_row[src_x as usize * channels..];
                    let dest_start = dest_row_start + (origin.0 + src_x) as usize * 3;
                    dest[dest_start..dest_start + 3].copy_from_slice(&px[..3]);
                }
            }
        }
    }

    /// Freeze the surface into an immutable shared snapshot
    #[must_use]
    pub fn snapshot(&self) -> PageImage {
        PageImage {
            pixels: Arc::from(self.buffer.as_raw().as_slice()),
            size: self.size(),
        }
    }
}

/// Immutable snapshot of a rendered surface, cheap to clone and share
#[derive(Clone)]
pub struct PageImage {
    pixels: Arc<[u8]>,
    size: PixelSize,
}

impl PageImage {
    #[must_use]
    pub fn size(&self) -> PixelSize {
        self.size
    }

    /// Raw RGB data, 3 bytes per pixel, row-major
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .finish_non_exhaustive()
    }
}
