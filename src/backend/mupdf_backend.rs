//! MuPDF-backed document and page rendering

use std::borrow::Cow;
use std::path::Path;

use mupdf::{Colorspace, Document, Matrix, Page, Pixmap};

use super::{BackendError, PageRenderer, PdfDocument};
use crate::canvas::Canvas;
use crate::geometry::{PageSize, PixelSize, RectF};

pub struct MuPdfDocument {
    doc: Document,
    page_count: usize,
}

impl MuPdfDocument {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let doc = Document::open(path.to_string_lossy().as_ref())?;
        let page_count = doc.page_count()? as usize;
        Ok(Self { doc, page_count })
    }
}

impl PdfDocument for MuPdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn load_page(&self, index: usize) -> Result<Box<dyn PageRenderer>, BackendError> {
        if index >= self.page_count {
            return Err(BackendError::PageOutOfRange {
                index,
                count: self.page_count,
            });
        }
        let page = self.doc.load_page(index as i32)?;
        let bounds = page.bounds()?;
        let size = PageSize::new(
            f64::from(bounds.x1 - bounds.x0),
            f64::from(bounds.y1 - bounds.y0),
        );
        Ok(Box::new(MuPdfPageRenderer { page, size }))
    }
}

struct MuPdfPageRenderer {
    page: Page,
    size: PageSize,
}

impl PageRenderer for MuPdfPageRenderer {
    fn page_size(&self) -> PageSize {
        self.size
    }

    fn render(&mut self, canvas: &mut Canvas, page_rect: RectF) -> Result<(), BackendError> {
        let scale_x = (page_rect.width / self.size.width) as f32;
        let scale_y = (page_rect.height / self.size.height) as f32;
        let transform = Matrix::new_scale(scale_x, scale_y);

        let rgb = Colorspace::device_rgb();
        let pixmap = self.page.to_pixmap(&transform, &rgb, false, false)?;

        let (rows, channels) = packed_rows(&pixmap)?;
        canvas.blit_rgb(
            &rows,
            PixelSize::new(pixmap.width(), pixmap.height()),
            channels,
            (page_rect.x.round() as i64, page_rect.y.round() as i64),
        );
        Ok(())
    }
}

/// Strip stride padding so rows are tightly packed. Channels are left as
/// they are; the blit keeps only the leading RGB bytes of each pixel.
fn packed_rows(pixmap: &Pixmap) -> Result<(Cow<'_, [u8]>, usize), BackendError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(BackendError::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    let expected_min = stride.saturating_mul(height);
    if samples.len() < expected_min || row_bytes > stride {
        return Err(BackendError::generic("Pixmap buffer size mismatch"));
    }

    if stride == row_bytes {
        return Ok((Cow::Borrowed(&samples[..row_bytes * height]), n));
    }

    let mut out = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
        let row_start = y * stride;
        out.extend_from_slice(&samples[row_start..row_start + row_bytes]);
    }
    Ok((Cow::Owned(out), n))
}
