//! PDFium-backed document and page rendering

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::{PdfRenderConfig, Pdfium, PdfiumError};

use super::{BackendError, PageRenderer, PdfDocument};
use crate::canvas::Canvas;
use crate::geometry::{PageSize, PixelSize, RectF};

static LIBRARY_CHECK: OnceLock<Result<(), String>> = OnceLock::new();

/// Check once per process that the PDFium system library can be bound.
///
/// Idempotent; only the first call performs the check. Nothing binds
/// implicitly during construction.
pub fn ensure_initialized() -> Result<(), BackendError> {
    LIBRARY_CHECK
        .get_or_init(|| {
            Pdfium::bind_to_system_library()
                .map(drop)
                .map_err(|err| format!("{err:?}"))
        })
        .clone()
        .map_err(BackendError::generic)
}

/// PDFium's handles are neither `Send` nor `Sync`, so none of them survive
/// past a single call; each caller binds the library and re-opens the
/// document from its path on whichever thread it is running on.
fn bind() -> Result<Pdfium, BackendError> {
    ensure_initialized()?;
    let bindings = Pdfium::bind_to_system_library().map_err(from_pdfium)?;
    Ok(Pdfium::new(bindings))
}

pub struct PdfiumDocument {
    path: PathBuf,
    page_count: usize,
}

impl PdfiumDocument {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let pdfium = bind()?;
        let doc = pdfium.load_pdf_from_file(path, None).map_err(from_pdfium)?;
        let page_count = usize::from(doc.pages().len());
        Ok(Self {
            path: path.to_path_buf(),
            page_count,
        })
    }
}

impl PdfDocument for PdfiumDocument {
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
        let pdfium = bind()?;
        let doc = pdfium
            .load_pdf_from_file(&self.path, None)
            .map_err(from_pdfium)?;
        let index = index as u16;
        let page = doc.pages().get(index).map_err(from_pdfium)?;
        let size = PageSize::new(
            f64::from(page.width().value),
            f64::from(page.height().value),
        );
        Ok(Box::new(PdfiumPageRenderer {
            path: self.path.clone(),
            index,
            size,
        }))
    }
}

struct PdfiumPageRenderer {
    path: PathBuf,
    index: u16,
    size: PageSize,
}

impl PageRenderer for PdfiumPageRenderer {
    fn page_size(&self) -> PageSize {
        self.size
    }

    fn render(&mut self, canvas: &mut Canvas, page_rect: RectF) -> Result<(), BackendError> {
        let pdfium = bind()?;
        let doc = pdfium
            .load_pdf_from_file(&self.path, None)
            .map_err(from_pdfium)?;
        let page = doc.pages().get(self.index).map_err(from_pdfium)?;

        let target_width = page_rect.width.round().max(1.0) as i32;
        let target_height = page_rect.height.round().max(1.0) as i32;
        let config = PdfRenderConfig::new()
            .set_target_width(target_width)
            .set_target_height(target_height);
        let bitmap = page.render_with_config(&config).map_err(from_pdfium)?;

        let pixels = bitmap.as_image().into_rgb8();
        let src_size = PixelSize::new(pixels.width(), pixels.height());
        canvas.blit_rgb(
            pixels.as_raw(),
            src_size,
            3,
            (page_rect.x.round() as i64, page_rect.y.round() as i64),
        );
        Ok(())
    }
}

fn from_pdfium(err: PdfiumError) -> BackendError {
    BackendError::generic(format!("PDFium: {err:?}"))
}
