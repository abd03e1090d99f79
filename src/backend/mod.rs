//! PDF engine capability traits and backend selection

use std::path::Path;

use crate::canvas::Canvas;
use crate::geometry::{PageSize, RectF};

#[cfg(feature = "mupdf")]
mod mupdf_backend;
#[cfg(feature = "pdfium")]
mod pdfium_backend;

#[cfg(feature = "mupdf")]
pub use mupdf_backend::MuPdfDocument;
#[cfg(feature = "pdfium")]
pub use pdfium_backend::{PdfiumDocument, ensure_initialized};

/// Errors from the native PDF engines
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("PDF backend `{0}` is not compiled into this build")]
    Unavailable(&'static str),

    #[error("page {index} out of range, document has {count} pages")]
    PageOutOfRange { index: usize, count: usize },

    #[cfg(feature = "mupdf")]
    #[error("MuPDF: {0}")]
    MuPdf(#[from] mupdf::error::Error),

    #[error("{detail}")]
    Generic { detail: String },
}

impl BackendError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Rasterizes one bound page into caller-provided surfaces.
///
/// Implementations are only ever called from the single render worker, so
/// they do not need to tolerate concurrent callers.
pub trait PageRenderer: Send {
    /// Page dimensions in the page's own coordinate units
    fn page_size(&self) -> PageSize;

    /// Draw the page into `canvas`. `page_rect` is the whole page's position
    /// and size in canvas pixels; it may extend well outside the surface, in
    /// which case only the overlapping window is drawn.
    fn render(&mut self, canvas: &mut Canvas, page_rect: RectF) -> Result<(), BackendError>;
}

/// An open document that hands out page renderers
pub trait PdfDocument {
    fn page_count(&self) -> usize;

    fn load_page(&self, index: usize) -> Result<Box<dyn PageRenderer>, BackendError>;
}

/// Which native engine to open documents with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    MuPdf,
    Pdfium,
}

/// Open `path` with the selected engine.
///
/// Engines compiled out of the build report [`BackendError::Unavailable`].
pub fn open_document(kind: BackendKind, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
    match kind {
        BackendKind::MuPdf => open_mupdf(path),
        BackendKind::Pdfium => open_pdfium(path),
    }
}

#[cfg(feature = "mupdf")]
fn open_mupdf(path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
    Ok(Box::new(MuPdfDocument::open(path)?))
}

#[cfg(not(feature = "mupdf"))]
fn open_mupdf(_path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
    Err(BackendError::Unavailable("mupdf"))
}

#[cfg(feature = "pdfium")]
fn open_pdfium(path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
    Ok(Box::new(PdfiumDocument::open(path)?))
}

#[cfg(not(feature = "pdfium"))]
fn open_pdfium(_path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
    Err(BackendError::Unavailable("pdfium"))
}
