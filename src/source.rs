use std::sync::Arc;

use mupdf::{Colorspace, Matrix};

use crate::error::{Result, SignError};
use crate::geometry::PageDims;

pub const PDF_MIME: &str = "application/pdf";

/// An RGB8 bitmap of one page, rows packed without padding.
#[derive(Debug, Clone)]
pub struct Raster {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Anything that can report page sizes and rasterize pages. Pages are 1-based.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Native page size in PDF points.
    fn page_size(&self, page: usize) -> Result<PageDims>;

    /// Rasterize `page` at `scale` pixels per point.
    fn rasterize(&self, page: usize, scale: f64) -> Result<Raster>;

    fn page_sizes(&self) -> Result<Vec<PageDims>> {
        (1..=self.page_count()).map(|p| self.page_size(p)).collect()
    }
}

fn check_page(page: usize, count: usize) -> Result<()> {
    if page == 0 || page > count {
        return Err(SignError::PageOutOfRange(page));
    }
    Ok(())
}

/// PDF pages decoded and rasterized by MuPDF.
pub struct MupdfSource {
    doc: mupdf::Document,
    page_count: usize,
}

impl MupdfSource {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = mupdf::Document::from_bytes(bytes, PDF_MIME)
            .map_err(|e| SignError::Decode(e.to_string()))?;
        let page_count = doc
            .page_count()
            .map_err(|e| SignError::Decode(e.to_string()))?;
        if page_count <= 0 {
            return Err(SignError::Decode("document has no pages".into()));
        }
        log::info!("PDF has {} page(s)", page_count);
        Ok(Self {
            doc,
            page_count: page_count as usize,
        })
    }

    fn load_page(&self, page: usize) -> Result<mupdf::Page> {
        check_page(page, self.page_count)?;
        self.doc
            .load_page(page as i32 - 1)
            .map_err(|e| SignError::Render {
                page,
                reason: e.to_string(),
            })
    }
}

impl PageSource for MupdfSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size(&self, page: usize) -> Result<PageDims> {
        let bounds = self
            .load_page(page)?
            .bounds()
            .map_err(|e| SignError::Render {
                page,
                reason: e.to_string(),
            })?;
        Ok(PageDims::or_default(Some(PageDims::new(
            (bounds.x1 - bounds.x0) as f64,
            (bounds.y1 - bounds.y0) as f64,
        ))))
    }

    fn rasterize(&self, page: usize, scale: f64) -> Result<Raster> {
        let render_err = |e: mupdf::Error| SignError::Render {
            page,
            reason: e.to_string(),
        };
        let scale_f = scale as f32;
        let pixmap = self
            .load_page(page)?
            .to_pixmap(
                &Matrix::new_scale(scale_f, scale_f),
                &Colorspace::device_rgb(),
                false,
                true,
            )
            .map_err(render_err)?;

        Ok(Raster {
            rgb: pixmap.samples().to_vec(),
            width: pixmap.width(),
            height: pixmap.height(),
        })
    }
}

/// One pre-rendered page: encoded image bytes plus the native page size it
/// represents, when known.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub encoded: Vec<u8>,
    pub native: Option<PageDims>,
}

/// Pages supplied as already-rendered images (PNG/JPEG). Pages without a
/// native size are treated as US Letter.
pub struct ImageSource {
    pages: Arc<Vec<PageImage>>,
}

impl ImageSource {
    pub fn new(pages: Arc<Vec<PageImage>>) -> Self {
        Self { pages }
    }

    fn entry(&self, page: usize) -> Result<&PageImage> {
        check_page(page, self.pages.len())?;
        Ok(&self.pages[page - 1])
    }
}

impl PageSource for ImageSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, page: usize) -> Result<PageDims> {
        Ok(PageDims::or_default(self.entry(page)?.native))
    }

    fn rasterize(&self, page: usize, scale: f64) -> Result<Raster> {
        let entry = self.entry(page)?;
        let native = PageDims::or_default(entry.native);
        let decoded = image::load_from_memory(&entry.encoded).map_err(|e| SignError::Render {
            page,
            reason: e.to_string(),
        })?;

        let width = (native.width * scale).round().max(1.0) as u32;
        let height = (native.height * scale).round().max(1.0) as u32;
        let rgb = if decoded.width() == width && decoded.height() == height {
            decoded.to_rgb8()
        } else {
            decoded
                .resize_exact(width, height, image::imageops::FilterType::Triangle)
                .to_rgb8()
        };

        Ok(Raster {
            rgb: rgb.into_raw(),
            width,
            height,
        })
    }
}

/// A loaded document in a form that can be handed to another thread and
/// opened there.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Pdf(Arc<Vec<u8>>),
    Images(Arc<Vec<PageImage>>),
}

impl DocumentSource {
    /// Accept `bytes` as a PDF after checking its type. The sniffed content
    /// type wins; the declared one is used only when sniffing is inconclusive.
    pub fn from_pdf_bytes(bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<Self> {
        let mime = detect_mime(&bytes, declared_mime);
        if mime != PDF_MIME {
            log::warn!("Rejected document of type {}", mime);
            return Err(SignError::UnsupportedFileType(mime));
        }
        Ok(DocumentSource::Pdf(Arc::new(bytes)))
    }

    pub fn from_images(pages: Vec<PageImage>) -> Self {
        DocumentSource::Images(Arc::new(pages))
    }

    pub fn open(&self) -> Result<Box<dyn PageSource>> {
        match self {
            DocumentSource::Pdf(bytes) => Ok(Box::new(MupdfSource::from_bytes(bytes)?)),
            DocumentSource::Images(pages) => {
                if pages.is_empty() {
                    return Err(SignError::Decode("document has no pages".into()));
                }
                Ok(Box::new(ImageSource::new(Arc::clone(pages))))
            }
        }
    }
}

pub fn detect_mime(bytes: &[u8], declared: Option<&str>) -> String {
    match infer::get(bytes) {
        Some(kind) => kind.mime_type().to_string(),
        None => declared.unwrap_or("application/octet-stream").to_string(),
    }
}
