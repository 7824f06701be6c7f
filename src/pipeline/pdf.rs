//! pdfium access: outlines, text, embedded images, page rasters and page copies.
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local state
//! and must not be driven from async code directly. Every public function here
//! is `async` and moves the real work onto `tokio::task::spawn_blocking`; the
//! `*_blocking` halves hold the pdfium handles for the whole operation.

use crate::error::DocPrepError;
use crate::toc::TocEntry;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bind to pdfium: `PDFIUM_LIB_PATH` (library file or its directory) first,
/// then the system library.
pub fn bind_pdfium() -> Result<Pdfium, DocPrepError> {
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        let pb = PathBuf::from(p);
        let lib_path = if pb.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&pb)
        } else {
            pb
        };
        match Pdfium::bind_to_library(&lib_path) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(e) => warn!(
                "PDFIUM_LIB_PATH '{}' could not be bound ({:?}); trying system library",
                lib_path.display(),
                e
            ),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| DocPrepError::PdfiumBindingFailed(format!("{:?}", e)))
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, DocPrepError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| DocPrepError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, DocPrepError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DocPrepError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocPrepError::Internal(format!("{what} task panicked: {e}")))?
}

// ── Outline ──────────────────────────────────────────────────────────────

/// Page count plus the flattened outline of a document.
#[derive(Debug, Clone)]
pub struct OutlineDocument {
    pub total_pages: usize,
    pub toc: Vec<TocEntry>,
}

/// Read the outline (bookmark tree) as a depth-first list of [`TocEntry`].
pub async fn read_outline(path: &Path) -> Result<OutlineDocument, DocPrepError> {
    let path = path.to_path_buf();
    blocking("Outline", move || read_outline_blocking(&path)).await
}

fn read_outline_blocking(path: &Path) -> Result<OutlineDocument, DocPrepError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, path)?;
    let total_pages = document.pages().len() as usize;

    let mut toc = Vec::new();
    if let Some(root) = document.bookmarks().root() {
        collect_outline(root, 1, &mut toc);
    }
    info!("PDF loaded: {} pages, {} outline items", total_pages, toc.len());

    Ok(OutlineDocument { total_pages, toc })
}

fn collect_outline(first: PdfBookmark<'_>, level: u32, out: &mut Vec<TocEntry>) {
    let mut current = Some(first);
    while let Some(bookmark) = current {
        let title = bookmark.title().unwrap_or_default();
        let page = bookmark
            .destination()
            .and_then(|d| d.page_index().ok())
            .map(|idx| idx as i32 + 1)
            .unwrap_or(-1);
        out.push(TocEntry::new(level, title, page));

        if let Some(child) = bookmark.first_child() {
            collect_outline(child, level + 1, out);
        }
        current = bookmark.next_sibling();
    }
}

// ── Text statistics ──────────────────────────────────────────────────────

/// Count extracted text characters for each 1-based inclusive page span.
///
/// Pages outside the document contribute nothing.
pub async fn page_characters(
    path: &Path,
    spans: Vec<(i32, i32)>,
) -> Result<Vec<usize>, DocPrepError> {
    let path = path.to_path_buf();
    blocking("Character count", move || {
        page_characters_blocking(&path, &spans)
    })
    .await
}

fn page_characters_blocking(path: &Path, spans: &[(i32, i32)]) -> Result<Vec<usize>, DocPrepError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, path)?;
    let pages = document.pages();
    let total = pages.len() as i32;

    // Spans overlap heavily (parents contain children); count each page once.
    let mut per_page: Vec<Option<usize>> = vec![None; total.max(0) as usize];
    let mut count_page = |idx: i32| -> usize {
        if idx < 0 || idx >= total {
            return 0;
        }
        let slot = &mut per_page[idx as usize];
        *slot.get_or_insert_with(|| {
            pages
                .get(idx as u16)
                .ok()
                .and_then(|page| page.text().ok().map(|t| t.all().chars().count()))
                .unwrap_or(0)
        })
    };

    Ok(spans
        .iter()
        .map(|&(start, end)| (start - 1..end).map(&mut count_page).sum())
        .collect())
}

// ── Page copies ──────────────────────────────────────────────────────────

/// One output document: a 0-based inclusive page span of the source.
#[derive(Debug, Clone)]
pub struct PageRangeJob {
    pub start: usize,
    pub end: usize,
    pub dest: PathBuf,
}

/// Copy each job's pages into a new document saved at `job.dest`.
pub async fn write_page_ranges(path: &Path, jobs: Vec<PageRangeJob>) -> Result<(), DocPrepError> {
    let path = path.to_path_buf();
    blocking("Split", move || write_page_ranges_blocking(&path, &jobs)).await
}

fn write_page_ranges_blocking(path: &Path, jobs: &[PageRangeJob]) -> Result<(), DocPrepError> {
    let pdfium = bind_pdfium()?;
    let source = open(&pdfium, path)?;

    for job in jobs {
        let fail = |e: PdfiumError| DocPrepError::PdfOperationFailed {
            page: job.start + 1,
            detail: format!("{:?}", e),
        };
        let mut target = pdfium.create_new_pdf().map_err(fail)?;
        target
            .pages_mut()
            .copy_page_range_from_document(&source, job.start as u16..=job.end as u16, 0)
            .map_err(fail)?;
        target.save_to_file(&job.dest).map_err(fail)?;
        debug!(
            "Wrote pages {}-{} → {}",
            job.start + 1,
            job.end + 1,
            job.dest.display()
        );
    }

    Ok(())
}

// ── Page extraction ──────────────────────────────────────────────────────

/// Text, saved images and (optionally) a raster of one page.
#[derive(Debug)]
pub struct ExtractedPage {
    /// 0-based page index.
    pub index: usize,
    pub text: String,
    /// Paths of the embedded images written for this page.
    pub images: Vec<PathBuf>,
    pub raster: Option<DynamicImage>,
}

/// What [`extract_pages`] should pull out of each page.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Directory embedded images are written to.
    pub image_dir: PathBuf,
    /// File-name prefix, conventionally the PDF file name (`book.pdf`).
    pub image_prefix: String,
    /// Longest raster edge in pixels; `None` skips rasterisation.
    pub raster_max_pixels: Option<u32>,
}

/// Extract every page's text and embedded images, saving images as
/// `<prefix>-<page0>-<n>.png` under `image_dir`.
pub async fn extract_pages(
    path: &Path,
    options: ExtractOptions,
) -> Result<Vec<ExtractedPage>, DocPrepError> {
    let path = path.to_path_buf();
    blocking("Extract", move || extract_pages_blocking(&path, &options)).await
}

fn extract_pages_blocking(
    path: &Path,
    options: &ExtractOptions,
) -> Result<Vec<ExtractedPage>, DocPrepError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, path)?;

    std::fs::create_dir_all(&options.image_dir).map_err(|source| {
        DocPrepError::OutputWriteFailed {
            path: options.image_dir.clone(),
            source,
        }
    })?;

    let render_config = options.raster_max_pixels.map(|px| {
        PdfRenderConfig::new()
            .set_target_width(px as i32)
            .set_maximum_height(px as i32)
    });

    let mut results = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let text = page.text().map(|t| t.all()).unwrap_or_else(|e| {
            warn!("Page {}: text extraction failed: {:?}", index + 1, e);
            String::new()
        });

        let mut images = Vec::new();
        let mut n = 0;
        for object in page.objects().iter() {
            let Some(image_object) = object.as_image_object() else {
                continue;
            };
            let raw = match image_object.get_raw_image() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Page {}: skipping unreadable image: {:?}", index + 1, e);
                    continue;
                }
            };
            n += 1;
            let file = options
                .image_dir
                .join(format!("{}-{}-{}.png", options.image_prefix, index, n));
            raw.save_with_format(&file, image::ImageFormat::Png)
                .map_err(|e| DocPrepError::PdfOperationFailed {
                    page: index + 1,
                    detail: format!("saving {}: {}", file.display(), e),
                })?;
            images.push(file);
        }

        let raster = match &render_config {
            Some(cfg) => {
                let bitmap = page.render_with_config(cfg).map_err(|e| {
                    DocPrepError::PdfOperationFailed {
                        page: index + 1,
                        detail: format!("{:?}", e),
                    }
                })?;
                Some(bitmap.as_image())
            }
            None => None,
        };

        debug!(
            "Page {}: {} chars, {} images",
            index + 1,
            text.chars().count(),
            images.len()
        );
        results.push(ExtractedPage {
            index,
            text,
            images,
            raster,
        });
    }

    Ok(results)
}

// ── Metadata ─────────────────────────────────────────────────────────────

/// Document information dictionary fields worth logging.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PdfMetadata {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
}

pub async fn metadata(path: &Path) -> Result<PdfMetadata, DocPrepError> {
    let path = path.to_path_buf();
    blocking("Metadata", move || metadata_blocking(&path)).await
}

fn metadata_blocking(path: &Path) -> Result<PdfMetadata, DocPrepError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, path)?;
    let metadata = document.metadata();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(PdfMetadata {
        page_count: document.pages().len() as usize,
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
    })
}
