//! PDF → Markdown conversion.
//!
//! Output lands next to the PDF:
//!
//! ```text
//! book.pdf
//! book.md                    converted document
//! images/book.pdf-0-1.png    embedded images, <pdf name>-<page0>-<n>.png
//! image-cache_book.json      caption cache used by the describer
//! ```
//!
//! The text engine reads pdfium's text layer and needs no API key. The vision
//! engine renders every page and has the vision model transcribe it. Both
//! append each page's embedded images after its text as empty-alt links for
//! [`crate::describe::ImageDescriber`] to caption.

use crate::config::{ConvertEngine, ConvertOptions, DescribeConfig};
use crate::error::DocPrepError;
use crate::pipeline::llm::{transcribe_page, PageTranscript};
use crate::pipeline::pdf::{ExtractOptions, ExtractedPage};
use crate::pipeline::{encode, input, pdf, postprocess, rewrite};
use crate::progress::SharedProgress;
use edgequake_llm::LLMProvider;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Separator placed between pages.
pub const PAGE_SEPARATOR: &str = "\n\n-----\n\n";

/// Where a conversion writes its files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLayout {
    pub folder: PathBuf,
    pub markdown: PathBuf,
    pub images: PathBuf,
    pub cache: PathBuf,
}

impl OutputLayout {
    /// Layout for `pdf_path`: everything next to the PDF.
    pub fn for_pdf(pdf_path: &Path) -> Self {
        let folder = pdf_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let stem = pdf_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into());
        Self {
            markdown: folder.join(format!("{stem}.md")),
            images: folder.join("images"),
            cache: folder.join(format!("image-cache_{stem}.json")),
            folder,
        }
    }
}

/// Result of [`pdf_to_markdown`].
#[derive(Debug, Clone, Serialize)]
pub struct ConvertOutput {
    pub layout: OutputLayout,
    pub total_pages: usize,
    pub image_count: usize,
    /// 1-based pages the vision engine could not transcribe.
    pub failed_pages: Vec<usize>,
    pub markdown_bytes: usize,
    pub markdown_chars: usize,
    pub duration_ms: u64,
}

/// Convert `pdf_path` to Markdown and write it (plus images) next to the PDF.
///
/// `llm` selects the model for the vision engine and is ignored by the text
/// engine.
pub async fn pdf_to_markdown(
    pdf_path: impl AsRef<Path>,
    options: &ConvertOptions,
    llm: &DescribeConfig,
    progress: SharedProgress,
) -> Result<ConvertOutput, DocPrepError> {
    let start = Instant::now();
    let path = input::resolve_pdf(pdf_path)?;
    let layout = OutputLayout::for_pdf(&path);

    let meta = pdf::metadata(&path).await?;
    info!(
        "Converting {} ({} pages{}{})",
        path.display(),
        meta.page_count,
        meta.title.as_deref().map(|t| format!(", \"{t}\"")).unwrap_or_default(),
        meta.author.as_deref().map(|a| format!(" by {a}")).unwrap_or_default(),
    );

    // Resolve the provider before the (slow) extraction so a missing key fails fast.
    let provider = match options.engine {
        ConvertEngine::Vision => Some(crate::provider::resolve_provider(llm)?),
        ConvertEngine::Text => None,
    };

    let image_prefix = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".into());
    let pages = pdf::extract_pages(
        &path,
        ExtractOptions {
            image_dir: layout.images.clone(),
            image_prefix,
            raster_max_pixels: provider.as_ref().map(|_| options.max_rendered_pixels),
        },
    )
    .await?;
    let image_count = pages.iter().map(|p| p.images.len()).sum();
    info!("Extracted {} pages, {} images", pages.len(), image_count);

    let (bodies, failed_pages) = match provider {
        Some(provider) => transcribe_pages(&provider, &pages, options, llm.max_tokens, progress).await?,
        None => (pages.iter().map(|p| p.text.trim().to_string()).collect(), Vec::new()),
    };

    let markdown = assemble_document(&pages, &bodies);
    let markdown = rewrite::relativize_image_paths(&markdown, &layout.folder);
    let markdown = postprocess::clean_markdown(&markdown);
    input::write_atomic(&layout.markdown, &markdown)?;

    let output = ConvertOutput {
        total_pages: pages.len(),
        image_count,
        failed_pages,
        markdown_bytes: markdown.len(),
        markdown_chars: markdown.chars().count(),
        duration_ms: start.elapsed().as_millis() as u64,
        layout,
    };
    info!(
        "Markdown written: {} ({:.2} KB, {} chars)",
        output.layout.markdown.display(),
        output.markdown_bytes as f64 / 1024.0,
        output.markdown_chars
    );
    Ok(output)
}

/// Join page bodies with [`PAGE_SEPARATOR`], each followed by its images.
fn assemble_document(pages: &[ExtractedPage], bodies: &[String]) -> String {
    pages
        .iter()
        .zip(bodies)
        .map(|(page, body)| {
            let mut parts: Vec<String> = Vec::new();
            if !body.is_empty() {
                parts.push(body.clone());
            }
            parts.extend(
                page.images
                    .iter()
                    .map(|img| format!("![]({})", img.to_string_lossy())),
            );
            parts.join("\n\n")
        })
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

async fn transcribe_pages(
    provider: &Arc<dyn LLMProvider>,
    pages: &[ExtractedPage],
    options: &ConvertOptions,
    max_tokens: usize,
    progress: SharedProgress,
) -> Result<(Vec<String>, Vec<usize>), DocPrepError> {
    let mut encoded = Vec::with_capacity(pages.len());
    for page in pages {
        let Some(raster) = &page.raster else { continue };
        match encode::encode_page(raster) {
            Ok(data) => encoded.push((page.index, data)),
            Err(e) => warn!("Failed to encode page {}: {}", page.index + 1, e),
        }
    }

    let total = encoded.len();
    progress.on_start(total);
    let done = std::sync::atomic::AtomicUsize::new(0);
    let results: Vec<PageTranscript> = stream::iter(encoded.into_iter().map(|(index, data)| {
        let provider = Arc::clone(provider);
        let progress = Arc::clone(&progress);
        let done = &done;
        async move {
            let result = transcribe_page(
                &provider,
                index,
                data,
                options.temperature,
                max_tokens,
                options.page_retries,
                options.retry_backoff_ms,
            )
            .await;
            let n = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            let label = format!("page {}", index + 1);
            match &result.error {
                None => progress.on_item_complete(n, total, &label),
                Some(e) => progress.on_item_error(n, total, &label, &e.to_string()),
            }
            result
        }
    }))
    .buffer_unordered(options.page_concurrency.max(1))
    .collect()
    .await;

    let mut bodies = vec![String::new(); pages.len()];
    let mut failed = Vec::new();
    let mut first_error = None;
    for r in &results {
        match &r.error {
            None => {
                debug!("Page {} transcribed in {}ms", r.index + 1, r.duration_ms);
                if let Some(slot) = bodies.get_mut(r.index) {
                    *slot = postprocess::clean_page(&r.markdown);
                }
            }
            Some(e) => {
                warn!("Page {} failed: {}", r.index + 1, e);
                failed.push(r.index + 1);
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    failed.sort_unstable();
    progress.on_finish(total, total - failed.len());

    if total > 0 && failed.len() == total {
        return Err(DocPrepError::AllPagesFailed {
            total,
            first_error: first_error.unwrap_or_else(|| "Unknown error".into()),
        });
    }
    Ok((bodies, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: usize, images: &[&str]) -> ExtractedPage {
        ExtractedPage {
            index,
            text: String::new(),
            images: images.iter().map(PathBuf::from).collect(),
            raster: None,
        }
    }

    #[test]
    fn layout_sits_next_to_pdf() {
        let l = OutputLayout::for_pdf(Path::new("/a/b/book.pdf"));
        assert_eq!(l.markdown, PathBuf::from("/a/b/book.md"));
        assert_eq!(l.images, PathBuf::from("/a/b/images"));
        assert_eq!(l.cache, PathBuf::from("/a/b/image-cache_book.json"));
    }

    #[test]
    fn pages_joined_with_images_after_text() {
        let pages = vec![page(0, &["/a/b/images/book.pdf-0-1.png"]), page(1, &[])];
        let bodies = vec!["Page one".to_string(), "Page two".to_string()];
        let md = assemble_document(&pages, &bodies);
        assert_eq!(
            md,
            "Page one\n\n![](/a/b/images/book.pdf-0-1.png)\n\n-----\n\nPage two"
        );
        let md = rewrite::relativize_image_paths(&md, Path::new("/a/b"));
        assert!(md.contains("![](images/book.pdf-0-1.png)"));
    }

    #[test]
    fn empty_page_body_only_lists_images() {
        let pages = vec![page(0, &["x.png", "y.png"])];
        let md = assemble_document(&pages, &[String::new()]);
        assert_eq!(md, "![](x.png)\n\n![](y.png)");
    }
}
