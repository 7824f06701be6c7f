//! Batch captioning of every image in a Markdown file.
//!
//! [`ImageDescriber::run`] scans the document once, captions all images with
//! bounded concurrency, then rewrites the file in one go after saving a
//! backup of the original. Captions are cached by image path plus context, so
//! re-running on an unchanged document makes no API calls.

use crate::config::DescribeConfig;
use crate::error::{DocPrepError, ItemError};
use crate::pipeline::cache::{cache_key, CaptionCache};
use crate::pipeline::llm::Captioner;
use crate::pipeline::scan::{find_images, ImageRef};
use crate::pipeline::{input, rewrite};
use crate::progress::{self, SharedProgress};
use crate::prompts::{load_caption_template, render_caption_prompt, CaptionContext};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Cached(String),
    Described(String),
    Skipped(ItemError),
    Failed(ItemError),
}

impl ImageOutcome {
    fn caption(&self) -> Option<&str> {
        match self {
            ImageOutcome::Cached(c) | ImageOutcome::Described(c) => Some(c),
            _ => None,
        }
    }
}

/// Summary of a describer run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DescribeReport {
    pub total: usize,
    pub cached: usize,
    pub described: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Backup of the original document, when one was written.
    pub backup_path: Option<PathBuf>,
    /// `(image path, reason)` for every skipped or failed image.
    pub problems: Vec<(String, String)>,
}

/// Backup location for a document: `.backup` appended to the full file name,
/// so `book.md` → `book.md.backup` and `notes.markdown` → `notes.markdown.backup`.
pub fn backup_path_for(markdown_path: &Path) -> PathBuf {
    let mut name = markdown_path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    markdown_path.with_file_name(name)
}

/// Captions every image in a Markdown file.
pub struct ImageDescriber {
    config: DescribeConfig,
    captioner: Option<Arc<dyn Captioner>>,
    progress: SharedProgress,
}

impl ImageDescriber {
    pub fn new(config: DescribeConfig) -> Self {
        Self {
            config,
            captioner: None,
            progress: progress::noop(),
        }
    }

    /// Use `captioner` instead of resolving a provider from the config.
    pub fn with_captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Caption every image in `markdown_path` and rewrite the file.
    ///
    /// Image paths are resolved against the document's directory. Only
    /// captioned images change; skipped and failed ones keep their original
    /// text. The provider is only resolved when at least one image actually
    /// needs an API call.
    pub async fn run(&self, markdown_path: impl AsRef<Path>) -> Result<DescribeReport, DocPrepError> {
        let path = input::resolve_file(markdown_path)?;
        let content = input::read_text(&path).await?;
        let images = find_images(&content, self.config.context_chars);

        let mut report = DescribeReport {
            total: images.len(),
            ..Default::default()
        };
        info!("{}: {} images found", path.display(), images.len());
        if images.is_empty() {
            return Ok(report);
        }

        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let cache = self.config.cache_path.as_ref().map(CaptionCache::load);

        // Cache hits and missing files resolve without any API call.
        let mut outcomes: Vec<Option<ImageOutcome>> = images
            .iter()
            .map(|image| {
                let key = cache_key(&image.image_path, &image.context_before, &image.context_after);
                if let Some(hit) = cache.as_ref().and_then(|c| c.get(&key)) {
                    return Some(ImageOutcome::Cached(hit.to_string()));
                }
                if !base_dir.join(&image.image_path).is_file() {
                    return Some(ImageOutcome::Skipped(ItemError::MissingImage {
                        path: image.image_path.clone(),
                    }));
                }
                None
            })
            .collect();

        let pending: Vec<usize> = (0..images.len()).filter(|&i| outcomes[i].is_none()).collect();
        if !pending.is_empty() {
            let captioner = match &self.captioner {
                Some(c) => Arc::clone(c),
                None => crate::provider::resolve_captioner(&self.config)?,
            };
            let template = load_caption_template(self.config.prompt_file.as_deref())?;
            let model = captioner.model_name().to_string();
            let described = self
                .describe_pending(&images, &pending, &base_dir, &template, captioner)
                .await;
            if let Some(cache) = cache {
                store_captions(cache, &images, &described, &model).await;
            }
            for (i, outcome) in described {
                outcomes[i] = Some(outcome);
            }
        }

        let mut captions: Vec<(&ImageRef, String)> = Vec::new();
        for (image, outcome) in images.iter().zip(&outcomes) {
            let Some(outcome) = outcome else { continue };
            match outcome {
                ImageOutcome::Cached(_) => report.cached += 1,
                ImageOutcome::Described(_) => report.described += 1,
                ImageOutcome::Skipped(e) => {
                    report.skipped += 1;
                    warn!("Skipped {}: {}", image.image_path, e);
                    report.problems.push((image.image_path.clone(), e.to_string()));
                }
                ImageOutcome::Failed(e) => {
                    report.failed += 1;
                    warn!("Failed {}: {}", image.image_path, e);
                    report.problems.push((image.image_path.clone(), e.to_string()));
                }
            }
            if let Some(c) = outcome.caption() {
                captions.push((image, c.to_string()));
            }
        }

        if !captions.is_empty() {
            if self.config.backup {
                let backup = backup_path_for(&path);
                input::write_atomic(&backup, &content)?;
                info!("Backup: {}", backup.display());
                report.backup_path = Some(backup);
            }
            let updated = rewrite::apply_captions(&content, &captions);
            input::write_atomic(&path, &updated)?;
            info!("Updated: {}", path.display());
        }

        info!(
            "Images: {} total, {} cached, {} described, {} failed, {} skipped",
            report.total, report.cached, report.described, report.failed, report.skipped
        );
        Ok(report)
    }

    async fn describe_pending(
        &self,
        images: &[ImageRef],
        pending: &[usize],
        base_dir: &Path,
        template: &str,
        captioner: Arc<dyn Captioner>,
    ) -> Vec<(usize, ImageOutcome)> {
        let total = pending.len();
        let done = AtomicUsize::new(0);
        let progress = &self.progress;
        progress.on_start(total);

        let results: Vec<(usize, ImageOutcome)> = stream::iter(pending.iter().copied())
            .map(|i| {
                let image = &images[i];
                let captioner = Arc::clone(&captioner);
                let done = &done;
                async move {
                    let image_file = base_dir.join(&image.image_path);
                    let prompt = render_caption_prompt(
                        template,
                        &CaptionContext {
                            context_before: &image.context_before,
                            context_after: &image.context_after,
                            image_path: &image_file.to_string_lossy(),
                            alt_text: &image.alt_text,
                        },
                    );
                    let outcome = match captioner.caption(&prompt, &image_file).await {
                        Ok(text) => ImageOutcome::Described(rewrite::normalize_caption(&text)),
                        Err(e) => ImageOutcome::Failed(e),
                    };

                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    match &outcome {
                        ImageOutcome::Failed(e) => {
                            progress.on_item_error(n, total, &image.image_path, &e.to_string())
                        }
                        _ => progress.on_item_complete(n, total, &image.image_path),
                    }
                    if n % 10 == 0 || n == total {
                        info!("Progress: {}/{} ({}%)", n, total, n * 100 / total);
                    }
                    (i, outcome)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let ok = results
            .iter()
            .filter(|(_, o)| matches!(o, ImageOutcome::Described(_)))
            .count();
        progress.on_finish(total, ok);
        results
    }
}

/// Add every fresh caption to the cache and write the file once, on the
/// blocking pool.
async fn store_captions(mut cache: CaptionCache, images: &[ImageRef], described: &[(usize, ImageOutcome)], model: &str) {
    let mut added = 0;
    for (i, outcome) in described {
        if let ImageOutcome::Described(text) = outcome {
            let image = &images[*i];
            cache.insert(
                cache_key(&image.image_path, &image.context_before, &image.context_after),
                text.clone(),
                model,
            );
            added += 1;
        }
    }
    if added == 0 {
        return;
    }
    debug!("Caching {} new captions in {}", added, cache.path().display());
    if let Err(e) = tokio::task::spawn_blocking(move || cache.save()).await {
        warn!("Cache save task failed: {}", e);
    }
}
