//! Per-slide generation with retries, key rotation and batching.

use super::gemini::{ApiError, ImageApi, ImageRequest, ImageResponse, ReferenceImage};
use super::{FailedSlide, FailureReport, Slide, SlideDeck};
use crate::config::SlideConfig;
use crate::error::{truncate_message, DocPrepError, ItemError};
use crate::pipeline::encode::mime_for_path;
use crate::progress::{self, SharedProgress};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// API keys shared by every slide task.
///
/// Each task keeps its own key index. The shared index only decides which
/// key a newly started task begins with.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<String>,
    current: AtomicUsize,
}

impl KeyRing {
    /// `keys` must not be empty.
    pub fn new(keys: Vec<String>) -> Result<Self, DocPrepError> {
        if keys.is_empty() {
            return Err(DocPrepError::NoApiKeys);
        }
        info!("Loaded {} API key(s) for rotation", keys.len());
        Ok(Self {
            keys,
            current: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index a new task should start from.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn key(&self, index: usize) -> &str {
        &self.keys[index % self.keys.len()]
    }

    /// Next index after `from`, or `None` when the rotation wrapped back to
    /// key 0, meaning every key has been tried.
    pub fn rotate(&self, from: usize) -> Option<usize> {
        let next = (from + 1) % self.keys.len();
        if next == 0 && from != 0 {
            return None;
        }
        self.current.store(next, Ordering::SeqCst);
        info!("Switched to API key {}/{}", next + 1, self.keys.len());
        Some(next)
    }

    /// Start a new cycle from key 0.
    pub fn reset(&self) -> usize {
        self.current.store(0, Ordering::SeqCst);
        info!("Starting a new key cycle from key 1/{}", self.keys.len());
        0
    }
}

/// Generate one image, retrying per the limits in `config`.
///
/// `key_index` is the task's current key and is updated on rotation.
pub async fn generate_slide_image(
    api: &dyn ImageApi,
    keys: &KeyRing,
    request: &ImageRequest,
    config: &SlideConfig,
    key_index: &mut usize,
) -> Result<Vec<u8>, ItemError> {
    let mut empty_responses = 0;

    for attempt in 1..=config.max_retries {
        debug!(
            "Attempt {}/{} with {} reference(s)",
            attempt,
            config.max_retries,
            request.references.len()
        );
        match api.generate(keys.key(*key_index), request).await {
            Ok(ImageResponse::Parts { image: Some(bytes) }) => return Ok(bytes),
            Ok(ImageResponse::Parts { image: None }) => return Err(ItemError::NoImage),
            Ok(ImageResponse::Empty { feedback }) => {
                empty_responses += 1;
                if empty_responses >= config.empty_response_retries {
                    return Err(ItemError::EmptyResponse(feedback.unwrap_or_else(|| {
                        "Unknown - API returned empty response".into()
                    })));
                }
                warn!(
                    "Empty response ({}/{}){}",
                    empty_responses,
                    config.empty_response_retries,
                    feedback.map(|f| format!(": {f}")).unwrap_or_default()
                );
                sleep(config.empty_response_delay).await;
            }
            Err(e) => {
                if let Some(outcome) = handle_error(&e, keys, config, key_index, attempt).await {
                    return Err(outcome);
                }
            }
        }
    }
    Err(ItemError::RetriesExhausted)
}

/// `Some(error)` ends the slide; `None` means try again.
async fn handle_error(
    e: &ApiError,
    keys: &KeyRing,
    config: &SlideConfig,
    key_index: &mut usize,
    attempt: u32,
) -> Option<ItemError> {
    let msg = truncate_message(&e.to_string(), 200);
    if e.is_safety() {
        warn!("Blocked by safety filter: {}", msg);
        return Some(ItemError::SafetyFilter(msg));
    }
    if e.is_quota() {
        if keys.len() > 1 {
            match keys.rotate(*key_index) {
                Some(next) => *key_index = next,
                None => {
                    warn!("All keys rate limited, waiting {:?}", config.retry_delay);
                    sleep(config.retry_delay).await;
                    *key_index = keys.reset();
                }
            }
        } else {
            warn!("Rate limited, waiting {:?}", config.retry_delay);
            sleep(config.retry_delay).await;
        }
        return None;
    }
    if attempt >= config.max_retries {
        return Some(ItemError::MaxRetriesExceeded(msg));
    }
    warn!("{} (retrying in {:?})", msg, config.retry_delay);
    sleep(config.retry_delay).await;
    None
}

/// Result for one slide.
#[derive(Debug, Clone)]
pub struct SlideOutcome {
    pub page: u32,
    pub title: String,
    pub result: Result<PathBuf, ItemError>,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct SlideRun {
    pub output_dir: PathBuf,
    pub success_count: usize,
    pub failure_count: usize,
    /// Sorted.
    pub failed_pages: Vec<u32>,
    /// Sorted by page.
    pub failures: Vec<FailedSlide>,
    pub elapsed: Duration,
}

impl SlideRun {
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn failure_report(&self, source_json: &Path) -> FailureReport {
        FailureReport {
            source_json: source_json.display().to_string(),
            output_dir: self.output_dir.display().to_string(),
            total_processed: self.total(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            failed_slides: self.failures.clone(),
        }
    }
}

/// Runs a deck through an [`ImageApi`].
pub struct SlideGenerator {
    api: Arc<dyn ImageApi>,
    keys: Arc<KeyRing>,
    config: SlideConfig,
    progress: SharedProgress,
}

impl SlideGenerator {
    pub fn new(api: Arc<dyn ImageApi>, keys: KeyRing, config: SlideConfig) -> Self {
        Self {
            api,
            keys: Arc::new(keys),
            config,
            progress: progress::noop(),
        }
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Generate every selected slide of `deck`, loaded from `json_path`.
    ///
    /// Images go to `config.output_dir`, else `<json dir>/<json stem>_images`.
    /// Relative reference image paths are resolved against the JSON's
    /// directory.
    pub async fn run(
        &self,
        deck: &SlideDeck,
        json_path: &Path,
        targets: Option<&BTreeSet<u32>>,
    ) -> Result<SlideRun, DocPrepError> {
        let output_dir = super::output_dir(json_path, self.config.output_dir.as_deref());
        let output_dir = output_dir.as_path();
        let base_dir = json_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(output_dir).map_err(|source| DocPrepError::OutputWriteFailed {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let selected = deck.select(targets);
        if targets.is_some() {
            info!(
                "Selected {} of {} slides",
                selected.len(),
                deck.slides.len()
            );
        }
        let global_refs: Vec<PathBuf> = deck.reference_images.iter().map(|p| base_dir.join(p)).collect();
        let total = selected.len();
        let batch_size = self.config.batch_size.max(1);
        let batches = total.div_ceil(batch_size);
        info!(
            "Generating {} slides in {} batch(es) of {} with {} ({} workers)",
            total, batches, batch_size, self.config.model, self.config.max_workers
        );

        let start = Instant::now();
        let done = AtomicUsize::new(0);
        self.progress.on_start(total);
        let mut outcomes = Vec::with_capacity(total);

        for (b, batch) in selected.chunks(batch_size).enumerate() {
            let batch_start = Instant::now();
            info!("Batch {}/{}: {} slides", b + 1, batches, batch.len());
            let results: Vec<SlideOutcome> = stream::iter(batch.iter())
                .map(|(page, slide)| {
                    let global_refs = &global_refs;
                    let done = &done;
                    async move {
                        let outcome = self
                            .process_slide(*page, slide, base_dir, global_refs, output_dir)
                            .await;
                        let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                        match &outcome.result {
                            Ok(path) => {
                                info!("[Slide {:02}] Saved {}", outcome.page, path.display());
                                self.progress.on_item_complete(n, total, &outcome.title)
                            }
                            Err(e) => {
                                warn!("[Slide {:02}] Failed: {}", outcome.page, e);
                                self.progress.on_item_error(n, total, &outcome.title, &e.to_string())
                            }
                        }
                        outcome
                    }
                })
                .buffer_unordered(self.config.max_workers.max(1))
                .collect()
                .await;
            outcomes.extend(results);

            info!(
                "Batch {} finished in {:.1}s",
                b + 1,
                batch_start.elapsed().as_secs_f64()
            );
            if b + 1 < batches {
                info!("Pausing {:?} before the next batch", self.config.batch_delay);
                sleep(self.config.batch_delay).await;
            }
        }

        let run = summarize(outcomes, output_dir, start.elapsed());
        self.progress.on_finish(total, run.success_count);
        Ok(run)
    }

    async fn process_slide(
        &self,
        page: u32,
        slide: &Slide,
        base_dir: &Path,
        global_refs: &[PathBuf],
        output_dir: &Path,
    ) -> SlideOutcome {
        let title = slide.title_or_default(page);
        let Some(prompt) = slide.prompt() else {
            return SlideOutcome {
                page,
                title,
                result: Err(ItemError::NoPrompt),
            };
        };

        let ref_paths = slide
            .reference_images
            .iter()
            .map(|p| base_dir.join(p))
            .chain(global_refs.iter().cloned());
        let request = ImageRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            references: load_references(ref_paths).await,
            aspect_ratio: self.config.aspect_ratio.clone(),
            image_size: self.config.image_size.clone(),
        };

        let mut key_index = self.keys.current();
        let result = match generate_slide_image(&*self.api, &self.keys, &request, &self.config, &mut key_index).await {
            Ok(bytes) => save_png(bytes, output_dir.join(slide_file_name(page))).await,
            Err(e) => Err(e),
        };
        SlideOutcome { page, title, result }
    }
}

/// `slide_{page:03}.png`
pub fn slide_file_name(page: u32) -> String {
    format!("slide_{page:03}.png")
}

async fn load_references(paths: impl Iterator<Item = PathBuf>) -> Vec<ReferenceImage> {
    let mut out = Vec::new();
    for path in paths {
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!("Reference image: {}", path.display());
                out.push(ReferenceImage {
                    mime_type: mime_for_path(&path).to_string(),
                    data,
                });
            }
            Err(e) => warn!("Failed to load reference image {}: {}", path.display(), e),
        }
    }
    out
}

/// Decode whatever format the API returned and store it as PNG.
async fn save_png(bytes: Vec<u8>, dest: PathBuf) -> Result<PathBuf, ItemError> {
    tokio::task::spawn_blocking(move || {
        let img = image::load_from_memory(&bytes).map_err(|e| ItemError::SaveFailed(e.to_string()))?;
        img.save_with_format(&dest, image::ImageFormat::Png)
            .map_err(|e| ItemError::SaveFailed(e.to_string()))?;
        Ok(dest)
    })
    .await
    .map_err(|e| ItemError::SaveFailed(e.to_string()))?
}

fn summarize(outcomes: Vec<SlideOutcome>, output_dir: &Path, elapsed: Duration) -> SlideRun {
    let mut run = SlideRun {
        output_dir: output_dir.to_path_buf(),
        success_count: 0,
        failure_count: 0,
        failed_pages: Vec::new(),
        failures: Vec::new(),
        elapsed,
    };
    for o in outcomes {
        match o.result {
            Ok(_) => run.success_count += 1,
            Err(e) => {
                run.failure_count += 1;
                run.failed_pages.push(o.page);
                run.failures.push(FailedSlide {
                    page: o.page,
                    title: o.title,
                    reason: e.to_string(),
                });
            }
        }
    }
    run.failed_pages.sort_unstable();
    run.failures.sort_by_key(|f| f.page);
    run
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize) -> KeyRing {
        KeyRing::new((0..n).map(|i| format!("k{i}")).collect()).unwrap()
    }

    #[test]
    fn rotation_wraps_to_exhausted() {
        let keys = ring(3);
        assert_eq!(keys.rotate(0), Some(1));
        assert_eq!(keys.current(), 1);
        assert_eq!(keys.rotate(1), Some(2));
        assert_eq!(keys.rotate(2), None);
        assert_eq!(keys.reset(), 0);
        assert_eq!(keys.current(), 0);
    }

    #[test]
    fn empty_key_ring_is_rejected() {
        assert!(matches!(KeyRing::new(vec![]), Err(DocPrepError::NoApiKeys)));
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(slide_file_name(7), "slide_007.png");
        assert_eq!(slide_file_name(123), "slide_123.png");
    }

    #[test]
    fn summary_sorts_failures() {
        let outcomes = vec![
            SlideOutcome {
                page: 9,
                title: "Nine".into(),
                result: Err(ItemError::NoPrompt),
            },
            SlideOutcome {
                page: 2,
                title: "Two".into(),
                result: Err(ItemError::NoImage),
            },
            SlideOutcome {
                page: 1,
                title: "One".into(),
                result: Ok(PathBuf::from("slide_001.png")),
            },
        ];
        let run = summarize(outcomes, Path::new("out"), Duration::from_secs(1));
        assert_eq!(run.success_count, 1);
        assert_eq!(run.failed_pages, vec![2, 9]);
        assert_eq!(run.failures[0].reason, "No image in response parts");
        assert_eq!(run.failure_report(Path::new("deck.json")).total_processed, 3);
    }
}
