//! Wiki-style image links → standard Markdown, then captions.
//!
//! Two stages, both rewriting the note in place:
//!
//! 1. [`convert_wiki_links`] turns `![[diagram.png]]` into
//!    `![](assets/diagram.png)` using an index of every image in the vault.
//! 2. [`describe_empty_alt`] captions each `![](path)` that still has no alt
//!    text. Captions are written one at a time under a file lock, so an
//!    interrupted run keeps everything captioned so far.

use crate::config::DescribeConfig;
use crate::error::{DocPrepError, ItemError};
use crate::pipeline::llm::Captioner;
use crate::pipeline::scan::{self, context_around, find_empty_alt, find_wiki_links};
use crate::pipeline::{input, rewrite};
use crate::progress::{self, SharedProgress};
use crate::prompts::{load_caption_template, render_caption_prompt, CaptionContext};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Environment variable naming the default vault root.
pub const VAULT_ENV_VAR: &str = "WIKI2MD_VAULT";

/// Number of links shown per list in a dry-run preview.
const PREVIEW_LIMIT: usize = 5;

/// Image file name → path, for every image under the vault.
pub type ImageIndex = HashMap<String, PathBuf>;

/// Vault root: `explicit`, else `$WIKI2MD_VAULT`, else the note's directory.
pub fn default_vault(explicit: Option<&Path>, markdown_path: &Path) -> PathBuf {
    if let Some(v) = explicit {
        return v.to_path_buf();
    }
    match std::env::var(VAULT_ENV_VAR) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => markdown_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
    }
}

/// Walk `vault_root` and index every image by file name.
///
/// When two images share a name the last one walked wins.
pub fn build_image_index(vault_root: &Path) -> ImageIndex {
    let mut index = ImageIndex::new();
    for entry in WalkDir::new(vault_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !scan::is_image_path(entry.path()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(prev) = index.insert(name.clone(), entry.path().to_path_buf()) {
            debug!("Duplicate image name {}: {} shadowed", name, prev.display());
        }
    }
    info!("Indexed {} images under {}", index.len(), vault_root.display());
    index
}

/// Path to write for the wiki target `target`.
///
/// Targets that already contain a directory separator are kept verbatim.
/// Bare names are looked up in `index` and made relative to `vault_root`.
pub fn resolve_link(target: &str, index: &ImageIndex, vault_root: &Path) -> Option<String> {
    if target.contains('/') || target.contains('\\') {
        return Some(target.to_string());
    }
    let Some(found) = index.get(target) else {
        warn!("File not found in vault: {}", target);
        return None;
    };
    let rel = found.strip_prefix(vault_root).unwrap_or(found);
    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Outcome of [`convert_wiki_links`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkConversion {
    pub converted: usize,
    pub unresolved: Vec<String>,
}

/// Rewrite every resolvable `![[name]]` in `content` to `![](path)`.
///
/// Unresolved links are left untouched and listed in document order.
pub fn rewrite_wiki_links(content: &str, index: &ImageIndex, vault_root: &Path) -> (String, LinkConversion) {
    let mut result = LinkConversion::default();
    let mut out = content.to_string();
    for link in find_wiki_links(content).iter().rev() {
        match resolve_link(&link.target, index, vault_root) {
            Some(path) => {
                out.replace_range(link.start..link.end, &format!("![]({path})"));
                result.converted += 1;
            }
            None => result.unresolved.push(link.target.clone()),
        }
    }
    result.unresolved.reverse();
    (out, result)
}

/// Replace every resolvable `![[name]]` in `markdown_path` with `![](path)`.
///
/// The file is written only when at least one link changed.
pub async fn convert_wiki_links(
    markdown_path: &Path,
    index: &ImageIndex,
    vault_root: &Path,
) -> Result<LinkConversion, DocPrepError> {
    let content = input::read_text(markdown_path).await?;
    let (out, result) = rewrite_wiki_links(&content, index, vault_root);
    if result.converted > 0 {
        input::write_atomic(markdown_path, &out)?;
    }
    info!(
        "Converted {} wiki links ({} unresolved)",
        result.converted,
        result.unresolved.len()
    );
    Ok(result)
}

/// Counters from [`describe_empty_alt`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptionStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `(image path, reason)` for every skipped or failed image.
    pub problems: Vec<(String, String)>,
}

enum Step {
    Success,
    Skip(ItemError),
    Fail(ItemError),
}

/// Caption every empty-alt image in `markdown_path`.
///
/// At most `config.concurrency` captions are in flight. Each task re-reads the
/// file under the lock before building its context and again before writing,
/// so captions from other tasks are never lost.
pub async fn describe_empty_alt(
    markdown_path: &Path,
    vault_root: &Path,
    config: &DescribeConfig,
    captioner: Arc<dyn Captioner>,
    progress: SharedProgress,
) -> Result<CaptionStats, DocPrepError> {
    let content = input::read_text(markdown_path).await?;
    let targets: Vec<String> = find_empty_alt(&content).into_iter().map(|l| l.target).collect();
    let mut stats = CaptionStats {
        total: targets.len(),
        ..Default::default()
    };
    if targets.is_empty() {
        info!("No empty-alt images in {}", markdown_path.display());
        return Ok(stats);
    }

    let template = load_caption_template(config.prompt_file.as_deref())?;
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let file_lock = Arc::new(Mutex::new(()));
    let done = Arc::new(AtomicUsize::new(0));
    let total = targets.len();
    progress.on_start(total);

    let mut handles = Vec::with_capacity(total);
    for target in targets {
        let semaphore = Arc::clone(&semaphore);
        let file_lock = Arc::clone(&file_lock);
        let done = Arc::clone(&done);
        let captioner = Arc::clone(&captioner);
        let progress = Arc::clone(&progress);
        let template = template.clone();
        let path = markdown_path.to_path_buf();
        let vault = vault_root.to_path_buf();
        let context_chars = config.context_chars;

        handles.push(tokio::spawn(async move {
            let step = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    caption_one(&path, &vault, &target, &template, context_chars, &*captioner, &file_lock)
                        .await
                }
                Err(_) => Step::Fail(ItemError::LlmFailed {
                    attempts: 0,
                    detail: "worker pool closed".into(),
                }),
            };
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            match &step {
                Step::Success => progress.on_item_complete(n, total, &target),
                Step::Skip(e) | Step::Fail(e) => progress.on_item_error(n, total, &target, &e.to_string()),
            }
            (target, step)
        }));
    }

    for handle in handles {
        let (target, step) = handle
            .await
            .map_err(|e| DocPrepError::Internal(format!("caption task panicked: {e}")))?;
        match step {
            Step::Success => stats.success += 1,
            Step::Skip(e) => {
                stats.skipped += 1;
                stats.problems.push((target, e.to_string()));
            }
            Step::Fail(e) => {
                stats.failed += 1;
                stats.problems.push((target, e.to_string()));
            }
        }
    }
    progress.on_finish(total, stats.success);
    info!(
        "Captions: {} total, {} success, {} failed, {} skipped",
        stats.total, stats.success, stats.failed, stats.skipped
    );
    Ok(stats)
}

async fn caption_one(
    markdown_path: &Path,
    vault_root: &Path,
    target: &str,
    template: &str,
    context_chars: usize,
    captioner: &dyn Captioner,
    file_lock: &Mutex<()>,
) -> Step {
    let image_file = if Path::new(target).is_absolute() {
        PathBuf::from(target)
    } else {
        vault_root.join(target)
    };
    if !image_file.is_file() {
        warn!("Image not found: {}", image_file.display());
        return Step::Skip(ItemError::MissingImage {
            path: target.to_string(),
        });
    }

    let needle = format!("![]({target})");
    let (before, after) = {
        let _guard = file_lock.lock().await;
        let content = match input::read_text(markdown_path).await {
            Ok(c) => c,
            Err(e) => {
                return Step::Fail(ItemError::Unreadable {
                    path: markdown_path.display().to_string(),
                    detail: e.to_string(),
                })
            }
        };
        let Some(pos) = content.find(&needle) else {
            return Step::Skip(ItemError::NotInDocument {
                path: target.to_string(),
            });
        };
        context_around(&content, pos, pos + needle.len(), context_chars)
    };

    let prompt = render_caption_prompt(
        template,
        &CaptionContext {
            context_before: &before,
            context_after: &after,
            image_path: &image_file.to_string_lossy(),
            alt_text: "",
        },
    );
    let caption = match captioner.caption(&prompt, &image_file).await {
        Ok(c) if !c.trim().is_empty() => c,
        Ok(_) => return Step::Fail(ItemError::EmptyDescription),
        Err(e) => return Step::Fail(e),
    };

    let _guard = file_lock.lock().await;
    let content = match input::read_text(markdown_path).await {
        Ok(c) => c,
        Err(e) => {
            return Step::Fail(ItemError::Unreadable {
                path: markdown_path.display().to_string(),
                detail: e.to_string(),
            })
        }
    };
    let Some(updated) = rewrite::replace_first_empty_alt(&content, target, &caption) else {
        return Step::Skip(ItemError::NotInDocument {
            path: target.to_string(),
        });
    };
    match input::write_atomic(markdown_path, &updated) {
        Ok(()) => {
            debug!("Captioned {}", target);
            Step::Success
        }
        Err(e) => Step::Fail(ItemError::Unreadable {
            path: markdown_path.display().to_string(),
            detail: e.to_string(),
        }),
    }
}

/// One wiki link as a real run would rewrite it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkPreview {
    pub target: String,
    /// `None` when the image is not in the vault.
    pub resolved: Option<String>,
}

/// What a real run would touch, without writing anything.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    pub wiki_links: Vec<LinkPreview>,
    /// Images that would be captioned after stage 1. `None` when captioning
    /// is disabled.
    pub empty_alt: Option<Vec<String>>,
}

impl DryRunReport {
    pub fn scan(content: &str, index: &ImageIndex, vault_root: &Path, describe: bool) -> Self {
        let wiki_links = find_wiki_links(content)
            .into_iter()
            .map(|l| LinkPreview {
                resolved: resolve_link(&l.target, index, vault_root),
                target: l.target,
            })
            .collect();
        let empty_alt = describe.then(|| {
            let (converted, _) = rewrite_wiki_links(content, index, vault_root);
            find_empty_alt(&converted).into_iter().map(|l| l.target).collect()
        });
        Self { wiki_links, empty_alt }
    }

    /// Human-readable preview: counts plus the first few entries of each list.
    pub fn render(&self) -> String {
        let mut out = String::new();
        preview_list(&mut out, "Wiki links", &self.wiki_links, |l| match &l.resolved {
            Some(path) => format!("![[{}]] -> ![]({path})", l.target),
            None => format!("![[{}]] -> file not found in vault", l.target),
        });
        if let Some(empty_alt) = &self.empty_alt {
            preview_list(&mut out, "Images to caption", empty_alt, |t| format!("![]({t})"));
        }
        out
    }
}

fn preview_list<T>(out: &mut String, heading: &str, items: &[T], fmt: impl Fn(&T) -> String) {
    out.push_str(&format!("{heading}: {}\n", items.len()));
    for item in items.iter().take(PREVIEW_LIMIT) {
        out.push_str(&format!("  {}\n", fmt(item)));
    }
    if items.len() > PREVIEW_LIMIT {
        out.push_str(&format!("  ... and {} more\n", items.len() - PREVIEW_LIMIT));
    }
}

/// Options for [`process_note`].
pub struct WikiRun {
    pub config: DescribeConfig,
    pub vault: PathBuf,
    pub describe: bool,
    pub captioner: Option<Arc<dyn Captioner>>,
    pub progress: SharedProgress,
}

impl WikiRun {
    pub fn new(config: DescribeConfig, vault: impl Into<PathBuf>) -> Self {
        Self {
            config,
            vault: vault.into(),
            describe: true,
            captioner: None,
            progress: progress::noop(),
        }
    }
}

/// Combined result of both stages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WikiReport {
    pub links: LinkConversion,
    pub captions: Option<CaptionStats>,
}

/// Run both stages on one note.
///
/// The provider is only resolved when stage 2 runs and has work to do.
pub async fn process_note(markdown_path: impl AsRef<Path>, run: &WikiRun) -> Result<WikiReport, DocPrepError> {
    let path = input::resolve_file(markdown_path)?;
    let index = build_image_index(&run.vault);
    let links = convert_wiki_links(&path, &index, &run.vault).await?;
    if !run.describe {
        return Ok(WikiReport { links, captions: None });
    }

    let content = input::read_text(&path).await?;
    if find_empty_alt(&content).is_empty() {
        return Ok(WikiReport {
            links,
            captions: Some(CaptionStats::default()),
        });
    }
    let captioner = match &run.captioner {
        Some(c) => Arc::clone(c),
        None => crate::provider::resolve_captioner(&run.config)?,
    };
    let captions =
        describe_empty_alt(&path, &run.vault, &run.config, captioner, Arc::clone(&run.progress)).await?;
    Ok(WikiReport {
        links,
        captions: Some(captions),
    })
}
