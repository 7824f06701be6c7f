//! Split a PDF into one file per outline item.

use crate::error::DocPrepError;
use crate::pipeline::{input, pdf};
use crate::toc::{self, SplitItem};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One written output file.
#[derive(Debug, Clone, Serialize)]
pub struct SplitFile {
    pub path: PathBuf,
    pub title: String,
    /// 1-based inclusive.
    pub start_page: usize,
    pub end_page: usize,
    pub page_count: usize,
}

/// Outcome of [`split_pdf_by_toc`].
#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub pdf_name: String,
    pub total_pages: usize,
    pub level: u32,
    pub output_dir: PathBuf,
    pub files: Vec<SplitFile>,
    /// Titles dropped because their start page went backwards.
    pub out_of_order: Vec<String>,
    /// Titles whose page range was empty after clamping.
    pub empty: Vec<String>,
}

/// Output file name for the `index`-th (0-based) kept item.
pub fn output_file_name(index: usize, title: &str) -> String {
    format!("{}. {}.pdf", index + 1, toc::sanitize_filename(title))
}

/// Output directory: `<pdf dir>/<pdf stem>/`.
pub fn output_dir_for(pdf_path: &Path) -> PathBuf {
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    pdf_path.parent().unwrap_or_else(|| Path::new(".")).join(stem)
}

/// Split `pdf_path` at outline `level` (1 = top level).
pub async fn split_pdf_by_toc(
    pdf_path: impl AsRef<Path>,
    level: u32,
) -> Result<SplitReport, DocPrepError> {
    if level == 0 {
        return Err(DocPrepError::InvalidConfig("level must be ≥ 1".into()));
    }
    let path = input::resolve_pdf(pdf_path)?;
    let outline = pdf::read_outline(&path).await?;
    if outline.toc.is_empty() {
        return Err(DocPrepError::NoToc { path });
    }

    let items = toc::split_items(&outline.toc, level, outline.total_pages);
    if items.is_empty() {
        return Err(DocPrepError::NoSplitItems { level });
    }
    let (items, out_of_order) = toc::sequential(items);
    if !out_of_order.is_empty() {
        warn!(
            "Skipping out-of-order outline items: {}",
            out_of_order.join(", ")
        );
    }

    let output_dir = output_dir_for(&path);
    std::fs::create_dir_all(&output_dir).map_err(|source| DocPrepError::OutputWriteFailed {
        path: output_dir.clone(),
        source,
    })?;

    let plan = plan_jobs(&items, outline.total_pages, &output_dir);
    for title in &plan.empty {
        warn!("Skipping '{}': empty page range", title);
    }

    info!(
        "Splitting {} pages at level {} into {} files",
        outline.total_pages,
        level,
        plan.jobs.len()
    );
    pdf::write_page_ranges(&path, plan.jobs.clone()).await?;

    let files = plan
        .jobs
        .into_iter()
        .zip(plan.titles)
        .map(|(job, title)| {
            info!(
                "Created: {} (pages {}-{}, {} pages)",
                job.dest.display(),
                job.start + 1,
                job.end + 1,
                job.end - job.start + 1
            );
            SplitFile {
                path: job.dest,
                title,
                start_page: job.start + 1,
                end_page: job.end + 1,
                page_count: job.end - job.start + 1,
            }
        })
        .collect();

    Ok(SplitReport {
        pdf_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        total_pages: outline.total_pages,
        level,
        output_dir,
        files,
        out_of_order,
        empty: plan.empty,
    })
}

struct SplitPlan {
    jobs: Vec<pdf::PageRangeJob>,
    titles: Vec<String>,
    empty: Vec<String>,
}

/// Numbering follows the kept items, so an empty item still uses up its number.
fn plan_jobs(items: &[SplitItem], total_pages: usize, output_dir: &Path) -> SplitPlan {
    let mut plan = SplitPlan {
        jobs: Vec::new(),
        titles: Vec::new(),
        empty: Vec::new(),
    };
    for (i, item) in items.iter().enumerate() {
        match toc::clamp_range(item.start_page, item.end_page, total_pages) {
            Some((start, end)) => {
                plan.jobs.push(pdf::PageRangeJob {
                    start,
                    end,
                    dest: output_dir.join(output_file_name(i, &item.title)),
                });
                plan.titles.push(item.title.clone());
            }
            None => plan.empty.push(item.title.clone()),
        }
    }
    plan
}
