//! TOC checker: report a PDF's outline structure as JSON.

use crate::error::DocPrepError;
use crate::pipeline::{input, pdf};
use crate::toc::{self, TocRange, TocSummary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// JSON report produced by [`check_toc`].
#[derive(Debug, Clone, Serialize)]
pub struct TocReport {
    pub pdf_name: String,
    pub pdf_path: String,
    pub total_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TocSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toc: Option<Vec<TocRange>>,
    /// Set to `"No TOC found"` for documents without an outline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Analyse the outline of `pdf_path`.
///
/// A document without an outline is reported through `error`, not as a
/// failure. Entries that break page order are dropped and logged.
pub async fn check_toc(pdf_path: impl AsRef<Path>) -> Result<TocReport, DocPrepError> {
    let path = input::resolve_pdf(pdf_path)?;
    let path = std::fs::canonicalize(&path).unwrap_or(path);
    let pdf_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let outline = pdf::read_outline(&path).await?;
    let mut report = TocReport {
        pdf_name,
        pdf_path: path.display().to_string(),
        total_pages: outline.total_pages,
        summary: None,
        toc: None,
        error: None,
    };

    if outline.toc.is_empty() {
        warn!("{}: no outline", report.pdf_name);
        report.error = Some("No TOC found".into());
        return Ok(report);
    }

    let mut ranges = toc::page_ranges(&outline.toc, outline.total_pages);
    let spans = ranges.iter().map(|r| (r.start_page, r.end_page)).collect();
    let characters = pdf::page_characters(&path, spans).await?;
    for (range, chars) in ranges.iter_mut().zip(characters) {
        range.characters = chars;
    }

    let (valid, invalid) = toc::validate(ranges);
    for entry in &invalid {
        warn!(
            "Dropping outline item '{}' (pages {}-{}): {}",
            entry.title, entry.start_page, entry.end_page, entry.reason
        );
    }

    report.summary = Some(toc::summarize(&valid, outline.total_pages));
    info!(
        "{}: {} outline items ({} dropped)",
        report.pdf_name,
        valid.len(),
        invalid.len()
    );
    report.toc = Some(valid);
    Ok(report)
}

/// Where the report is saved: `<pdf dir>/<stem>/toc.json`.
pub fn report_path(pdf_path: &Path) -> PathBuf {
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    pdf_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(stem)
        .join("toc.json")
}

/// Write `report` as pretty JSON to [`report_path`], creating the directory.
pub fn save_report(report: &TocReport, pdf_path: &Path) -> Result<PathBuf, DocPrepError> {
    let out = report_path(pdf_path);
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| DocPrepError::Internal(format!("TOC report serialisation failed: {e}")))?;
    input::write_atomic(&out, &json)?;
    Ok(out)
}
