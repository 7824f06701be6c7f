//! Batch slide image generation from a JSON outline.
//!
//! ```json
//! {
//!   "reference_images": ["brand/logo.png"],
//!   "slides": [
//!     { "page": 1, "title": "Intro", "nano_banana_prompt": "...", "reference_images": [] }
//!   ]
//! }
//! ```
//!
//! Each slide with a prompt becomes `slide_{page:03}.png` in the output
//! directory. Slides run in fixed-size batches with a pause between batches;
//! within a batch they run concurrently against a rotating set of API keys.
//! Failures are collected into a [`FailureReport`] instead of aborting.

pub mod gemini;
pub mod generate;

pub use gemini::{ApiError, GeminiImageApi, ImageApi, ImageRequest, ImageResponse, ReferenceImage};
pub use generate::{generate_slide_image, KeyRing, SlideGenerator, SlideOutcome, SlideRun};

use crate::error::DocPrepError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Markers around the failure report printed on stdout.
pub const FAILURE_REPORT_START: &str = "--- FAILURE_REPORT_JSON_START ---";
pub const FAILURE_REPORT_END: &str = "--- FAILURE_REPORT_JSON_END ---";

/// File name of the failure report written into the output directory.
pub const FAILURE_REPORT_FILE: &str = "FAILURES.json";

/// Parsed slide outline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlideDeck {
    /// Applied to every slide, after the slide's own references.
    #[serde(default)]
    pub reference_images: Vec<PathBuf>,
    #[serde(default)]
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Slide {
    /// Accepts `3`, `3.0` or `"3"`. Anything else counts as absent.
    #[serde(default, deserialize_with = "lenient_page")]
    pub page: Option<u32>,
    pub title: Option<String>,
    pub nano_banana_prompt: Option<String>,
    #[serde(default)]
    pub reference_images: Vec<PathBuf>,
}

fn lenient_page<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let number = match &value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let page = number
        .filter(|n| n.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(n))
        .map(|n| n as u32);
    if page.is_none() {
        warn!("Ignoring unusable slide page {}; using its position", value);
    }
    Ok(page)
}

impl Slide {
    /// Page number, defaulting to the 1-based position in the deck.
    pub fn page_or(&self, index: usize) -> u32 {
        self.page.unwrap_or(index as u32 + 1)
    }

    pub fn title_or_default(&self, page: u32) -> String {
        self.title.clone().unwrap_or_else(|| format!("Slide {page}"))
    }

    /// The prompt, if present and not blank.
    pub fn prompt(&self) -> Option<&str> {
        self.nano_banana_prompt.as_deref().filter(|p| !p.trim().is_empty())
    }
}

impl SlideDeck {
    pub async fn load(path: &Path) -> Result<Self, DocPrepError> {
        let text = crate::pipeline::input::read_text(path).await?;
        serde_json::from_str(&text).map_err(|e| DocPrepError::InvalidOutline {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// `(page, slide)` for every slide, keeping only `targets` when given.
    pub fn select(&self, targets: Option<&BTreeSet<u32>>) -> Vec<(u32, &Slide)> {
        self.slides
            .iter()
            .enumerate()
            .map(|(i, s)| (s.page_or(i), s))
            .filter(|(page, _)| targets.is_none_or(|t| t.contains(page)))
            .collect()
    }
}

/// Parse a slide selection such as `1-3,5,7-9`.
///
/// Invalid parts are logged and skipped. Reversed ranges select nothing.
pub fn parse_slide_numbers(spec: &str) -> BTreeSet<u32> {
    let mut out = BTreeSet::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((a, b)) => match (a.trim().parse::<u32>(), b.trim().parse::<u32>()) {
                (Ok(a), Ok(b)) => out.extend(a..=b),
                _ => warn!("Invalid range '{}', skipping", part),
            },
            None => match part.parse::<u32>() {
                Ok(n) => {
                    out.insert(n);
                }
                Err(_) => warn!("Invalid slide number '{}', skipping", part),
            },
        }
    }
    out
}

/// Output directory: `override_dir`, else `<json dir>/<json stem>_images`.
pub fn output_dir(json_path: &Path, override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    let stem = json_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "slides".into());
    json_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{stem}_images"))
}

/// One failed slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSlide {
    pub page: u32,
    pub title: String,
    pub reason: String,
}

/// Contents of `FAILURES.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub source_json: String,
    pub output_dir: String,
    pub total_processed: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failed_slides: Vec<FailedSlide>,
}

impl FailureReport {
    pub fn to_json(&self) -> Result<String, DocPrepError> {
        serde_json::to_string_pretty(self).map_err(|e| DocPrepError::Internal(e.to_string()))
    }

    /// Write the report into `dir` and return its path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, DocPrepError> {
        let path = dir.join(FAILURE_REPORT_FILE);
        crate::pipeline::input::write_atomic(&path, &self.to_json()?)?;
        Ok(path)
    }

    /// The JSON wrapped in the start/end markers, for machine consumers of stdout.
    pub fn framed(&self) -> Result<String, DocPrepError> {
        Ok(format!(
            "{FAILURE_REPORT_START}\n{}\n{FAILURE_REPORT_END}",
            self.to_json()?
        ))
    }
}
