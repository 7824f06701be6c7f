//! Error types for the docprep library.
//!
//! Two error types for two failure modes:
//!
//! * [`DocPrepError`]: **Fatal**: the tool cannot proceed at all (missing
//!   input, PDF without an outline, provider not configured, no API keys).
//!   Returned as `Err(DocPrepError)` from the top-level operations.
//!
//! * [`ItemError`]: **Non-fatal**: a single image caption or a single slide
//!   failed. Stored inside the per-item outcome so the rest of the batch still
//!   completes and the run summary can report exactly what went wrong.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docprep library.
#[derive(Debug, Error)]
pub enum DocPrepError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The path exists but is a directory (or something else that is not a file).
    #[error("Not a file: '{path}'")]
    NotAFile { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The slide outline could not be parsed.
    #[error("Invalid slide outline '{path}': {detail}")]
    InvalidOutline { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The PDF has no outline (bookmarks), so there is nothing to split on.
    #[error("PDF '{path}' has no table of contents (outline)")]
    NoToc { path: PathBuf },

    /// The outline has no entries at or above the requested level.
    #[error("No table-of-contents entries at level {level} or above")]
    NoSplitItems { level: u32 },

    /// pdfium failed while reading text, images or writing pages.
    #[error("PDF operation failed for page {page}: {detail}")]
    PdfOperationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or its directory) or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM / API errors ──────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// No API key was found for the image-generation API.
    #[error(
        "No API keys found.\n\
Set GOOGLE_API_KEYS (comma-separated) or GOOGLE_API_KEY in the environment or a .env file."
    )]
    NoApiKeys,

    /// Every page of a vision-engine conversion failed.
    #[error("All {total} pages failed to convert.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read an input file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A `.env` file could not be read or parsed.
    #[error("Failed to load environment file '{path}': {detail}")]
    EnvFile { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image or slide.
///
/// The `Display` output of the slide variants doubles as the `reason` string in
/// `FAILURES.json`, so the prefixes (`SAFETY_FILTER`, `NO_PROMPT`, ...) are part
/// of the report format.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The referenced image does not exist on disk.
    #[error("image file not found: {path}")]
    MissingImage { path: String },

    /// The image reference disappeared from the document before it was processed.
    #[error("already processed or not found: {path}")]
    NotInDocument { path: String },

    /// The image could not be read or encoded.
    #[error("could not read image {path}: {detail}")]
    Unreadable { path: String, detail: String },

    /// LLM call failed after retries.
    #[error("LLM call failed after {attempts} attempt(s): {detail}")]
    LlmFailed { attempts: u32, detail: String },

    /// The model answered with an empty description.
    #[error("model returned an empty description")]
    EmptyDescription,

    // ── Slide generation ──────────────────────────────────────────────────
    /// The slide has no `nano_banana_prompt`.
    #[error("NO_PROMPT")]
    NoPrompt,

    /// The image API refused the prompt on safety grounds.
    #[error("SAFETY_FILTER: {0}")]
    SafetyFilter(String),

    /// Every attempt failed with a generic error.
    #[error("MAX_RETRIES_EXCEEDED: {0}")]
    MaxRetriesExceeded(String),

    /// The API kept returning responses without any parts.
    #[error("{0}")]
    EmptyResponse(String),

    /// The response had parts but none of them was an image.
    #[error("No image in response parts")]
    NoImage,

    /// The generated image could not be decoded or saved.
    #[error("SAVE_FAILED: {0}")]
    SaveFailed(String),

    /// The retry loop ran out without a definitive outcome.
    #[error("Unknown error - all retries exhausted")]
    RetriesExhausted,
}

/// Truncate an error message to at most `max` characters.
///
/// Provider errors can embed whole response bodies; reports keep only the head.
pub(crate) fn truncate_message(msg: &str, max: usize) -> String {
    match msg.char_indices().nth(max) {
        Some((idx, _)) => msg[..idx].to_string(),
        None => msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_split_items_mentions_level() {
        let e = DocPrepError::NoSplitItems { level: 2 };
        assert!(e.to_string().contains("level 2"), "got: {e}");
    }

    #[test]
    fn slide_failure_reasons_keep_report_prefixes() {
        assert_eq!(ItemError::NoPrompt.to_string(), "NO_PROMPT");
        assert_eq!(
            ItemError::SafetyFilter("blocked".into()).to_string(),
            "SAFETY_FILTER: blocked"
        );
        assert!(ItemError::MaxRetriesExceeded("boom".into())
            .to_string()
            .starts_with("MAX_RETRIES_EXCEEDED"));
    }

    #[test]
    fn llm_failed_display() {
        let e = ItemError::LlmFailed {
            attempts: 3,
            detail: "timeout".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempt"), "got: {msg}");
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn truncate_message_respects_char_boundaries() {
        assert_eq!(truncate_message("한글입니다", 2), "한글");
        assert_eq!(truncate_message("short", 200), "short");
    }
}
