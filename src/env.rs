//! `.env` loading and API-key lookup.
//!
//! Each tool reads its credentials from the process environment, optionally
//! seeded from a `.env` file through `dotenvy`. Variables already set in the
//! environment always win over the file.
//!
//! Loading mutates the process environment, so the binaries call
//! [`load_env_file`] before they start the tokio runtime.

use crate::error::DocPrepError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn env_file_error(path: &Path, e: dotenvy::Error) -> DocPrepError {
    DocPrepError::EnvFile {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Parse a `.env` file without touching the process environment.
pub fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>, DocPrepError> {
    let iter = dotenvy::from_path_iter(path).map_err(|e| env_file_error(path, e))?;
    let mut vars = BTreeMap::new();
    for item in iter {
        let (k, v) = item.map_err(|e| env_file_error(path, e))?;
        vars.insert(k, v);
    }
    Ok(vars)
}

/// Load the explicit file if given, else the first existing candidate, into
/// the process environment without overriding variables that are already set.
///
/// Returns the file that was loaded. No file at all is not an error; a
/// missing explicit file is.
pub fn load_env_file(explicit: Option<&Path>, candidates: &[PathBuf]) -> Result<Option<PathBuf>, DocPrepError> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => candidates.iter().find(|p| p.is_file()).cloned(),
    };
    let loaded = match path {
        Some(p) => {
            dotenvy::from_path(&p).map_err(|e| env_file_error(&p, e))?;
            info!("Loaded environment from: {}", p.display());
            Some(p)
        }
        None => {
            debug!("No .env file found in {:?}", candidates);
            None
        }
    };
    alias_google_keys();
    Ok(loaded)
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Make `GOOGLE_API_KEY` and `GEMINI_API_KEY` interchangeable: whichever is
/// set is copied to the other when that one is missing.
///
/// Mutates the process environment; call it before worker threads start.
pub fn alias_google_keys() {
    match (non_empty_var("GOOGLE_API_KEY"), non_empty_var("GEMINI_API_KEY")) {
        (Some(k), None) => std::env::set_var("GEMINI_API_KEY", k),
        (None, Some(k)) => std::env::set_var("GOOGLE_API_KEY", k),
        _ => {}
    }
}

/// `GOOGLE_API_KEY`, falling back to `GEMINI_API_KEY`.
pub fn google_api_key() -> Option<String> {
    non_empty_var("GOOGLE_API_KEY").or_else(|| non_empty_var("GEMINI_API_KEY"))
}

/// Split a comma-separated key list, dropping blanks.
pub fn split_keys(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keys for image generation: `GOOGLE_API_KEYS` (comma list), else the single
/// Google key.
pub fn image_api_keys() -> Result<Vec<String>, DocPrepError> {
    let keys = match non_empty_var("GOOGLE_API_KEYS") {
        Some(list) => {
            let keys = split_keys(&list);
            info!("Found {} API keys in GOOGLE_API_KEYS", keys.len());
            keys
        }
        None => google_api_key().into_iter().collect(),
    };
    if keys.is_empty() {
        return Err(DocPrepError::NoApiKeys);
    }
    Ok(keys)
}
