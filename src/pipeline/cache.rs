//! Caption cache: a JSON file mapping a context hash to a caption.
//!
//! The key is the hex MD5 of `"{image_path}:{context_before}:{context_after}"`,
//! so the same image reused in a different place gets its own caption. Entries
//! written by older tools stored the caption as a bare string; those still load.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One cached caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheEntry {
    Full {
        description: String,
        timestamp: String,
        model: String,
    },
    Legacy(String),
}

impl CacheEntry {
    pub fn description(&self) -> &str {
        match self {
            CacheEntry::Full { description, .. } => description,
            CacheEntry::Legacy(d) => d,
        }
    }
}

/// Cache key for an image reference and its context.
pub fn cache_key(image_path: &str, context_before: &str, context_after: &str) -> String {
    format!(
        "{:x}",
        md5::compute(format!("{image_path}:{context_before}:{context_after}"))
    )
}

/// In-memory view of a cache file.
#[derive(Debug)]
pub struct CaptionCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl CaptionCache {
    /// Load `path`. A missing file is an empty cache; an unreadable or
    /// malformed one is too, with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Cache '{}' is not valid JSON ({}); starting empty", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Cache '{}' could not be read ({}); starting empty", path.display(), e);
                BTreeMap::new()
            }
        };
        debug!("Cache '{}': {} entries", path.display(), entries.len());
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(CacheEntry::description)
    }

    /// Record a caption stamped with the current local time.
    pub fn insert(&mut self, key: String, description: String, model: &str) {
        self.entries.insert(
            key,
            CacheEntry::Full {
                description,
                timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                model: model.to_string(),
            },
        );
    }

    /// Write the cache as pretty JSON. Failures are logged, never returned.
    pub fn save(&self) {
        let text = match serde_json::to_string_pretty(&self.entries) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cache serialisation failed: {}", e);
                return;
            }
        };
        if let Err(e) = crate::pipeline::input::write_atomic(&self.path, &text) {
            warn!("Cache save failed: {}", e);
        }
    }
}
