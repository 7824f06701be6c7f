//! Table-of-contents arithmetic.
//!
//! Everything here is pure: the pdfium side ([`crate::pipeline::pdf`]) turns
//! a document outline into a flat `Vec<TocEntry>` and the functions below
//! derive page ranges, validity, per-level statistics and split items from it.
//!
//! Page numbers are 1-based and inclusive throughout. An outline item whose
//! destination cannot be resolved carries page `-1`; such items never pass
//! [`validate`] and clamp to the first page when splitting.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// One outline item in depth-first document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    /// Nesting depth, 1 for top-level items.
    pub level: u32,
    pub title: String,
    /// 1-based destination page, `-1` when unresolved.
    pub page: i32,
}

impl TocEntry {
    pub fn new(level: u32, title: impl Into<String>, page: i32) -> Self {
        Self {
            level,
            title: title.into(),
            page,
        }
    }
}

/// A TOC entry with its computed page span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocRange {
    pub level: u32,
    pub title: String,
    pub start_page: i32,
    pub end_page: i32,
    pub page_count: i32,
    pub characters: usize,
    pub has_children: bool,
}

/// An entry rejected by [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidEntry {
    pub level: u32,
    pub title: String,
    pub start_page: i32,
    pub end_page: i32,
    pub reason: &'static str,
}

/// A TOC item selected as one output file of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitItem {
    pub level: u32,
    pub title: String,
    pub start_page: i32,
    pub end_page: i32,
}

/// End page of entry `i`: one before the next entry at the same or a shallower
/// level that starts on a later page, or the last page of the document.
fn end_page_of(toc: &[TocEntry], i: usize, total_pages: usize) -> i32 {
    let (level, page) = (toc[i].level, toc[i].page);
    toc[i + 1..]
        .iter()
        .find(|next| next.level <= level && next.page > page)
        .map(|next| next.page - 1)
        .unwrap_or(total_pages as i32)
}

/// Compute the page span of every TOC entry.
///
/// `characters` is left at 0; callers with access to the document fill it in.
pub fn page_ranges(toc: &[TocEntry], total_pages: usize) -> Vec<TocRange> {
    toc.iter()
        .enumerate()
        .map(|(i, entry)| {
            let end_page = end_page_of(toc, i, total_pages);
            let has_children = toc.get(i + 1).is_some_and(|next| next.level > entry.level);
            TocRange {
                level: entry.level,
                title: entry.title.clone(),
                start_page: entry.page,
                end_page,
                page_count: end_page - entry.page + 1,
                characters: 0,
                has_children,
            }
        })
        .collect()
}

/// Split ranges into those with a monotonic, non-empty page sequence and the rest.
pub fn validate(ranges: Vec<TocRange>) -> (Vec<TocRange>, Vec<InvalidEntry>) {
    let mut valid = Vec::with_capacity(ranges.len());
    let mut invalid = Vec::new();
    let mut last_page = 0;

    for item in ranges {
        let ok = item.start_page >= last_page
            && item.start_page <= item.end_page
            && item.page_count > 0;
        if ok {
            last_page = item.start_page;
            valid.push(item);
        } else {
            invalid.push(InvalidEntry {
                level: item.level,
                title: item.title,
                start_page: item.start_page,
                end_page: item.end_page,
                reason: "invalid_page_sequence",
            });
        }
    }

    (valid, invalid)
}

/// Per-level statistics of a validated TOC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    pub count: usize,
    pub total_pages: i64,
    pub avg_pages: f64,
    pub min_pages: i32,
    pub max_pages: i32,
    pub total_characters: usize,
    pub avg_characters: f64,
    pub min_characters: usize,
    pub max_characters: usize,
}

/// Summary block of the TOC report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocSummary {
    pub total_pages: usize,
    pub max_level: u32,
    #[serde(serialize_with = "serialize_levels")]
    pub levels: BTreeMap<u32, LevelStats>,
}

/// Emit `levels` as `{"level_1": ..., "level_2": ...}` in numeric order.
fn serialize_levels<S: Serializer>(
    levels: &BTreeMap<u32, LevelStats>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(levels.len()))?;
    for (level, stats) in levels {
        map.serialize_entry(&format!("level_{level}"), stats)?;
    }
    map.end()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Aggregate page and character statistics per TOC level.
pub fn summarize(toc: &[TocRange], total_pages: usize) -> TocSummary {
    let mut grouped: BTreeMap<u32, Vec<&TocRange>> = BTreeMap::new();
    for item in toc {
        grouped.entry(item.level).or_default().push(item);
    }

    let levels = grouped
        .into_iter()
        .map(|(level, items)| {
            let count = items.len();
            let total_pages: i64 = items.iter().map(|i| i.page_count as i64).sum();
            let total_characters: usize = items.iter().map(|i| i.characters).sum();
            let stats = LevelStats {
                count,
                total_pages,
                avg_pages: round1(total_pages as f64 / count as f64),
                min_pages: items.iter().map(|i| i.page_count).min().unwrap_or(0),
                max_pages: items.iter().map(|i| i.page_count).max().unwrap_or(0),
                total_characters,
                avg_characters: round1(total_characters as f64 / count as f64),
                min_characters: items.iter().map(|i| i.characters).min().unwrap_or(0),
                max_characters: items.iter().map(|i| i.characters).max().unwrap_or(0),
            };
            (level, stats)
        })
        .collect::<BTreeMap<_, _>>();

    TocSummary {
        total_pages,
        max_level: levels.keys().copied().max().unwrap_or(0),
        levels,
    }
}

/// Select the items a split at `max_level` produces.
///
/// Each section is split at the finest level available up to `max_level`: an
/// entry that has descendants at or above `max_level` is replaced by those
/// descendants.
pub fn split_items(toc: &[TocEntry], max_level: u32, total_pages: usize) -> Vec<SplitItem> {
    let has_children: Vec<bool> = toc
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            if entry.level >= max_level {
                return false;
            }
            toc[i + 1..]
                .iter()
                .take_while(|next| next.level > entry.level)
                .any(|next| next.level <= max_level)
        })
        .collect();

    toc.iter()
        .enumerate()
        .filter(|(i, entry)| entry.level <= max_level && !has_children[*i])
        .map(|(i, entry)| SplitItem {
            level: entry.level,
            title: entry.title.clone(),
            start_page: entry.page,
            end_page: end_page_of(toc, i, total_pages),
        })
        .collect()
}

/// Keep items whose start page never goes backwards; return the titles of the rest.
pub fn sequential(items: Vec<SplitItem>) -> (Vec<SplitItem>, Vec<String>) {
    let mut kept = Vec::with_capacity(items.len());
    let mut skipped = Vec::new();
    let mut last_page = 0;

    for item in items {
        if item.start_page >= last_page {
            last_page = item.start_page;
            kept.push(item);
        } else {
            skipped.push(item.title);
        }
    }

    (kept, skipped)
}

/// Convert a 1-based inclusive page span into a 0-based one inside the document.
///
/// Returns `None` when nothing of the span remains after clamping.
pub fn clamp_range(start_page: i32, end_page: i32, total_pages: usize) -> Option<(usize, usize)> {
    if total_pages == 0 {
        return None;
    }
    let start = (start_page - 1).max(0) as i64;
    let end = ((end_page - 1) as i64).min(total_pages as i64 - 1);
    if start > end {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

/// Make a TOC title usable as a file name on every platform.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
