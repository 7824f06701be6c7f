//! In-place Markdown rewrites: captions into alt text, image path fixes.

use crate::pipeline::scan::ImageRef;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Collapse a caption onto one line: real newlines become spaces, then trim.
///
/// A literal backslash-n sequence in the caption is left alone.
pub fn normalize_caption(caption: &str) -> String {
    caption.replace("\r\n", " ").replace('\n', " ").trim().to_string()
}

/// Replace each image with `![caption](path)`.
///
/// Replacements run from the last match to the first so earlier byte
/// offsets stay valid. Offsets must come from scanning `content` itself.
pub fn apply_captions(content: &str, captions: &[(&ImageRef, String)]) -> String {
    let mut sorted: Vec<&(&ImageRef, String)> = captions.iter().collect();
    sorted.sort_by(|a, b| b.0.start.cmp(&a.0.start));

    let mut out = content.to_string();
    for (image, caption) in sorted {
        let new_text = format!("![{}]({})", normalize_caption(caption), image.image_path);
        out.replace_range(image.start..image.end, &new_text);
    }
    out
}

/// Replace the first `![](target)` with `![caption](target)`.
///
/// Returns `None` when no such empty-alt link is left in `content`.
pub fn replace_first_empty_alt(content: &str, target: &str, caption: &str) -> Option<String> {
    let needle = format!("![]({target})");
    let pos = content.find(&needle)?;
    let mut out = String::with_capacity(content.len() + caption.len());
    out.push_str(&content[..pos]);
    out.push_str(&format!("![{}]({})", normalize_caption(caption), target));
    out.push_str(&content[pos + needle.len()..]);
    Some(out)
}

static RE_DOUBLED_IMAGES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*/images/images/").unwrap());

/// Point image links written with an absolute output folder prefix at `images/`.
///
/// Handles the folder as given, its canonical form, and any
/// `.../images/images/` doubling.
pub fn relativize_image_paths(markdown: &str, output_folder: &Path) -> String {
    let mut prefixes = vec![output_folder.to_string_lossy().into_owned()];
    if let Ok(canon) = output_folder.canonicalize() {
        let canon = canon.to_string_lossy().into_owned();
        if !prefixes.contains(&canon) {
            prefixes.insert(0, canon);
        }
    }

    let mut out = markdown.to_string();
    for prefix in prefixes.iter().filter(|p| !p.is_empty()) {
        let Ok(re) = Regex::new(&format!(
            r"!\[([^\]]*)\]\({}/images/",
            regex::escape(prefix.trim_end_matches('/'))
        )) else {
            continue;
        };
        out = re.replace_all(&out, "![$1](images/").into_owned();
    }
    RE_DOUBLED_IMAGES
        .replace_all(&out, "![$1](images/")
        .into_owned()
}
