//! Locate image references in Markdown and cut context windows around them.
//!
//! All offsets are byte offsets into the scanned string (as produced by the
//! regex engine); all window sizes are counted in characters so multi-byte
//! scripts get the same amount of context as ASCII.

use once_cell::sync::Lazy;
use regex::Regex;

/// Extensions recognised as images by the wiki and empty-alt patterns.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff", "ico",
];

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());

static RE_EMPTY_ALT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)!\[\]\(([^)]+\.(?:png|jpg|jpeg|gif|webp|svg|bmp|tiff|ico))\)").unwrap()
});

static RE_WIKI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)!\[\[([^\]]+\.(?:png|jpg|jpeg|gif|webp|svg|bmp|tiff|ico))\]\]").unwrap()
});

/// One `![alt](path)` occurrence with its surrounding text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub full_match: String,
    pub alt_text: String,
    pub image_path: String,
    /// Byte offset of `!`.
    pub start: usize,
    /// Byte offset one past `)`.
    pub end: usize,
    pub context_before: String,
    pub context_after: String,
}

/// A located link: the captured target plus its byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatch {
    pub target: String,
    pub start: usize,
    pub end: usize,
}

/// Every Markdown image in document order, with `context_chars` characters of
/// trimmed context on each side.
pub fn find_images(content: &str, context_chars: usize) -> Vec<ImageRef> {
    RE_IMAGE
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let (context_before, context_after) =
                context_around(content, whole.start(), whole.end(), context_chars);
            Some(ImageRef {
                full_match: whole.as_str().to_string(),
                alt_text: caps.get(1)?.as_str().to_string(),
                image_path: caps.get(2)?.as_str().to_string(),
                start: whole.start(),
                end: whole.end(),
                context_before,
                context_after,
            })
        })
        .collect()
}

/// `![](path)` images with a known image extension (case-insensitive).
pub fn find_empty_alt(content: &str) -> Vec<LinkMatch> {
    collect_links(&RE_EMPTY_ALT, content)
}

/// `![[name.ext]]` wiki embeds with a known image extension (case-insensitive).
pub fn find_wiki_links(content: &str) -> Vec<LinkMatch> {
    collect_links(&RE_WIKI, content)
}

fn collect_links(re: &Regex, content: &str) -> Vec<LinkMatch> {
    re.captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(LinkMatch {
                target: caps.get(1)?.as_str().to_string(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Up to `n` characters before `start` and after `end`, each trimmed.
pub fn context_around(content: &str, start: usize, end: usize, n: usize) -> (String, String) {
    (
        tail_chars(&content[..start], n).trim().to_string(),
        head_chars(&content[end..], n).trim().to_string(),
    )
}

/// First `n` characters of `s`.
pub fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `n` characters of `s`.
pub fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Whether `path` has one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn is_image_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_images_with_context() {
        let md = "Intro text.\n\n![](images/a.png)\n\nAfter the image.";
        let refs = find_images(md, 100);
        assert_eq!(refs.len(), 1);
        let r = &refs[0];
        assert_eq!(r.image_path, "images/a.png");
        assert_eq!(r.alt_text, "");
        assert_eq!(r.context_before, "Intro text.");
        assert_eq!(r.context_after, "After the image.");
        assert_eq!(&md[r.start..r.end], r.full_match);
    }

    #[test]
    fn context_is_counted_in_characters() {
        let md = "가나다라마![x](p.png)바사아자차";
        let r = &find_images(md, 2)[0];
        assert_eq!(r.context_before, "라마");
        assert_eq!(r.context_after, "바사");
    }

    #[test]
    fn keeps_existing_alt_text() {
        let refs = find_images("![old caption](img/b.jpg) and ![](c.gif)", 5);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].alt_text, "old caption");
        assert_eq!(refs[1].image_path, "c.gif");
    }

    #[test]
    fn empty_alt_only_matches_image_extensions() {
        let md = "![](a.PNG) ![](doc.pdf) ![x](b.png) ![](dir/c.webp)";
        let targets: Vec<_> = find_empty_alt(md).into_iter().map(|m| m.target).collect();
        assert_eq!(targets, vec!["a.PNG", "dir/c.webp"]);
    }

    #[test]
    fn wiki_links_are_case_insensitive() {
        let md = "![[Shot 1.JPG]] text ![[note.md]] ![[sub/pic.svg]]";
        let links = find_wiki_links(md);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, "Shot 1.JPG");
        assert_eq!(&md[links[1].start..links[1].end], "![[sub/pic.svg]]");
    }

    #[test]
    fn head_and_tail_chars() {
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(head_chars("hi", 10), "hi");
        assert_eq!(tail_chars("héllo", 4), "éllo");
        assert_eq!(tail_chars("hi", 10), "hi");
        assert_eq!(tail_chars("hi", 0), "");
    }

    #[test]
    fn image_path_detection() {
        assert!(is_image_path(std::path::Path::new("a/B.TIFF")));
        assert!(!is_image_path(std::path::Path::new("a/b.md")));
    }
}
