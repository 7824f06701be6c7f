//! Post-processing: deterministic cleanup of generated Markdown.
//!
//! Two entry points:
//!
//! * [`clean_page`] runs on a single vision-model page transcript and fixes
//!   model quirks (outer fences, broken tables, invented image links).
//! * [`clean_markdown`] runs on the assembled document regardless of engine
//!   and only normalises whitespace and invisible characters.
//!
//! Rule order matters: line endings are normalised before trimming, fences
//! are stripped before heading spacing is checked.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one vision-model page transcript.
///
/// 1. Strip outer markdown fences
/// 2. Normalise line endings
/// 3. Ensure a blank line before headings
/// 4. Insert a missing GFM separator row after a table header
/// 5. Drop extra separator rows inside table bodies
/// 6. Replace image links the model made up with their italic alt text
pub fn clean_page(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = normalise_heading_spacing(&s);
    let s = fix_broken_tables(&s);
    let s = remove_mid_table_separators(&s);
    let s = drop_model_images(&s);
    s.trim().to_string()
}

/// Clean an assembled document.
///
/// 1. Normalise line endings
/// 2. Trim trailing whitespace per line
/// 3. Collapse runs of blank lines to at most two
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 5. End with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Fences ───────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Headings ─────────────────────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if i > 0 && RE_HEADING.is_match(line) {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Tables ───────────────────────────────────────────────────────────────

fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result = Vec::with_capacity(lines.len() + 10);
    let mut prev_is_table = false;

    for (i, &line) in lines.iter().enumerate() {
        result.push(line.to_string());
        let is_header = is_table_row(line) && !is_separator_row(line) && !prev_is_table;
        prev_is_table = is_table_row(line);
        if !is_header {
            continue;
        }
        let next = lines.get(i + 1).copied().unwrap_or("");
        if is_table_row(next) && !is_separator_row(next) {
            let col_count = line.matches('|').count().saturating_sub(1).max(1);
            let sep: String = std::iter::once("|")
                .chain(std::iter::repeat_n(" --- |", col_count))
                .collect();
            result.push(sep);
        }
    }

    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut table_line_count = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            table_line_count += 1;
            // GFM allows a separator only directly after the header.
            if is_separator_row(line) && table_line_count != 2 {
                continue;
            }
        } else {
            table_line_count = 0;
        }
        result.push(line);
    }

    result.join("\n")
}

// ── Images ───────────────────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// Embedded images are appended from pdfium, so any image link in a model
/// transcript points at nothing.
fn drop_model_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if alt.is_empty() {
                String::new()
            } else {
                format!("*{}*", alt)
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fences() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_markdown_fences("```\n# Hello\n```"), "# Hello");
        assert_eq!(strip_markdown_fences("# Hello\nWorld"), "# Hello\nWorld");
    }

    #[test]
    fn line_endings_and_trailing_whitespace() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(trim_trailing_whitespace("  hello   \nworld  "), "  hello\nworld");
    }

    #[test]
    fn blank_line_runs_collapse() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn heading_gets_blank_line() {
        let result = normalise_heading_spacing("some text\n# Heading\nmore text");
        assert!(result.contains("text\n\n# Heading\n"));
        // A hashtag is not a heading.
        let result = normalise_heading_spacing("line\n#tag");
        assert_eq!(result, "line\n#tag\n");
    }

    #[test]
    fn missing_separator_is_inserted_once() {
        let result = fix_broken_tables("| A | B |\n| 1 | 2 |\n| 3 | 4 |");
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(is_separator_row(lines[1]));
        assert!(!is_separator_row(lines[3]));
    }

    #[test]
    fn well_formed_table_unchanged() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |";
        assert_eq!(fix_broken_tables(input), input);
        assert_eq!(remove_mid_table_separators(input), input);
    }

    #[test]
    fn body_separators_removed() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        let result = remove_mid_table_separators(input);
        assert_eq!(result.lines().filter(|l| is_separator_row(l)).count(), 1);
        assert!(result.contains("| 3 | 4 |"));
    }

    #[test]
    fn invisible_chars_removed() {
        assert_eq!(
            remove_invisible_chars("hello\u{200B}world\u{FEFF}foo\u{00AD}bar"),
            "helloworldfoobar"
        );
    }

    #[test]
    fn model_images_become_captions() {
        let out = drop_model_images("Text\n![Chart Title](chart.png)\n![](x.png)");
        assert_eq!(out, "Text\n*Chart Title*\n");
    }

    #[test]
    fn clean_page_full() {
        let input = "```markdown\n# Title\r\nSome text\n| A | B |\n| 1 | 2 |\n```";
        let result = clean_page(input);
        assert!(result.starts_with("# Title"));
        assert!(result.contains("| --- | --- |"));
    }

    #[test]
    fn clean_markdown_keeps_image_links() {
        let input = "# T   \r\n\n\n\n\n\n![](images/a.png)\u{200B}";
        let result = clean_markdown(input);
        assert_eq!(result, "# T\n\n\n![](images/a.png)\n");
    }
}
