//! Prompts for image captioning and vision-engine page conversion.
//!
//! Caption prompts are templates: the placeholders `{context_before}`,
//! `{context_after}`, `{image_path}` and `{alt_text}` are substituted per
//! image. Users may supply their own template file; anything it does not
//! mention is simply not sent.

use crate::error::DocPrepError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{info, warn};

/// Default caption template used when no template file is given or it is missing.
pub const DEFAULT_CAPTION_TEMPLATE: &str = r#"Analyse the image and write a concise description that can serve as its Markdown alt text.

The image appears inside a document. Use the surrounding text to understand what the image shows and why it is there.

Context before: {context_before}
Context after: {context_after}
Image: {image_path}

Rules:
- Answer with the description only, in the language of the surrounding text
- One or two sentences, no line breaks
- Mention numbers, labels and axis titles if the image is a chart or table
- Do NOT start with "This image" or "The image shows""#;

/// Values substituted into a caption template.
#[derive(Debug, Clone, Copy)]
pub struct CaptionContext<'a> {
    pub context_before: &'a str,
    pub context_after: &'a str,
    pub image_path: &'a str,
    pub alt_text: &'a str,
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{(context_before|context_after|image_path|alt_text)\}").unwrap()
});

/// Substitute every known placeholder in `template` in a single pass.
///
/// Doubled braces (`{{`, `}}`) are emitted as literal braces so templates
/// containing JSON examples keep working. Unknown `{names}` are left as is.
pub fn render_caption_prompt(template: &str, ctx: &CaptionContext<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match caps.get(1).map(|m| m.as_str()) {
                Some("context_before") => ctx.context_before,
                Some("context_after") => ctx.context_after,
                Some("image_path") => ctx.image_path,
                Some(_) => ctx.alt_text,
                None if &caps[0] == "{{" => "{",
                None => "}",
            }
            .to_string()
        })
        .into_owned()
}

/// Load a caption template.
///
/// * `None` → [`DEFAULT_CAPTION_TEMPLATE`].
/// * A missing file falls back to the default with a warning.
/// * Any other read failure is fatal.
pub fn load_caption_template(path: Option<&Path>) -> Result<String, DocPrepError> {
    let Some(path) = path else {
        return Ok(DEFAULT_CAPTION_TEMPLATE.to_string());
    };
    match std::fs::read_to_string(path) {
        Ok(t) => {
            info!("Loaded prompt template: {}", path.display());
            Ok(t)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Prompt template '{}' not found; using the built-in prompt",
                path.display()
            );
            Ok(DEFAULT_CAPTION_TEMPLATE.to_string())
        }
        Err(source) => Err(DocPrepError::ReadFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// System prompt for the vision engine: one rendered PDF page in, Markdown out.
pub const PAGE_CONVERSION_PROMPT: &str = r#"You are an expert document converter. Convert the PDF page image to clean, well-structured Markdown.

1. TEXT
   - Preserve ALL text content completely and in reading order
   - Correct obvious OCR-like errors only if you are completely certain

2. STRUCTURE
   - Use #, ##, ### for headings matching the visual hierarchy
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Use **bold** and *italic* to match the visual emphasis

3. TABLES
   - Convert tables to GFM pipe format

4. FORMULAS
   - Render mathematical expressions using LaTeX: $inline$ and $$display$$

5. IGNORE
   - Page numbers, running headers and footers, decorative lines

6. IMAGES
   - Do NOT describe pictures or emit image links; embedded images are added separately

7. OUTPUT
   - Output ONLY the Markdown content, without ```markdown fences or commentary"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CaptionContext<'static> {
        CaptionContext {
            context_before: "Sales grew",
            context_after: "in Q3.",
            image_path: "images/chart.png",
            alt_text: "",
        }
    }

    #[test]
    fn default_template_has_all_context_placeholders() {
        for p in ["{context_before}", "{context_after}", "{image_path}"] {
            assert!(DEFAULT_CAPTION_TEMPLATE.contains(p), "missing {p}");
        }
    }

    #[test]
    fn render_substitutes_placeholders() {
        let out = render_caption_prompt(
            "B: {context_before} | A: {context_after} | I: {image_path} | alt={alt_text}",
            &ctx(),
        );
        assert_eq!(out, "B: Sales grew | A: in Q3. | I: images/chart.png | alt=");
    }

    #[test]
    fn render_keeps_escaped_braces() {
        let out = render_caption_prompt(r#"Reply as {{"alt": "..."}} for {image_path}"#, &ctx());
        assert_eq!(out, r#"Reply as {"alt": "..."} for images/chart.png"#);
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let c = CaptionContext {
            context_before: "{image_path}",
            ..ctx()
        };
        assert_eq!(render_caption_prompt("{context_before}", &c), "{image_path}");
    }

    #[test]
    fn unknown_placeholders_survive() {
        assert_eq!(render_caption_prompt("{page} {image_path}", &ctx()), "{page} images/chart.png");
    }

    #[test]
    fn missing_template_file_falls_back() {
        let t = load_caption_template(Some(Path::new("/no/such/prompt.md"))).unwrap();
        assert_eq!(t, DEFAULT_CAPTION_TEMPLATE);
    }

    #[test]
    fn template_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("prompt.md");
        std::fs::write(&p, "Describe {image_path}").unwrap();
        assert_eq!(load_caption_template(Some(&p)).unwrap(), "Describe {image_path}");
    }

    #[test]
    fn page_prompt_forbids_fences() {
        assert!(PAGE_CONVERSION_PROMPT.contains("fences"));
    }
}
