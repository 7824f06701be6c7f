//! End-to-end integration tests for docprep.
//!
//! These tests use real PDF files in `./test_cases/`, need a pdfium library
//! and (for the caption tests) make live LLM API calls. They are gated behind
//! the `E2E_ENABLED` environment variable so they do not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! Expected files:
//!   test_cases/outlined.pdf    a PDF with a multi-level outline and images
//!   test_cases/no_outline.pdf  a PDF without bookmarks

use docprep::config::{ConvertEngine, ConvertOptions};
use docprep::progress;
use docprep::{
    check_toc, pdf_to_markdown, split_pdf_by_toc, CaptionModel, DescribeConfig, DocPrepError,
    ImageDescriber,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Copy `pdf` into a fresh temp dir so outputs written next to it are
/// cleaned up with the dir.
fn scratch_copy(pdf: &Path) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let dest = dir.path().join(pdf.file_name().expect("file name"));
    std::fs::copy(pdf, &dest).expect("copy test pdf");
    (dir, dest)
}

/// Assert the markdown passes basic quality checks.
fn assert_markdown_quality(md: &str, context: &str) {
    assert!(!md.trim().is_empty(), "[{context}] Markdown is empty");
    assert!(
        md.ends_with('\n'),
        "[{context}] Markdown must end with a newline"
    );
    assert!(
        !md.contains("\n\n\n\n"),
        "[{context}] Output has more than 3 consecutive blank lines"
    );
    let invisible = ['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'];
    for ch in invisible {
        assert!(
            !md.contains(ch),
            "[{context}] Output contains invisible char U+{:04X}",
            ch as u32
        );
    }
    println!("[{context}] ✓  {} bytes, quality checks passed", md.len());
}

// ── Input validation (no pdfium needed) ──────────────────────────────────────

#[tokio::test]
async fn test_check_toc_nonexistent() {
    let err = check_toc("/definitely/not/here.pdf").await.unwrap_err();
    assert!(
        matches!(err, DocPrepError::FileNotFound { .. }),
        "expected FileNotFound, got: {err}"
    );
}

#[tokio::test]
async fn test_check_toc_rejects_non_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let fake = dir.path().join("fake.pdf");
    std::fs::write(&fake, b"hello world").unwrap();
    let err = check_toc(&fake).await.unwrap_err();
    assert!(matches!(err, DocPrepError::NotAPdf { .. }), "got: {err}");
}

// ── TOC tools ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_check_toc_outlined() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("outlined.pdf"));

    let report = check_toc(&path).await.expect("check_toc should succeed");
    assert!(report.error.is_none());
    assert!(report.total_pages > 0);

    let toc = report.toc.as_ref().expect("toc present");
    assert!(!toc.is_empty());
    for entry in toc {
        assert!(entry.start_page >= 1 && entry.end_page >= entry.start_page, "{entry:?}");
    }
    let summary = report.summary.as_ref().expect("summary present");
    assert!(summary.levels.contains_key(&1));

    let json = serde_json::to_value(&report).unwrap();
    assert!(json["summary"]["levels"]["level_1"]["count"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_check_toc_without_outline() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("no_outline.pdf"));

    let report = check_toc(&path).await.expect("missing outline is not an error");
    assert_eq!(report.error.as_deref(), Some("No TOC found"));
    assert!(report.toc.is_none());
}

#[tokio::test]
async fn test_split_level_one() {
    let src = e2e_skip_unless_ready!(test_cases_dir().join("outlined.pdf"));
    let (_dir, pdf) = scratch_copy(&src);

    let report = split_pdf_by_toc(&pdf, 1).await.expect("split should succeed");
    assert!(!report.files.is_empty());
    for (i, f) in report.files.iter().enumerate() {
        assert!(f.path.is_file(), "missing {}", f.path.display());
        assert!(f.page_count >= 1);
        if i > 0 {
            assert!(f.start_page >= report.files[i - 1].start_page);
        }
    }
    let first = report.files[0].path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(first.starts_with("1. "), "got {first}");
}

#[tokio::test]
async fn test_split_without_outline_fails() {
    let src = e2e_skip_unless_ready!(test_cases_dir().join("no_outline.pdf"));
    let (_dir, pdf) = scratch_copy(&src);

    let err = split_pdf_by_toc(&pdf, 1).await.unwrap_err();
    assert!(matches!(err, DocPrepError::NoToc { .. }), "got: {err}");
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_text_engine() {
    let src = e2e_skip_unless_ready!(test_cases_dir().join("outlined.pdf"));
    let (dir, pdf) = scratch_copy(&src);

    let config = DescribeConfig::builder().build().unwrap();
    let out = pdf_to_markdown(&pdf, &ConvertOptions::default(), &config, progress::noop())
        .await
        .expect("text conversion needs no API key");

    assert_eq!(out.layout.markdown, dir.path().join("outlined.md"));
    let md = std::fs::read_to_string(&out.layout.markdown).unwrap();
    assert_markdown_quality(&md, "text engine");
    assert!(!md.contains(&dir.path().to_string_lossy().into_owned()), "absolute paths left in output");
    if out.image_count > 0 {
        assert!(md.contains("![](images/outlined.pdf-"));
        assert!(out.layout.images.is_dir());
    }
}

#[tokio::test]
async fn test_convert_vision_and_describe() {
    let src = e2e_skip_unless_ready!(test_cases_dir().join("outlined.pdf"));
    if std::env::var("OPENAI_API_KEY").is_err() {
        println!("SKIP: OPENAI_API_KEY not set");
        return;
    }
    let (_dir, pdf) = scratch_copy(&src);

    let options = ConvertOptions {
        engine: ConvertEngine::Vision,
        page_concurrency: 4,
        ..ConvertOptions::default()
    };
    let config = DescribeConfig::builder()
        .model(CaptionModel::Gpt)
        .concurrency(4)
        .build()
        .unwrap();
    let out = pdf_to_markdown(&pdf, &options, &config, progress::noop())
        .await
        .expect("vision conversion");
    let md = std::fs::read_to_string(&out.layout.markdown).unwrap();
    assert_markdown_quality(&md, "vision engine");

    let config = DescribeConfig {
        cache_path: Some(out.layout.cache.clone()),
        ..config
    };
    let report = ImageDescriber::new(config)
        .run(&out.layout.markdown)
        .await
        .expect("describe");
    assert_eq!(report.total, out.image_count);
    if report.described > 0 {
        assert!(out.layout.cache.is_file());
        assert!(report.backup_path.as_ref().is_some_and(|b| b.is_file()));
    }
}
