//! Describer runs against a scripted captioner: outcome accounting, backup,
//! cache reuse without any provider.

use docprep::error::ItemError;
use docprep::{Captioner, DescribeConfig, ImageDescriber};
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Captions `x.png` as "caption for x.png"; fails for names containing "bad".
#[derive(Default)]
struct FakeCaptioner {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Captioner for FakeCaptioner {
    fn caption<'a>(&'a self, prompt: &'a str, image_path: &'a Path) -> BoxFuture<'a, Result<String, ItemError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let name = image_path.file_name().unwrap().to_string_lossy().into_owned();
            if name.contains("bad") {
                return Err(ItemError::LlmFailed {
                    attempts: 3,
                    detail: "server said no".into(),
                });
            }
            Ok(format!("caption for\n{name}"))
        })
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}

/// Records the peak number of captions in flight.
#[derive(Default)]
struct CountingCaptioner {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Captioner for CountingCaptioner {
    fn caption<'a>(&'a self, _prompt: &'a str, image_path: &'a Path) -> BoxFuture<'a, Result<String, ItemError>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("caption {}", image_path.file_stem().unwrap().to_string_lossy()))
        })
    }

    fn model_name(&self) -> &str {
        "counting"
    }
}

const DOC: &str = "# Chapter\n\nIntro text.\n\n![](images/a.png)\n\nMiddle.\n\n![old](images/bad.png)\n\n![](images/missing.png)\n\nEnd.\n";

fn write_fixture(dir: &Path, doc: &str) -> std::path::PathBuf {
    std::fs::create_dir_all(dir.join("images")).unwrap();
    std::fs::write(dir.join("images/a.png"), b"png").unwrap();
    std::fs::write(dir.join("images/bad.png"), b"png").unwrap();
    let md = dir.join("book.md");
    std::fs::write(&md, doc).unwrap();
    md
}

#[tokio::test]
async fn outcomes_are_counted_and_only_successes_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let md = write_fixture(dir.path(), DOC);
    let cache = dir.path().join("image-cache_book.json");

    let fake = Arc::new(FakeCaptioner::default());
    let config = DescribeConfig::builder()
        .cache_path(&cache)
        .concurrency(2)
        .build()
        .unwrap();
    let report = ImageDescriber::new(config)
        .with_captioner(fake.clone())
        .run(&md)
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.described, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.cached, 0);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 2);

    let out = std::fs::read_to_string(&md).unwrap();
    assert!(out.contains("![caption for a.png](images/a.png)"), "got:\n{out}");
    assert!(out.contains("![old](images/bad.png)"), "failed caption must not touch the link");
    assert!(out.contains("![](images/missing.png)"));

    let backup = dir.path().join("book.md.backup");
    assert_eq!(std::fs::read_to_string(backup).unwrap(), DOC);

    let cached: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&cache).unwrap()).unwrap();
    let entries = cached.as_object().unwrap();
    assert_eq!(entries.len(), 1, "failures are never cached");
    let entry = entries.values().next().unwrap();
    assert_eq!(entry["description"], "caption for a.png");
    assert_eq!(entry["model"], "fake-model");
}

#[tokio::test]
async fn prompt_carries_surrounding_text() {
    let dir = tempfile::tempdir().unwrap();
    let md = write_fixture(dir.path(), "Before the figure.\n\n![](images/a.png)\n\nAfter the figure.\n");

    let fake = Arc::new(FakeCaptioner::default());
    let config = DescribeConfig::builder().build().unwrap();
    ImageDescriber::new(config)
        .with_captioner(fake.clone())
        .run(&md)
        .await
        .unwrap();

    let prompts = fake.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Before the figure."));
    assert!(prompts[0].contains("After the figure."));
}

#[test]
fn cached_run_needs_no_provider() {
    tokio_test::block_on(async {
        let doc = "Text.\n\n![](images/a.png)\n\n![](images/missing.png)\n";
        let dir = tempfile::tempdir().unwrap();
        let md = write_fixture(dir.path(), doc);
        let cache = dir.path().join("image-cache_book.json");
        let config = DescribeConfig::builder().cache_path(&cache).build().unwrap();

        let first = ImageDescriber::new(config.clone())
            .with_captioner(Arc::new(FakeCaptioner::default()))
            .run(&md)
            .await
            .unwrap();
        assert_eq!(first.described, 1);

        // Same document again; no captioner and no provider configured.
        std::fs::write(&md, doc).unwrap();
        let second = ImageDescriber::new(config).run(&md).await.unwrap();
        assert_eq!(second.cached, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.described, 0);
        assert!(std::fs::read_to_string(&md)
            .unwrap()
            .contains("![caption for a.png](images/a.png)"));
    });
}

#[tokio::test]
async fn document_without_images_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let md = dir.path().join("plain.md");
    std::fs::write(&md, "just text\n").unwrap();

    let report = ImageDescriber::new(DescribeConfig::builder().build().unwrap())
        .run(&md)
        .await
        .unwrap();
    assert_eq!(report.total, 0);
    assert!(!dir.path().join("plain.md.backup").exists());
}

#[tokio::test]
async fn concurrency_limit_holds() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("images")).unwrap();
    let mut doc = String::new();
    for i in 0..6 {
        std::fs::write(dir.path().join(format!("images/p{i}.png")), b"png").unwrap();
        doc.push_str(&format!("Page {i}\n\n![](images/p{i}.png)\n\n"));
    }
    let md = dir.path().join("book.md");
    std::fs::write(&md, &doc).unwrap();

    let counting = Arc::new(CountingCaptioner::default());
    let config = DescribeConfig::builder().concurrency(2).build().unwrap();
    let report = ImageDescriber::new(config)
        .with_captioner(counting.clone())
        .run(&md)
        .await
        .unwrap();

    assert_eq!(report.described, 6);
    let peak = counting.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak in-flight {peak}");
    let out = std::fs::read_to_string(&md).unwrap();
    for i in 0..6 {
        assert!(out.contains(&format!("![caption p{i}](images/p{i}.png)")));
    }
}

#[tokio::test]
async fn cache_holds_every_caption_after_a_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("images")).unwrap();
    let mut doc = String::new();
    for i in 0..5 {
        std::fs::write(dir.path().join(format!("images/p{i}.png")), b"png").unwrap();
        doc.push_str(&format!("Page {i}\n\n![](images/p{i}.png)\n\n"));
    }
    let md = dir.path().join("book.md");
    std::fs::write(&md, &doc).unwrap();
    let cache = dir.path().join("image-cache_book.json");
    let config = DescribeConfig::builder().cache_path(&cache).concurrency(3).build().unwrap();

    let first = ImageDescriber::new(config.clone())
        .with_captioner(Arc::new(CountingCaptioner::default()))
        .run(&md)
        .await
        .unwrap();
    assert_eq!(first.described, 5);

    let cached: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&cache).unwrap()).unwrap();
    let mut captions: Vec<String> = cached
        .as_object()
        .unwrap()
        .values()
        .map(|e| e["description"].as_str().unwrap().to_string())
        .collect();
    captions.sort();
    assert_eq!(captions, (0..5).map(|i| format!("caption p{i}")).collect::<Vec<_>>());

    std::fs::write(&md, &doc).unwrap();
    let second = ImageDescriber::new(config).run(&md).await.unwrap();
    assert_eq!(second.cached, 5);
    assert_eq!(second.described, 0);
}
