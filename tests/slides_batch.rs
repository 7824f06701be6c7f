//! Slide generation against a scripted image API.

use docprep::error::ItemError;
use docprep::slides::{
    generate_slide_image, ApiError, ImageApi, ImageRequest, ImageResponse, KeyRing, SlideDeck, SlideGenerator,
};
use docprep::SlideConfig;
use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Scripted = Result<ImageResponse, ApiError>;

/// Replies from a per-prompt script, then with a valid PNG once the script
/// runs out. Records `(api key, prompt, reference count)` for every call.
#[derive(Default)]
struct FakeImageApi {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, String, usize)>>,
}

impl FakeImageApi {
    fn script(self, prompt: &str, replies: Vec<Scripted>) -> Self {
        self.scripts.lock().unwrap().insert(prompt.to_string(), replies.into());
        self
    }

    fn keys_used(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(k, _, _)| k.clone()).collect()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ImageApi for FakeImageApi {
    fn generate<'a>(&'a self, api_key: &'a str, request: &'a ImageRequest) -> BoxFuture<'a, Scripted> {
        Box::pin(async move {
            self.calls.lock().unwrap().push((
                api_key.to_string(),
                request.prompt.clone(),
                request.references.len(),
            ));
            let next = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&request.prompt)
                .and_then(|q| q.pop_front());
            next.unwrap_or_else(|| Ok(ImageResponse::Parts { image: Some(png_bytes()) }))
        })
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 3, image::Rgb([200, 10, 10])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
    buf
}

fn fast_config() -> SlideConfig {
    SlideConfig::builder()
        .max_retries(3)
        .retry_delay(Duration::from_millis(1))
        .empty_response_retries(2)
        .empty_response_delay(Duration::from_millis(1))
        .batch_delay(Duration::from_millis(1))
        .build()
        .unwrap()
}

fn request(prompt: &str) -> ImageRequest {
    ImageRequest {
        model: "test-model".into(),
        prompt: prompt.into(),
        references: Vec::new(),
        aspect_ratio: "16:9".into(),
        image_size: "2K".into(),
    }
}

fn keys(n: usize) -> KeyRing {
    KeyRing::new((0..n).map(|i| format!("key{i}")).collect()).unwrap()
}

fn quota() -> Scripted {
    Err(ApiError::new(Some(429), "RESOURCE_EXHAUSTED: quota exceeded"))
}

#[tokio::test]
async fn quota_error_rotates_to_next_key() {
    let api = FakeImageApi::default().script("p", vec![quota()]);
    let ring = keys(2);
    let mut idx = ring.current();
    let bytes = generate_slide_image(&api, &ring, &request("p"), &fast_config(), &mut idx)
        .await
        .unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(api.keys_used(), vec!["key0", "key1"]);
    assert_eq!(idx, 1);
    assert_eq!(ring.current(), 1);
}

#[tokio::test]
async fn exhausted_keys_start_a_new_cycle() {
    let api = FakeImageApi::default().script("p", vec![quota(), quota()]);
    let ring = keys(2);
    let mut idx = 0;
    generate_slide_image(&api, &ring, &request("p"), &fast_config(), &mut idx)
        .await
        .unwrap();
    assert_eq!(api.keys_used(), vec!["key0", "key1", "key0"]);
    assert_eq!(idx, 0);
}

#[tokio::test]
async fn quota_with_one_key_waits_and_retries_same_key() {
    let api = FakeImageApi::default().script("p", vec![quota()]);
    let ring = keys(1);
    let mut idx = 0;
    generate_slide_image(&api, &ring, &request("p"), &fast_config(), &mut idx)
        .await
        .unwrap();
    assert_eq!(api.keys_used(), vec!["key0", "key0"]);
}

#[tokio::test]
async fn safety_block_is_not_retried() {
    let api = FakeImageApi::default().script(
        "p",
        vec![Err(ApiError::new(Some(400), "Request blocked by safety settings"))],
    );
    let mut idx = 0;
    let err = generate_slide_image(&api, &keys(1), &request("p"), &fast_config(), &mut idx)
        .await
        .unwrap_err();
    assert!(matches!(err, ItemError::SafetyFilter(_)), "got {err:?}");
    assert_eq!(api.call_count(), 1);
}

#[tokio::test]
async fn empty_responses_give_up_at_the_limit() {
    let empty = || {
        Ok(ImageResponse::Empty {
            feedback: Some("Finish: OTHER".into()),
        })
    };
    let api = FakeImageApi::default().script("p", vec![empty(), empty(), empty()]);
    let mut idx = 0;
    let err = generate_slide_image(&api, &keys(1), &request("p"), &fast_config(), &mut idx)
        .await
        .unwrap_err();
    assert_eq!(err, ItemError::EmptyResponse("Finish: OTHER".into()));
    assert_eq!(api.call_count(), 2);
}

#[tokio::test]
async fn one_empty_response_is_retried() {
    let api = FakeImageApi::default().script("p", vec![Ok(ImageResponse::Empty { feedback: None })]);
    let mut idx = 0;
    assert!(generate_slide_image(&api, &keys(1), &request("p"), &fast_config(), &mut idx)
        .await
        .is_ok());
    assert_eq!(api.call_count(), 2);
}

#[tokio::test]
async fn parts_without_image_fail_immediately() {
    let api = FakeImageApi::default().script("p", vec![Ok(ImageResponse::Parts { image: None })]);
    let mut idx = 0;
    let err = generate_slide_image(&api, &keys(1), &request("p"), &fast_config(), &mut idx)
        .await
        .unwrap_err();
    assert_eq!(err, ItemError::NoImage);
    assert_eq!(api.call_count(), 1);
}

#[tokio::test]
async fn generic_errors_stop_at_max_retries() {
    let boom = || Err(ApiError::new(Some(500), "internal error"));
    let api = FakeImageApi::default().script("p", vec![boom(), boom(), boom(), boom()]);
    let mut idx = 0;
    let err = generate_slide_image(&api, &keys(1), &request("p"), &fast_config(), &mut idx)
        .await
        .unwrap_err();
    assert!(matches!(err, ItemError::MaxRetriesExceeded(ref m) if m.contains("internal error")), "got {err:?}");
    assert_eq!(api.call_count(), 3);
}

const DECK: &str = r#"{
  "reference_images": ["style.png"],
  "slides": [
    { "page": 1, "title": "Opening", "nano_banana_prompt": "draw the opening" },
    { "page": 2, "title": "Blank" },
    { "page": 3, "title": "Risky", "nano_banana_prompt": "draw something risky",
      "reference_images": ["local.png"] }
  ]
}"#;

fn deck_dir() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("style.png"), png_bytes()).unwrap();
    std::fs::write(dir.path().join("local.png"), png_bytes()).unwrap();
    let json = dir.path().join("deck.json");
    std::fs::write(&json, DECK).unwrap();
    (dir, json)
}

#[tokio::test]
async fn run_writes_pngs_and_collects_failures() {
    let (dir, json) = deck_dir();
    let deck = SlideDeck::load(&json).await.unwrap();
    let api = Arc::new(FakeImageApi::default().script(
        "draw something risky",
        vec![Err(ApiError::new(None, "Prompt BLOCKED: SAFETY"))],
    ));

    let config = SlideConfig {
        batch_size: 2,
        ..fast_config()
    };
    let run = SlideGenerator::new(api.clone(), keys(1), config)
        .run(&deck, &json, None)
        .await
        .unwrap();

    assert_eq!(run.output_dir, dir.path().join("deck_images"));
    assert_eq!(run.success_count, 1);
    assert_eq!(run.failure_count, 2);
    assert_eq!(run.failed_pages, vec![2, 3]);
    assert_eq!(run.failures[0].reason, "NO_PROMPT");
    assert!(run.failures[1].reason.starts_with("SAFETY_FILTER"));

    let slide = run.output_dir.join("slide_001.png");
    let decoded = image::open(&slide).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (4, 3));
    assert!(!run.output_dir.join("slide_003.png").exists());

    let calls = api.calls.lock().unwrap();
    let refs: HashMap<&str, usize> = calls.iter().map(|(_, p, n)| (p.as_str(), *n)).collect();
    assert_eq!(refs["draw the opening"], 1);
    assert_eq!(refs["draw something risky"], 2);

    let report = run.failure_report(&json);
    assert_eq!(report.total_processed, 3);
    let framed = report.framed().unwrap();
    assert!(framed.contains("\"failed_slides\""));
}

#[tokio::test]
async fn run_honours_selection_and_output_override() {
    let (dir, json) = deck_dir();
    let deck = SlideDeck::load(&json).await.unwrap();
    let api = Arc::new(FakeImageApi::default());
    let out = dir.path().join("custom");

    let config = SlideConfig {
        output_dir: Some(out.clone()),
        ..fast_config()
    };
    let targets: BTreeSet<u32> = [1].into_iter().collect();
    let run = SlideGenerator::new(api.clone(), keys(1), config)
        .run(&deck, &json, Some(&targets))
        .await
        .unwrap();

    assert_eq!(run.total(), 1);
    assert_eq!(run.success_count, 1);
    assert!(out.join("slide_001.png").is_file());
    assert_eq!(api.call_count(), 1);
}
