//! Vision-model calls: image captions and page transcription.
//!
//! Both functions are thin wrappers around `LLMProvider::chat` that own the
//! retry loop. Prompt text lives in [`crate::prompts`].
//!
//! ## Retry strategies
//!
//! Captions retry a fixed number of times with a fixed pause: the caption
//! calls are short and the wiki tool already bounds in-flight requests.
//! Page transcription retries with exponential backoff
//! (`retry_backoff_ms * 2^attempt`) since it runs at higher concurrency and
//! is the usual source of 429s.

use crate::error::{truncate_message, ItemError};
use crate::pipeline::encode::encode_file;
use crate::prompts::PAGE_CONVERSION_PROMPT;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Ask the model for a caption of one image.
///
/// Sends a single user message holding `prompt` and the image. Makes up to
/// `max_attempts` calls with `retry_delay` between them.
///
/// Returns the trimmed response text, [`ItemError::EmptyDescription`] when
/// the model answered with nothing, or [`ItemError::LlmFailed`] once every
/// attempt has errored.
pub async fn describe_image(
    provider: &Arc<dyn LLMProvider>,
    prompt: &str,
    image: ImageData,
    max_tokens: usize,
    max_attempts: u32,
    retry_delay: Duration,
) -> Result<String, ItemError> {
    let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];
    let options = CompletionOptions {
        max_tokens: Some(max_tokens),
        ..Default::default()
    };

    let attempts = max_attempts.max(1);
    let mut last_err = String::new();

    for attempt in 1..=attempts {
        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                let text = response.content.trim();
                if text.is_empty() {
                    return Err(ItemError::EmptyDescription);
                }
                debug!(
                    "Caption: {} input tokens, {} output tokens",
                    response.prompt_tokens, response.completion_tokens
                );
                return Ok(text.to_string());
            }
            Err(e) => {
                last_err = truncate_message(&e.to_string(), 200);
                if attempt < attempts {
                    warn!("Retry {}/{}: {}", attempt, attempts, last_err);
                    sleep(retry_delay).await;
                }
            }
        }
    }

    Err(ItemError::LlmFailed {
        attempts,
        detail: last_err,
    })
}

/// Something that turns (prompt, image file) into a caption.
///
/// The describer and the wiki converter only talk to this trait, so their
/// scheduling and rewrite logic can run against a fake in tests.
pub trait Captioner: Send + Sync {
    fn caption<'a>(
        &'a self,
        prompt: &'a str,
        image_path: &'a Path,
    ) -> BoxFuture<'a, Result<String, ItemError>>;

    /// Model name recorded in cache entries.
    fn model_name(&self) -> &str;
}

/// [`Captioner`] backed by an edgequake-llm provider.
pub struct LlmCaptioner {
    provider: Arc<dyn LLMProvider>,
    model_name: String,
    max_tokens: usize,
    max_attempts: u32,
    retry_delay: Duration,
}

impl LlmCaptioner {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model_name: impl Into<String>,
        max_tokens: usize,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            max_tokens,
            max_attempts,
            retry_delay,
        }
    }
}

impl Captioner for LlmCaptioner {
    fn caption<'a>(
        &'a self,
        prompt: &'a str,
        image_path: &'a Path,
    ) -> BoxFuture<'a, Result<String, ItemError>> {
        Box::pin(async move {
            let image = encode_file(image_path)
                .await
                .map_err(|e| ItemError::Unreadable {
                    path: image_path.display().to_string(),
                    detail: e.to_string(),
                })?;
            describe_image(
                &self.provider,
                prompt,
                image,
                self.max_tokens,
                self.max_attempts,
                self.retry_delay,
            )
            .await
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Result of transcribing one rendered page.
#[derive(Debug, Clone)]
pub struct PageTranscript {
    /// 0-based page index.
    pub index: usize,
    pub markdown: String,
    pub duration_ms: u64,
    pub error: Option<ItemError>,
}

/// Transcribe one rendered page into Markdown.
///
/// Never returns an error: a failed page carries `error` and empty Markdown
/// so the rest of the document still converts.
pub async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    index: usize,
    image: ImageData,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> PageTranscript {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(PAGE_CONVERSION_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    };

    let mut last_err: Option<String> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                index + 1,
                attempt,
                max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                let duration = start.elapsed();
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    index + 1,
                    response.prompt_tokens,
                    response.completion_tokens,
                    duration
                );
                return PageTranscript {
                    index,
                    markdown: response.content,
                    duration_ms: duration.as_millis() as u64,
                    error: None,
                };
            }
            Err(e) => {
                let msg = e.to_string();
                warn!("Page {}: attempt {} failed: {}", index + 1, attempt + 1, msg);
                last_err = Some(msg);
            }
        }
    }

    PageTranscript {
        index,
        markdown: String::new(),
        duration_ms: start.elapsed().as_millis() as u64,
        error: Some(ItemError::LlmFailed {
            attempts: max_retries + 1,
            detail: truncate_message(&last_err.unwrap_or_else(|| "Unknown error".into()), 200),
        }),
    }
}
