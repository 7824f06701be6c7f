//! Configuration types for captioning and slide generation.
//!
//! Behaviour is controlled through [`DescribeConfig`] and [`SlideConfig`],
//! each built via a builder with documented defaults. The two captioning
//! tools (PDF describer and wiki converter) historically ran with different
//! models and context sizes, so [`DescribeConfig`] offers one preset per tool.

use crate::error::DocPrepError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ── Caption model ────────────────────────────────────────────────────────

/// Which vision model family writes the captions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionModel {
    /// OpenAI chat completions (`OPENAI_API_KEY`, `OPENAI_MODEL`).
    #[default]
    Gpt,
    /// Google Gemini (`GOOGLE_API_KEY` / `GEMINI_API_KEY`, `GOOGLE_MODEL`).
    Gemini,
}

impl CaptionModel {
    /// edgequake-llm provider name.
    pub fn provider_name(self) -> &'static str {
        match self {
            CaptionModel::Gpt => "openai",
            CaptionModel::Gemini => "gemini",
        }
    }

    /// Environment variable that overrides the model name.
    pub fn model_env_var(self) -> &'static str {
        match self {
            CaptionModel::Gpt => "OPENAI_MODEL",
            CaptionModel::Gemini => "GOOGLE_MODEL",
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            CaptionModel::Gpt => "OPENAI_API_KEY",
            CaptionModel::Gemini => "GOOGLE_API_KEY",
        }
    }
}

impl fmt::Display for CaptionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptionModel::Gpt => "gpt",
            CaptionModel::Gemini => "gemini",
        })
    }
}

impl std::str::FromStr for CaptionModel {
    type Err = DocPrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpt" | "openai" => Ok(CaptionModel::Gpt),
            "gemini" | "google" => Ok(CaptionModel::Gemini),
            other => Err(DocPrepError::InvalidConfig(format!(
                "unknown model '{other}' (expected gpt or gemini)"
            ))),
        }
    }
}

/// Default model names for one tool, per model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDefaults {
    pub gpt: &'static str,
    pub gemini: &'static str,
}

/// Models used by the PDF describer.
pub const BOOK_MODELS: ModelDefaults = ModelDefaults {
    gpt: "gpt-4.1-mini",
    gemini: "gemini-3-pro-preview",
};

/// Models used by the wiki converter.
pub const WIKI_MODELS: ModelDefaults = ModelDefaults {
    gpt: "gpt-5-mini",
    gemini: "gemini-3-flash-preview",
};

// ── Describe config ──────────────────────────────────────────────────────

/// Configuration for image captioning.
///
/// Built via [`DescribeConfig::builder()`] (PDF describer defaults) or
/// [`DescribeConfig::wiki_builder()`] (wiki converter defaults).
#[derive(Clone)]
pub struct DescribeConfig {
    /// Model family. Default: [`CaptionModel::Gpt`].
    pub model: CaptionModel,

    /// Explicit model name. If None, the family's env override or the preset
    /// default is used (see [`DescribeConfig::resolved_model_name`]).
    pub model_name: Option<String>,

    /// Preset default model names.
    pub model_defaults: ModelDefaults,

    /// Pre-constructed LLM provider. Takes precedence over `model`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Maximum number of captions in flight. Default: 20.
    pub concurrency: usize,

    /// Characters of surrounding text sent as context on each side.
    /// Default: 1111 (PDF describer) / 500 (wiki converter).
    pub context_chars: usize,

    /// Attempts per caption, including the first. Default: 3.
    pub max_retries: u32,

    /// Fixed pause between attempts. Default: 1 s.
    pub retry_delay: Duration,

    /// Maximum completion tokens per caption. Default: 4096.
    pub max_tokens: usize,

    /// Caption prompt template file. None → built-in template.
    pub prompt_file: Option<PathBuf>,

    /// Caption cache file. None → no caching.
    pub cache_path: Option<PathBuf>,

    /// Write `<file name>.backup` before rewriting. Default: true.
    pub backup: bool,
}

impl Default for DescribeConfig {
    fn default() -> Self {
        Self {
            model: CaptionModel::default(),
            model_name: None,
            model_defaults: BOOK_MODELS,
            provider: None,
            concurrency: 20,
            context_chars: 1111,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_tokens: 4096,
            prompt_file: None,
            cache_path: None,
            backup: true,
        }
    }
}

impl fmt::Debug for DescribeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescribeConfig")
            .field("model", &self.model)
            .field("model_name", &self.model_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("concurrency", &self.concurrency)
            .field("context_chars", &self.context_chars)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("prompt_file", &self.prompt_file)
            .field("cache_path", &self.cache_path)
            .field("backup", &self.backup)
            .finish()
    }
}

impl DescribeConfig {
    /// Builder with PDF describer defaults.
    pub fn builder() -> DescribeConfigBuilder {
        DescribeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder with wiki converter defaults: 500 context chars, wiki models.
    pub fn wiki_builder() -> DescribeConfigBuilder {
        DescribeConfigBuilder {
            config: Self {
                context_chars: 500,
                model_defaults: WIKI_MODELS,
                backup: false,
                ..Self::default()
            },
        }
    }

    /// Model name actually sent to the provider: explicit name, then the
    /// family's env variable, then the preset default.
    pub fn resolved_model_name(&self) -> String {
        if let Some(name) = &self.model_name {
            return name.clone();
        }
        std::env::var(self.model.model_env_var())
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                match self.model {
                    CaptionModel::Gpt => self.model_defaults.gpt,
                    CaptionModel::Gemini => self.model_defaults.gemini,
                }
                .to_string()
            })
    }
}

/// Builder for [`DescribeConfig`].
#[derive(Debug)]
pub struct DescribeConfigBuilder {
    config: DescribeConfig,
}

impl DescribeConfigBuilder {
    pub fn model(mut self, model: CaptionModel) -> Self {
        self.config.model = model;
        self
    }

    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn context_chars(mut self, n: usize) -> Self {
        self.config.context_chars = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay(mut self, d: Duration) -> Self {
        self.config.retry_delay = d;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.prompt_file = Some(path.into());
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = Some(path.into());
        self
    }

    pub fn backup(mut self, v: bool) -> Self {
        self.config.backup = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DescribeConfig, DocPrepError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(DocPrepError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(DocPrepError::InvalidConfig(
                "max_retries must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── PDF → Markdown ───────────────────────────────────────────────────────

/// How page content is turned into Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvertEngine {
    /// pdfium text extraction. No API calls. (default)
    #[default]
    Text,
    /// Each page is rendered and transcribed by the vision model.
    Vision,
}

impl std::str::FromStr for ConvertEngine {
    type Err = DocPrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ConvertEngine::Text),
            "vision" => Ok(ConvertEngine::Vision),
            other => Err(DocPrepError::InvalidConfig(format!(
                "unknown engine '{other}' (expected text or vision)"
            ))),
        }
    }
}

/// Options for [`crate::convert::pdf_to_markdown`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub engine: ConvertEngine,
    /// Longest edge of rendered pages for the vision engine. Default: 2000.
    pub max_rendered_pixels: u32,
    /// Concurrent page requests for the vision engine. Default: 10.
    pub page_concurrency: usize,
    /// Retries per page for the vision engine. Default: 3.
    pub page_retries: u32,
    /// Initial backoff for page retries, doubled per attempt. Default: 500 ms.
    pub retry_backoff_ms: u64,
    /// Sampling temperature for page transcription. Default: 0.1.
    pub temperature: f32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            engine: ConvertEngine::Text,
            max_rendered_pixels: 2000,
            page_concurrency: 10,
            page_retries: 3,
            retry_backoff_ms: 500,
            temperature: 0.1,
        }
    }
}

// ── Slides ───────────────────────────────────────────────────────────────

/// Configuration for slide image generation.
#[derive(Debug, Clone)]
pub struct SlideConfig {
    /// Image model. Default: `gemini-3-pro-image-preview`.
    pub model: String,
    /// Default: `16:9`.
    pub aspect_ratio: String,
    /// Default: `2K`.
    pub image_size: String,
    /// Attempts per slide. Default: 10.
    pub max_retries: u32,
    /// Pause after a failed attempt or when every key is rate limited. Default: 5 s.
    pub retry_delay: Duration,
    /// Empty responses tolerated per slide. Default: 5.
    pub empty_response_retries: u32,
    /// Pause after an empty response. Default: 3 s.
    pub empty_response_delay: Duration,
    /// Concurrent slides within a batch. Default: 20.
    pub max_workers: usize,
    /// Slides per batch. Default: 20.
    pub batch_size: usize,
    /// Pause between batches. Default: 30 s.
    pub batch_delay: Duration,
    /// Override the output directory. None → `<json dir>/<json stem>_images`.
    pub output_dir: Option<PathBuf>,
}

impl Default for SlideConfig {
    fn default() -> Self {
        Self {
            model: "gemini-3-pro-image-preview".into(),
            aspect_ratio: "16:9".into(),
            image_size: "2K".into(),
            max_retries: 10,
            retry_delay: Duration::from_secs(5),
            empty_response_retries: 5,
            empty_response_delay: Duration::from_secs(3),
            max_workers: 20,
            batch_size: 20,
            batch_delay: Duration::from_secs(30),
            output_dir: None,
        }
    }
}

impl SlideConfig {
    pub fn builder() -> SlideConfigBuilder {
        SlideConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SlideConfig`].
#[derive(Debug)]
pub struct SlideConfigBuilder {
    config: SlideConfig,
}

impl SlideConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn aspect_ratio(mut self, v: impl Into<String>) -> Self {
        self.config.aspect_ratio = v.into();
        self
    }

    pub fn image_size(mut self, v: impl Into<String>) -> Self {
        self.config.image_size = v.into();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay(mut self, d: Duration) -> Self {
        self.config.retry_delay = d;
        self
    }

    pub fn empty_response_retries(mut self, n: u32) -> Self {
        self.config.empty_response_retries = n;
        self
    }

    pub fn empty_response_delay(mut self, d: Duration) -> Self {
        self.config.empty_response_delay = d;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn batch_delay(mut self, d: Duration) -> Self {
        self.config.batch_delay = d;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SlideConfig, DocPrepError> {
        let c = &self.config;
        if c.max_workers == 0 || c.batch_size == 0 {
            return Err(DocPrepError::InvalidConfig(
                "max_workers and batch_size must be ≥ 1".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(DocPrepError::InvalidConfig(
                "max_retries must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_defaults() {
        let c = DescribeConfig::builder().build().unwrap();
        assert_eq!(c.concurrency, 20);
        assert_eq!(c.context_chars, 1111);
        assert_eq!(c.max_retries, 3);
        assert!(c.backup);
    }

    #[test]
    fn wiki_preset() {
        let c = DescribeConfig::wiki_builder().build().unwrap();
        assert_eq!(c.context_chars, 500);
        assert_eq!(c.model_defaults, WIKI_MODELS);
    }

    #[test]
    fn zero_concurrency_rejected() {
        assert!(DescribeConfig::builder().concurrency(0).build().is_err());
    }

    #[test]
    fn explicit_model_name_wins() {
        let c = DescribeConfig::builder()
            .model(CaptionModel::Gemini)
            .model_name("my-model")
            .build()
            .unwrap();
        assert_eq!(c.resolved_model_name(), "my-model");
    }

    #[test]
    fn caption_model_parsing() {
        assert_eq!("GPT".parse::<CaptionModel>().unwrap(), CaptionModel::Gpt);
        assert_eq!("gemini".parse::<CaptionModel>().unwrap(), CaptionModel::Gemini);
        assert!("claude".parse::<CaptionModel>().is_err());
        assert_eq!(CaptionModel::Gemini.provider_name(), "gemini");
    }

    #[test]
    fn engine_parsing() {
        assert_eq!("vision".parse::<ConvertEngine>().unwrap(), ConvertEngine::Vision);
        assert!("ocr".parse::<ConvertEngine>().is_err());
    }

    #[test]
    fn slide_defaults() {
        let c = SlideConfig::builder().build().unwrap();
        assert_eq!(c.model, "gemini-3-pro-image-preview");
        assert_eq!(c.aspect_ratio, "16:9");
        assert_eq!(c.image_size, "2K");
        assert_eq!(c.max_retries, 10);
        assert_eq!(c.batch_size, 20);
        assert_eq!(c.batch_delay, Duration::from_secs(30));
    }

    #[test]
    fn slide_zero_batch_rejected() {
        assert!(SlideConfig::builder().batch_size(0).build().is_err());
    }
}
