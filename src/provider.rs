//! Vision provider resolution for captioning and page transcription.

use crate::config::{CaptionModel, DescribeConfig};
use crate::error::DocPrepError;
use crate::pipeline::llm::{Captioner, LlmCaptioner};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::info;

/// Instantiate a named provider with the given model.
pub fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DocPrepError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocPrepError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider for a caption run.
///
/// 1. A pre-built provider in `config.provider` is used as is.
/// 2. Otherwise the model family's API key must be present, and the provider
///    is created for [`DescribeConfig::resolved_model_name`].
pub fn resolve_provider(config: &DescribeConfig) -> Result<Arc<dyn LLMProvider>, DocPrepError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let key_present = match config.model {
        CaptionModel::Gpt => std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.trim().is_empty()),
        CaptionModel::Gemini => crate::env::google_api_key().is_some(),
    };
    if !key_present {
        return Err(DocPrepError::ProviderNotConfigured {
            provider: config.model.provider_name().to_string(),
            hint: match config.model {
                CaptionModel::Gpt => "Set OPENAI_API_KEY in the environment or a .env file.".into(),
                CaptionModel::Gemini => {
                    "Set GOOGLE_API_KEY (or GEMINI_API_KEY) in the environment or a .env file."
                        .into()
                }
            },
        });
    }

    let model = config.resolved_model_name();
    info!("LLM: {} ({})", model, config.model);
    create_vision_provider(config.model.provider_name(), &model)
}

/// Resolve a [`Captioner`] backed by [`resolve_provider`].
pub fn resolve_captioner(config: &DescribeConfig) -> Result<Arc<dyn Captioner>, DocPrepError> {
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmCaptioner::new(
        provider,
        config.resolved_model_name(),
        config.max_tokens,
        config.max_retries,
        config.retry_delay,
    )))
}
