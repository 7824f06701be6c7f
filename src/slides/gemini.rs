//! Gemini `generateContent` client for image generation.
//!
//! The REST call lives behind [`ImageApi`] so the retry and key-rotation
//! loop in [`super::generate`] can run against a scripted fake.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// A reference image sent along with the prompt.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub references: Vec<ReferenceImage>,
    pub aspect_ratio: String,
    pub image_size: String,
}

impl ImageRequest {
    /// `TEXT` + `IMAGE` when references are attached, else `IMAGE` only.
    pub fn response_modalities(&self) -> &'static [&'static str] {
        if self.references.is_empty() {
            &["IMAGE"]
        } else {
            &["TEXT", "IMAGE"]
        }
    }

    /// JSON body: prompt first, then the reference images.
    pub fn to_body(&self) -> Value {
        let mut parts = vec![json!({ "text": self.prompt })];
        parts.extend(self.references.iter().map(|r| {
            json!({ "inline_data": { "mime_type": r.mime_type, "data": STANDARD.encode(&r.data) } })
        }));
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": self.response_modalities(),
                "imageConfig": {
                    "aspectRatio": self.aspect_ratio,
                    "imageSize": self.image_size,
                }
            }
        })
    }
}

/// What came back from a successful HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageResponse {
    /// No candidate carried any parts. `feedback` summarises why, when the API said.
    Empty { feedback: Option<String> },
    /// Parts were returned; `image` holds the first inline image, if any.
    Parts { image: Option<Vec<u8>> },
}

/// A failed call. `message` is matched against the quota and safety keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Rate-limit or quota exhaustion.
    pub fn is_quota(&self) -> bool {
        let m = self.message.to_lowercase();
        self.status == Some(429)
            || m.contains("quota")
            || m.contains("rate limit")
            || m.contains("rate_limit")
            || m.contains("resource_exhausted")
    }

    /// Request refused by the safety filter.
    pub fn is_safety(&self) -> bool {
        let m = self.message.to_lowercase();
        m.contains("blocked") || m.contains("safety")
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(s) => write!(f, "HTTP {s}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// An image-generation backend.
pub trait ImageApi: Send + Sync {
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a ImageRequest,
    ) -> BoxFuture<'a, Result<ImageResponse, ApiError>>;
}

/// [`ImageApi`] over the Gemini REST endpoint.
pub struct GeminiImageApi {
    client: Client,
    base_url: String,
}

impl GeminiImageApi {
    pub fn new(timeout: Duration) -> Result<Self, crate::error::DocPrepError> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, crate::error::DocPrepError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::DocPrepError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn call(&self, api_key: &str, request: &ImageRequest) -> Result<ImageResponse, ApiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            request.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request.to_body())
            .send()
            .await
            .map_err(|e| ApiError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::new(Some(status.as_u16()), text));
        }
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::new(None, format!("invalid response body: {e}")))?;
        parse_response(body)
    }
}

impl ImageApi for GeminiImageApi {
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a ImageRequest,
    ) -> BoxFuture<'a, Result<ImageResponse, ApiError>> {
        Box::pin(self.call(api_key, request))
    }
}

// ── Response shape ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(alias = "inline_data", rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct SafetyRating {
    category: Option<String>,
    #[serde(default)]
    blocked: bool,
}

fn parse_response(body: GenerateResponse) -> Result<ImageResponse, ApiError> {
    let parts: Vec<&Part> = body
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .collect();

    if parts.is_empty() {
        let mut notes = Vec::new();
        if let Some(fb) = body.prompt_feedback.as_ref().filter(|v| !v.is_null()) {
            notes.push(format!("Feedback: {fb}"));
        }
        for c in &body.candidates {
            if let Some(reason) = &c.finish_reason {
                notes.push(format!("Finish: {reason}"));
            }
            let blocked: Vec<&str> = c
                .safety_ratings
                .iter()
                .filter(|r| r.blocked)
                .filter_map(|r| r.category.as_deref())
                .collect();
            if !blocked.is_empty() {
                notes.push(format!("Blocked by: {}", blocked.join(", ")));
            }
        }
        debug!("Empty image response: {:?}", notes);
        return Ok(ImageResponse::Empty {
            feedback: (!notes.is_empty()).then(|| notes.join(" | ")),
        });
    }

    let Some(inline) = parts.iter().find_map(|p| p.inline_data.as_ref()) else {
        return Ok(ImageResponse::Parts { image: None });
    };
    let bytes = STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| ApiError::new(None, format!("invalid inline image data: {e}")))?;
    Ok(ImageResponse::Parts { image: Some(bytes) })
}
