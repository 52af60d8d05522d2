//! HTTP client for the Gemini `generateContent` REST API.
//!
//! Text goes in and out as plain parts; images travel as base64 inline data
//! in both directions. The base URL is injectable so tests can point the
//! client at a mock server.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GenerationError, GenerativeModel, ImageAttachment};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    #[serde(rename_all = "camelCase")]
    InlineData { mime_type: String, data: String },
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[allow(dead_code)]
    mime_type: Option<String>,
    data: String,
}

/// Client for the Gemini generation API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    /// Create a client against the production endpoint.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client cannot be constructed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against a custom endpoint (used by tests).
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client cannot be constructed.
    #[must_use]
    pub fn with_base_url(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self { client, base_url }
    }

    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{model}:generateContent?key={api_key}",
            self.base_url
        );

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            warn!(model, "Generation API rate limited");
            return Err(GenerationError::RateLimited);
        }
        if status.as_u16() == 404 {
            return Err(GenerationError::ModelUnavailable(model.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Some deployments report a missing model as a 400 with a
            // NOT_FOUND status in the error body.
            if body.contains("NOT_FOUND") || body.contains("is not found") {
                return Err(GenerationError::ModelUnavailable(model.to_string()));
            }
            debug!(model, status = status.as_u16(), body = %truncate(&body, 300), "Generation API error");
            return Err(GenerationError::Status(status.as_u16()));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate_text(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part::Text(prompt.to_string())],
            }],
            generation_config: None,
        };

        let response = self.generate(api_key, model, &request).await?;
        let text: String = response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenerationError::Parse(
                "response contained no text parts".to_string(),
            ));
        }
        Ok(text)
    }

    async fn generate_image(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        reference: Option<&ImageAttachment>,
    ) -> Result<Vec<u8>, GenerationError> {
        let mut parts = vec![Part::Text(prompt.to_string())];
        if let Some(attachment) = reference {
            parts.push(Part::InlineData {
                mime_type: attachment.mime_type.clone(),
                data: BASE64.encode(&attachment.data),
            });
        }

        let request = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            }),
        };

        let response = self.generate(api_key, model, &request).await?;
        let inline = response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.iter().find_map(|p| p.inline_data.as_ref()))
            .ok_or_else(|| {
                GenerationError::Parse("response contained no image data".to_string())
            })?;

        BASE64
            .decode(&inline.data)
            .map_err(|e| GenerationError::Parse(format!("invalid base64 image data: {e}")))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
