//! Generative AI capabilities: credential rotation, the model client, and
//! the caption/image pipelines built on top of it.

pub mod caption;
pub mod credentials;
pub mod gemini;
pub mod image;

pub use credentials::CredentialPool;
pub use gemini::GeminiClient;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generation API returned status {0}")]
    Status(u16),
    #[error("generation API rate limited")]
    RateLimited,
    #[error("model not available: {0}")]
    ModelUnavailable(String),
    #[error("failed to parse generation response: {0}")]
    Parse(String),
    #[error("generation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("all credentials exhausted: {0}")]
    CredentialsExhausted(String),
}

impl GenerationError {
    /// Whether rotating to the next credential could help.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// An image attached to a generation request as style/composition guidance.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Opaque request/response contract with the generation provider.
///
/// Implementations must surface rate limiting as
/// [`GenerationError::RateLimited`] and a missing model as
/// [`GenerationError::ModelUnavailable`], since the callers branch on both.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Generate text from a prompt.
    async fn generate_text(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, GenerationError>;

    /// Generate an image from a prompt, optionally conditioned on a
    /// reference attachment. Returns raw image bytes.
    async fn generate_image(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        reference: Option<&ImageAttachment>,
    ) -> Result<Vec<u8>, GenerationError>;
}

/// Extract the first well-formed JSON object from free text.
///
/// Model responses are frequently wrapped in prose or code fences; this scans
/// for the first balanced `{...}` span, skipping braces inside string
/// literals.
#[must_use]
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"a": 1}"#;
        assert_eq!(extract_json(text), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_extract_json_wrapped_in_prose() {
        let text = "Sure! Here is your JSON:\n```json\n{\"caption\": \"hi\", \"tags\": []}\n```\nHope that helps.";
        assert_eq!(
            extract_json(text),
            Some(r#"{"caption": "hi", "tags": []}"#)
        );
    }

    #[test]
    fn test_extract_json_nested_and_string_braces() {
        let text = r#"note {"outer": {"inner": "has } brace"}, "n": 2} trailing"#;
        let json = extract_json(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["outer"]["inner"], "has } brace");
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn test_extract_json_absent() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("unbalanced { \"a\": 1"), None);
    }
}
