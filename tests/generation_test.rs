//! Integration tests for the Gemini client against a mock HTTP server.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use instagram_auto_poster::generation::{
    GeminiClient, GenerationError, GenerativeModel, ImageAttachment,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-test";

fn model_path() -> String {
    format!("/v1beta/models/{MODEL}:generateContent")
}

#[tokio::test]
async fn test_generate_text_happy_path() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(model_path()))
        .and(query_param("key", "key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Hello "},
                        {"text": "world"}
                    ]
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let text = client
        .generate_text("key-1", MODEL, "say hello")
        .await
        .expect("text generation failed");

    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn test_generate_text_rate_limited() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(model_path()))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let err = client
        .generate_text("key-1", MODEL, "say hello")
        .await
        .expect_err("expected rate limit");

    assert!(matches!(err, GenerationError::RateLimited));
    assert!(err.is_rate_limit());
}

#[tokio::test]
async fn test_generate_text_model_unavailable_on_404() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(model_path()))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let err = client
        .generate_text("key-1", MODEL, "say hello")
        .await
        .expect_err("expected model unavailable");

    assert!(matches!(err, GenerationError::ModelUnavailable(m) if m == MODEL));
}

#[tokio::test]
async fn test_generate_text_model_unavailable_in_error_body() {
    let server = MockServer::start().await;

    // Some deployments report a missing model as 400 NOT_FOUND.
    Mock::given(method("POST"))
        .and(path(model_path()))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "status": "NOT_FOUND", "message": "model not found"}
        })))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let err = client
        .generate_text("key-1", MODEL, "say hello")
        .await
        .expect_err("expected model unavailable");

    assert!(matches!(err, GenerationError::ModelUnavailable(_)));
}

#[tokio::test]
async fn test_generate_text_empty_response_is_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(model_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let err = client
        .generate_text("key-1", MODEL, "say hello")
        .await
        .expect_err("expected parse error");

    assert!(matches!(err, GenerationError::Parse(_)));
}

#[tokio::test]
async fn test_generate_image_decodes_inline_data() {
    let server = MockServer::start().await;
    let image_bytes = b"not-really-a-png".to_vec();

    Mock::given(method("POST"))
        .and(path(model_path()))
        .and(body_string_contains("responseModalities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "here is your image"},
                        {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(&image_bytes)}}
                    ]
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let bytes = client
        .generate_image("key-1", MODEL, "a cocktail", None)
        .await
        .expect("image generation failed");

    assert_eq!(bytes, image_bytes);
}

#[tokio::test]
async fn test_generate_image_sends_reference_inline() {
    let server = MockServer::start().await;
    let reference = ImageAttachment {
        mime_type: "image/jpeg".to_string(),
        data: b"reference-bytes".to_vec(),
    };
    let encoded = BASE64.encode(&reference.data);

    Mock::given(method("POST"))
        .and(path(model_path()))
        .and(body_string_contains(encoded.as_str()))
        .and(body_string_contains("image/jpeg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(b"out")}}
                    ]
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let bytes = client
        .generate_image("key-1", MODEL, "a cocktail", Some(&reference))
        .await
        .expect("image generation failed");

    assert_eq!(bytes, b"out");
}

#[tokio::test]
async fn test_generate_image_without_inline_data_is_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(model_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "no image today"}]}
            }]
        })))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url(server.uri());
    let err = client
        .generate_image("key-1", MODEL, "a cocktail", None)
        .await
        .expect_err("expected parse error");

    assert!(matches!(err, GenerationError::Parse(_)));
}
