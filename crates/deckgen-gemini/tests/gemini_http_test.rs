// Gemini provider against a mock HTTP server

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use deckgen_core::{GenerativeProvider, ImageData, ImageRequest, ProviderConfig, ProviderError, TextRequest};
use deckgen_gemini::GeminiProvider;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEXT_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";
const IMAGE_PATH: &str = "/v1beta/models/gemini-3-pro-image-preview:generateContent";

fn provider(server: &MockServer) -> GeminiProvider {
    GeminiProvider::from_config(ProviderConfig {
        api_key: Some("test-key".into()),
        api_base: server.uri(),
        http_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

fn image_request() -> ImageRequest {
    ImageRequest {
        prompt: "A harbour at night".into(),
        template: None,
        reference_images: vec![],
        aspect_ratio: "16:9".into(),
        resolution: "2K".into(),
    }
}

#[test_log::test(tokio::test)]
async fn test_generate_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TEXT_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "generationConfig": {"thinkingConfig": {"thinkingBudget": 1000}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "  Page one covers tides.\n"}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = provider(&server)
        .generate_text(TextRequest::new("Describe page one"))
        .await
        .unwrap();

    assert_eq!(text, "Page one covers tides.");
}

#[test_log::test(tokio::test)]
async fn test_empty_text_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TEXT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .generate_text(TextRequest::new("Describe"))
        .await
        .unwrap_err();

    match err {
        ProviderError::InvalidResponse(message) => assert!(message.contains("SAFETY")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_generate_image_orders_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .and(body_partial_json(json!({
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {"aspectRatio": "16:9", "imageSize": "2K"}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is your slide"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": STANDARD.encode([7u8, 8, 9])}}
                ]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = image_request();
    request.template = Some(ImageData {
        mime_type: "image/png".into(),
        data: vec![1, 2],
    });
    request.reference_images = vec![ImageData {
        mime_type: "image/webp".into(),
        data: vec![3],
    }];

    let image = provider(&server).generate_image(request).await.unwrap();
    assert_eq!(image.mime_type, "image/jpeg");
    assert_eq!(image.data, vec![7u8, 8, 9]);

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    let parts = body["contents"][0]["parts"].as_array().unwrap().clone();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
    assert_eq!(parts[0]["inlineData"]["data"], STANDARD.encode([1u8, 2]));
    assert_eq!(parts[1]["text"], "A harbour at night");
    assert_eq!(parts[2]["inlineData"]["mimeType"], "image/webp");
}

#[test_log::test(tokio::test)]
async fn test_missing_image_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}, "finishReason": "STOP"}]
        })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .generate_image(image_request())
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}

#[test_log::test(tokio::test)]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TEXT_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = provider(&server)
        .generate_text(TextRequest::new("Describe"))
        .await
        .unwrap_err();

    match err {
        ProviderError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_slow_response_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TEXT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({"candidates": []})),
        )
        .mount(&server)
        .await;

    let provider = GeminiProvider::from_config(ProviderConfig {
        api_key: Some("test-key".into()),
        api_base: server.uri(),
        http_timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .unwrap();

    let err = provider
        .generate_text(TextRequest::new("Describe"))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
}
