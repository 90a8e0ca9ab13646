// Gemini Provider Implementation
//
// Text and image generation over the generateContent endpoint.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use deckgen_core::{
    GeneratedImage, GenerativeProvider, ImageData, ImageRequest, ProviderConfig, ProviderError,
    TextRequest,
};
use reqwest::Client;
use tracing::{debug, instrument};

use crate::types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, ImageConfig, Part,
    ThinkingConfig,
};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini client for page descriptions and page images
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    config: ProviderConfig,
}

impl GeminiProvider {
    /// Build a provider; fails when no API key is configured
    pub fn from_config(config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("GOOGLE_API_KEY is not set".into()))?;
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("http client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model
        )
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("undecodable body: {e}")))
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Request(e.to_string())
    }
}

fn inline_part(image: &ImageData) -> Part {
    Part::inline(image.mime_type.clone(), STANDARD.encode(&image.data))
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    #[instrument(skip(self, request), fields(model = %self.config.text_model))]
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user(vec![Part::text(request.prompt)])],
            generation_config: Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: self.config.thinking_budget,
                }),
                ..Default::default()
            }),
        };

        let response = self.generate_content(&self.config.text_model, &body).await?;
        let text = response.text();
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::InvalidResponse(format!(
                "no text in response ({})",
                response.empty_reason()
            )));
        }

        debug!(chars = text.len(), "Text generated");
        Ok(text.to_string())
    }

    #[instrument(
        skip(self, request),
        fields(
            model = %self.config.image_model,
            aspect_ratio = %request.aspect_ratio,
            resolution = %request.resolution,
            references = request.reference_images.len()
        )
    )]
    async fn generate_image(&self, request: ImageRequest) -> Result<GeneratedImage, ProviderError> {
        // Template first, then the prompt, then any extra references
        let mut parts = Vec::with_capacity(request.reference_images.len() + 2);
        if let Some(template) = &request.template {
            parts.push(inline_part(template));
        }
        parts.push(Part::text(request.prompt));
        parts.extend(request.reference_images.iter().map(inline_part));

        let body = GenerateContentRequest {
            contents: vec![Content::user(parts)],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
                image_config: Some(ImageConfig {
                    aspect_ratio: request.aspect_ratio,
                    image_size: request.resolution,
                }),
                ..Default::default()
            }),
        };

        let response = self
            .generate_content(&self.config.image_model, &body)
            .await?;
        let inline = response.first_inline_data().ok_or_else(|| {
            ProviderError::InvalidResponse(format!(
                "no image in response ({})",
                response.empty_reason()
            ))
        })?;
        let data = STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|e| ProviderError::InvalidResponse(format!("image is not base64: {e}")))?;

        debug!(bytes = data.len(), mime_type = %inline.mime_type, "Image generated");
        Ok(ImageData {
            mime_type: inline.mime_type.clone(),
            data,
        })
    }
}
