//! services/twin_data/src/adapters/openai.rs
//!
//! Adapters for the OpenAI-compatible model provider. They implement the
//! `EmbeddingService` and `ChatCompletionService` ports from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, CreateEmbeddingRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use twin_data_core::ports::{ChatCompletionService, EmbeddingService, PortError, PortResult};

use crate::config::AiConfig;

/// Builds the shared API client from the model section of the configuration.
pub fn build_client(config: &AiConfig) -> PortResult<Client<OpenAIConfig>> {
    let api_key = config
        .openai_api_key
        .as_ref()
        .ok_or_else(|| PortError::InvalidInput("OPENAI_API_KEY is required".to_string()))?;
    let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = &config.openai_api_base {
        openai_config = openai_config.with_api_base(base);
    }
    Ok(Client::with_config(openai_config))
}

/// Maps a provider failure onto the port's error kinds.
pub(crate) fn map_openai_error(e: OpenAIError) -> PortError {
    match e {
        OpenAIError::Reqwest(inner) => PortError::Transient(inner.to_string()),
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or_default();
            let code = api.code.as_deref().unwrap_or_default();
            if kind == "server_error" || code == "rate_limit_exceeded" {
                PortError::Transient(api.message)
            } else {
                PortError::Permanent(api.message)
            }
        }
        OpenAIError::InvalidArgument(message) => PortError::InvalidInput(message),
        other => PortError::Permanent(other.to_string()),
    }
}

fn first_choice_text(response: CreateChatCompletionResponse) -> PortResult<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| PortError::Permanent("Chat completion returned no text content.".to_string()))
}

//=========================================================================================
// Embeddings
//=========================================================================================

/// An adapter that implements `EmbeddingService` using the embeddings endpoint.
#[derive(Clone)]
pub struct OpenAiEmbeddingAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddingAdapter {
    /// Creates a new `OpenAiEmbeddingAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String, dimensions: usize) -> Self {
        Self { client, model, dimensions }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingAdapter {
    async fn embed(&self, text: &str) -> PortResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(PortError::InvalidInput("cannot embed empty text".to_string()));
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(vec![text.to_string()])
            .dimensions(self.dimensions as u32)
            .build()
            .map_err(map_openai_error)?;

        let response = self.client.embeddings().create(request).await.map_err(map_openai_error)?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| PortError::Permanent("Embedding response contained no vectors.".to_string()))?;

        if embedding.len() != self.dimensions {
            return Err(PortError::Permanent(format!(
                "expected a {}-dimensional embedding, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

//=========================================================================================
// Chat Completions
//=========================================================================================

/// An adapter that implements `ChatCompletionService`, including image input.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    async fn send(&self, messages: Vec<ChatCompletionRequestMessage>) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.2)
            .n(1)
            .build()
            .map_err(map_openai_error)?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self.client.chat().create(request).await.map_err(map_openai_error)?;
        first_choice_text(response)
    }
}

#[async_trait]
impl ChatCompletionService for OpenAiChatAdapter {
    async fn complete(&self, system: &str, user: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(map_openai_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(map_openai_error)?
                .into(),
        ];
        self.send(messages).await
    }

    async fn complete_with_image(&self, system: &str, prompt: &str, image_url: &str) -> PortResult<String> {
        let parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(prompt)
                    .build()
                    .map_err(map_openai_error)?,
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image_url)
                            .detail(ImageDetail::High)
                            .build()
                            .map_err(map_openai_error)?,
                    )
                    .build()
                    .map_err(map_openai_error)?,
            ),
        ];

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(map_openai_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(parts))
                .build()
                .map_err(map_openai_error)?
                .into(),
        ];
        self.send(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(kind: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "boom".to_string(),
            r#type: kind.map(String::from),
            param: None,
            code: code.map(String::from),
        })
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(map_openai_error(api_error(None, Some("rate_limit_exceeded"))).is_retryable());
        assert!(map_openai_error(api_error(Some("server_error"), None)).is_retryable());
        assert!(!map_openai_error(api_error(Some("invalid_request_error"), None)).is_retryable());
    }

    #[test]
    fn invalid_arguments_are_invalid_input() {
        let err = map_openai_error(OpenAIError::InvalidArgument("model is required".into()));
        assert_eq!(err, PortError::InvalidInput("model is required".into()));
    }

    #[test]
    fn client_requires_an_api_key() {
        let config = AiConfig {
            openai_api_key: None,
            openai_api_base: None,
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 1536,
            chat_model: "gpt-4o-mini".into(),
            vision_model: "gpt-4o".into(),
        };
        assert!(matches!(build_client(&config), Err(PortError::InvalidInput(_))));
    }
}
