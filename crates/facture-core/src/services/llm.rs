//! HTTP language model client (OpenAI-compatible chat completions).

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LanguageModel, ModelPrompt, ModelTier, Result};
use crate::error::ServiceError;
use crate::models::config::ModelConfig;

/// Chat-completions client with a standard and an escalation model.
pub struct HttpLanguageModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    escalation_model: String,
    temperature: f64,
}

impl HttpLanguageModel {
    /// Build a client from configuration. Fails when the API key
    /// environment variable is not set.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ServiceError::MissingCredentials(config.api_key_env.clone()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            escalation_model: config.escalation_model.clone(),
            temperature: config.temperature,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl LanguageModel for HttpLanguageModel {
    fn model_name(&self, tier: ModelTier) -> String {
        match tier {
            ModelTier::Standard => self.model.clone(),
            ModelTier::Escalated => self.escalation_model.clone(),
        }
    }

    async fn complete(&self, tier: ModelTier, prompt: &ModelPrompt) -> Result<String> {
        let model = self.model_name(tier);

        let user_content = if prompt.images.is_empty() {
            MessageContent::Text(&prompt.text)
        } else {
            let mut parts = vec![ContentPart::Text { text: &prompt.text }];
            for image in &prompt.images {
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{}", BASE64.encode(&image.png)),
                    },
                });
            }
            MessageContent::Parts(parts)
        };

        let request = ChatRequest {
            model: &model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(&prompt.system),
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature: self.temperature,
        };

        debug!(
            model = %model,
            images = prompt.images.len(),
            text_chars = prompt.text.len(),
            "requesting completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::InvalidResponse("empty completion response".to_string()))
    }
}

/// Trim a model reply down to the JSON object it carries: strips markdown
/// fences the model may add despite instructions, then slices from the
/// first `{` to the last `}`.
pub fn clean_json_reply(content: &str) -> &str {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
