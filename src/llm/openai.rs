use crate::config::{ImageMode, VisionConfig};
use crate::llm::retry::reset_hint;
use crate::llm::{VisionError, VisionModel};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, StatusCode, header::CONTENT_TYPE, header::HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// OpenAI-compatible chat completions client with image inputs.
pub struct VisionClient {
    http: Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig, http: Client) -> Self {
        Self { http, config }
    }

    async fn image_parts(&self, photos: &[String]) -> Result<Vec<ContentPart>, VisionError> {
        let mut parts = Vec::with_capacity(photos.len());
        for url in photos {
            let url = match self.config.image_mode {
                ImageMode::Url => url.clone(),
                ImageMode::Inline => match self.inline_image(url).await {
                    Ok(data_url) => data_url,
                    Err(err) => {
                        warn!(target: "chatbay.vision", url = %url, error = %err, "inline_image_skipped");
                        continue;
                    }
                },
            };
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url,
                    detail: self.config.image_detail.clone(),
                },
            });
        }
        if parts.is_empty() {
            return Err(VisionError::Terminal("no photos could be attached".into()));
        }
        Ok(parts)
    }

    async fn inline_image(&self, url: &str) -> Result<String, reqwest::Error> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await?;
        Ok(format!(
            "data:{content_type};base64,{}",
            BASE64.encode(&bytes)
        ))
    }
}

#[async_trait]
impl VisionModel for VisionClient {
    async fn describe(&self, prompt: &str, photos: &[String]) -> Result<String, VisionError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(VisionError::Terminal("OPENAI_API_KEY is not set".into()));
        };

        let mut content = vec![ContentPart::Text {
            text: prompt.to_string(),
        }];
        content.extend(self.image_parts(photos).await?);

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|err| VisionError::Transient(err.to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status, &headers, &text));
        }

        let payload: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| VisionError::Terminal(format!("invalid completion body: {err}")))?;
        if let Some(usage) = &payload.usage {
            debug!(
                target: "chatbay.vision",
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion_usage"
            );
        }
        let reply = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(reply.trim().to_string())
    }
}

fn classify_transport(err: reqwest::Error) -> VisionError {
    if err.is_builder() {
        VisionError::Terminal(err.to_string())
    } else {
        VisionError::Transient(err.to_string())
    }
}

/// Maps a non-success provider response onto a [`VisionError`] kind.
pub fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> VisionError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);

    match status.as_u16() {
        429 => {
            let quota_exhausted = detail
                .as_ref()
                .map(|d| {
                    d.code.as_deref() == Some("insufficient_quota")
                        || d.r#type.as_deref() == Some("insufficient_quota")
                })
                .unwrap_or(false);
            if quota_exhausted {
                VisionError::Terminal("provider quota exhausted".into())
            } else {
                VisionError::RateLimited {
                    retry_after: reset_hint(headers),
                }
            }
        }
        408 => VisionError::Transient("provider request timeout".into()),
        code if status.is_server_error() => VisionError::ServerError { status: code },
        code => {
            let message = detail
                .and_then(|d| d.message)
                .unwrap_or_else(|| body.chars().take(200).collect());
            VisionError::Terminal(format!("HTTP {code}: {message}"))
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}
