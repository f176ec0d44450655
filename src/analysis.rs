//! Vision stage: send one group's photos to the model, retry transient
//! failures, and turn the reply into an [`AnalysisRecord`].

use crate::llm::{RetryPolicy, VisionError, VisionModel};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

pub const VISION_PROMPT: &str = r#"You are an expert eBay cataloger. Analyze these product photos of ONE item and return strict JSON only, no prose, with keys:
{
"title": "<=79 chars, SEO-rich, no condition words",
"category": "noun like shirt, panties, hat, hoodie, jacket, bag",
"brand": "visible brand or likely maker",
"color": "dominant color or palette",
"material": "fabric/content if visible",
"size": "tag size or best guess",
"pattern": "solid, striped, graphic, floral...",
"features": "notable details, comma separated",
"style": "era or decade (e.g. 90s, Y2K)",
"description": "2-3 factual sentences, no condition",
"price_estimate": "typical resale price in USD, e.g. $25"
}"#;

/// Attributes the model reported for one group.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    pub title: String,
    #[serde(rename = "category")]
    pub category_text: String,
    pub description: String,
    pub price_estimate: String,
    pub brand: String,
    pub color: String,
    pub material: String,
    pub size: String,
    pub features: String,
    pub pattern: String,
    pub style: String,
    pub photos: Vec<String>,
    /// Model text kept verbatim when it was not a JSON object.
    pub raw: Option<String>,
    pub error: Option<String>,
}

impl AnalysisRecord {
    pub fn from_object(map: &Map<String, Value>) -> Self {
        let field = |keys: &[&str]| {
            keys.iter()
                .map(|key| map.get(*key).map(text_of).unwrap_or_default())
                .find(|value| !value.is_empty())
                .unwrap_or_default()
        };
        Self {
            title: field(&["title"]),
            category_text: field(&["category", "category_guess", "type"]),
            description: field(&["description", "short_description"]),
            price_estimate: field(&["price_estimate", "price"]),
            brand: field(&["brand"]),
            color: field(&["color", "colour"]),
            material: field(&["material", "fabric"]),
            size: field(&["size"]),
            features: field(&["features"]),
            pattern: field(&["pattern"]),
            style: field(&["style", "year_or_style", "era"]),
            ..Self::default()
        }
    }

    pub fn unstructured(raw: &str) -> Self {
        Self {
            description: raw.to_string(),
            raw: Some(raw.to_string()),
            ..Self::default()
        }
    }

    pub fn failed(photos: Vec<String>, error: impl Into<String>) -> Self {
        Self {
            photos,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(text_of)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => String::new(),
    }
}

/// What the model said, before it is attached to a group.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Structured(AnalysisRecord),
    Unstructured(String),
}

impl ModelReply {
    pub fn into_record(self, photos: Vec<String>) -> AnalysisRecord {
        let mut record = match self {
            ModelReply::Structured(record) => record,
            ModelReply::Unstructured(raw) => AnalysisRecord::unstructured(&raw),
        };
        record.photos = photos;
        record
    }
}

pub fn parse_reply(text: &str) -> ModelReply {
    let cleaned = strip_markdown_fence(text);
    let candidate = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned.as_str(),
    };
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => ModelReply::Structured(AnalysisRecord::from_object(&map)),
        _ => ModelReply::Unstructured(text.trim().to_string()),
    }
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

/// Result of analyzing one group, with the retry transcript.
#[derive(Debug, Clone)]
pub struct GroupAnalysis {
    pub index: usize,
    pub record: AnalysisRecord,
    pub attempts: u32,
    pub waits: Vec<Duration>,
}

/// Calls the model for one group. Retryable failures sleep and try again
/// while the policy allows; anything else becomes an error record.
pub async fn analyze_photos(
    model: &dyn VisionModel,
    policy: &RetryPolicy,
    index: usize,
    photos: Vec<String>,
) -> GroupAnalysis {
    if photos.is_empty() {
        warn!(target: "chatbay.vision", group = index, "vision skipped: no valid photo URLs");
        return GroupAnalysis {
            index,
            record: AnalysisRecord::failed(photos, "no valid photo URLs after sanitization"),
            attempts: 0,
            waits: Vec::new(),
        };
    }

    let started = Instant::now();
    let mut attempt = 0u32;
    let mut waits = Vec::new();
    let record = loop {
        attempt += 1;
        match model.describe(VISION_PROMPT, &photos).await {
            Ok(text) => {
                let reply = parse_reply(&text);
                if matches!(reply, ModelReply::Unstructured(_)) {
                    warn!(target: "chatbay.vision", group = index, "vision reply was not a JSON object");
                }
                break reply.into_record(photos);
            }
            Err(err) if err.is_retryable() && policy.allows_retry(attempt) => {
                let wait = policy.delay_for(attempt, err.retry_hint());
                warn!(
                    target: "chatbay.vision",
                    group = index,
                    attempt,
                    kind = err.kind(),
                    wait_ms = wait.as_millis() as u64,
                    "vision call failed; retrying"
                );
                crate::metrics::retry_scheduled(attempt, wait);
                waits.push(wait);
                sleep(wait).await;
            }
            Err(err) => {
                error!(
                    target: "chatbay.vision",
                    group = index,
                    attempt,
                    kind = err.kind(),
                    error = %err,
                    "vision call failed"
                );
                break AnalysisRecord::failed(photos, failure_message(&err, attempt));
            }
        }
    };

    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::group_elapsed(index, attempt, elapsed_ms);
    info!(
        target: "chatbay.vision",
        group = index,
        attempts = attempt,
        ok = !record.is_error(),
        "group analyzed"
    );
    GroupAnalysis {
        index,
        record,
        attempts: attempt,
        waits,
    }
}

fn failure_message(err: &VisionError, attempts: u32) -> String {
    if err.is_retryable() {
        format!("vision analysis failed after {attempts} attempts: {err}")
    } else {
        format!("vision analysis failed: {err}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::retry::BackoffStrategy;
    use crate::testing::ScriptedVision;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
            strategy: BackoffStrategy::Linear,
        }
    }

    fn photos() -> Vec<String> {
        vec!["https://i.postimg.cc/a.jpg".to_string()]
    }

    #[test]
    fn parses_fenced_json() {
        let text = "```json\n{\"title\": \"Nike Tee\", \"category_guess\": \"shirt\", \"features\": [\"logo\", \"crew neck\"], \"price\": 25}\n```";
        let ModelReply::Structured(record) = parse_reply(text) else {
            panic!("expected structured reply");
        };
        assert_eq!(record.title, "Nike Tee");
        assert_eq!(record.category_text, "shirt");
        assert_eq!(record.features, "logo, crew neck");
        assert_eq!(record.price_estimate, "25");
    }

    #[test]
    fn extracts_object_from_chatty_reply() {
        let text = "Sure! Here it is: {\"brand\": \"Levi's\", \"size\": \"32x30\"} Hope that helps.";
        let ModelReply::Structured(record) = parse_reply(text) else {
            panic!("expected structured reply");
        };
        assert_eq!(record.brand, "Levi's");
        assert_eq!(record.size, "32x30");
    }

    #[test]
    fn non_object_replies_are_unstructured() {
        assert_eq!(
            parse_reply("A blue denim jacket."),
            ModelReply::Unstructured("A blue denim jacket.".into())
        );
        assert!(matches!(parse_reply("[1, 2]"), ModelReply::Unstructured(_)));
        assert!(matches!(parse_reply("{not json}"), ModelReply::Unstructured(_)));

        let record = parse_reply("plain words").into_record(photos());
        assert_eq!(record.raw.as_deref(), Some("plain words"));
        assert_eq!(record.description, "plain words");
        assert_eq!(record.photos, photos());
        assert!(!record.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_then_succeeds() {
        let model = ScriptedVision::new(vec![
            Err(VisionError::RateLimited { retry_after: None }),
            Err(VisionError::RateLimited { retry_after: None }),
            Ok(r#"{"title": "Hat"}"#.to_string()),
        ]);
        let out = analyze_photos(&model, &policy(5), 0, photos()).await;
        assert_eq!(out.record.title, "Hat");
        assert!(!out.record.is_error());
        assert_eq!(out.attempts, 3);
        assert_eq!(out.waits.len(), 2);
        assert!(out.waits[0] <= out.waits[1]);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_waits_do_not_decrease() {
        let model = ScriptedVision::new(vec![
            Err(VisionError::ServerError { status: 503 }),
            Err(VisionError::Transient("timeout".into())),
            Err(VisionError::ServerError { status: 500 }),
            Ok("{}".to_string()),
        ]);
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Exponential,
            ..policy(5)
        };
        let out = analyze_photos(&model, &policy, 0, photos()).await;
        assert_eq!(out.waits.len(), 3);
        assert!(out.waits.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn provider_hint_sets_the_wait() {
        let model = ScriptedVision::new(vec![
            Err(VisionError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            Ok("{}".to_string()),
        ]);
        let out = analyze_photos(&model, &policy(3), 0, photos()).await;
        assert_eq!(out.waits, vec![Duration::from_secs(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let model = ScriptedVision::new(vec![Err(VisionError::Terminal("HTTP 400: bad".into()))]);
        let out = analyze_photos(&model, &policy(5), 1, photos()).await;
        assert_eq!(out.attempts, 1);
        assert!(out.waits.is_empty());
        assert!(out.record.error.as_deref().unwrap().contains("HTTP 400"));
        assert_eq!(out.record.photos, photos());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_attempts_run_out() {
        let model = ScriptedVision::new(vec![
            Err(VisionError::ServerError { status: 502 }),
            Err(VisionError::ServerError { status: 502 }),
            Err(VisionError::ServerError { status: 502 }),
            Ok("{}".to_string()),
        ]);
        let out = analyze_photos(&model, &policy(3), 0, photos()).await;
        assert_eq!(out.attempts, 3);
        assert_eq!(out.waits.len(), 2);
        assert!(out.record.is_error());
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn empty_group_skips_the_model() {
        let model = ScriptedVision::new(vec![]);
        let out = analyze_photos(&model, &policy(3), 0, Vec::new()).await;
        assert_eq!(out.attempts, 0);
        assert!(out.record.is_error());
        assert_eq!(model.calls(), 0);
    }
}
