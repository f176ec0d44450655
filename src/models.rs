use crate::analysis::AnalysisRecord;
use crate::ebay::{Condition, ListingRow};
use crate::gallery::GalleryGroup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `photos_per_item` arrives as a number from JSON bodies and as text from
/// query strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(i64),
    Text(String),
}

/// Export parameters, shared by the query string and the JSON body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub photos_per_item: Option<ParamValue>,
    #[serde(default)]
    pub gallery: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl ExportQuery {
    /// Query-string values win over body values.
    pub fn merge(self, body: Option<ExportQuery>) -> ExportQuery {
        let Some(body) = body else {
            return self;
        };
        ExportQuery {
            condition: self.condition.or(body.condition),
            photos_per_item: self.photos_per_item.or(body.photos_per_item),
            gallery: self.gallery.or(body.gallery),
            format: self.format.or(body.format),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    File,
    Json,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_snippet: Option<String>,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
            status_code: None,
            response_snippet: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct GalleryResponse {
    pub total_groups: usize,
    pub groups: Vec<GalleryGroup>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub preview_count: usize,
    pub condition: Condition,
    pub photos_per_item: usize,
    pub rows: Vec<ListingRow>,
}

#[derive(Debug, Serialize)]
pub struct ExportJsonResponse {
    pub ok: bool,
    pub run_id: String,
    pub filename: String,
    pub schema: String,
    pub rows: usize,
    pub csv_preview: String,
    pub csv_base64: String,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize)]
pub struct ExportTextResponse {
    pub filename: String,
    pub rows: usize,
    pub csv_text: String,
}

pub type AnalyzeGalleryResponse = Vec<AnalysisRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn photos_per_item_accepts_numbers_and_text() {
        let body: ExportQuery =
            serde_json::from_str(r#"{"photos_per_item": 6, "condition": "new"}"#).unwrap();
        assert_eq!(body.photos_per_item, Some(ParamValue::Number(6)));
        let body: ExportQuery = serde_json::from_str(r#"{"photos_per_item": "6"}"#).unwrap();
        assert_eq!(body.photos_per_item, Some(ParamValue::Text("6".into())));
    }

    #[test]
    fn query_wins_over_body() {
        let query = ExportQuery {
            condition: Some("parts".into()),
            ..ExportQuery::default()
        };
        let body = ExportQuery {
            condition: Some("new".into()),
            photos_per_item: Some(ParamValue::Number(3)),
            ..ExportQuery::default()
        };
        let merged = query.merge(Some(body));
        assert_eq!(merged.condition.as_deref(), Some("parts"));
        assert_eq!(merged.photos_per_item, Some(ParamValue::Number(3)));
    }

    #[test]
    fn api_error_omits_empty_fields() {
        let body = serde_json::to_value(ApiError::new("gallery_fetch")).unwrap();
        assert_eq!(body, serde_json::json!({"error": "gallery_fetch"}));
    }
}
