use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::ACCEPT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

const SNIPPET_CHARS: usize = 300;

/// One physical item: the photos the gallery grouped together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        alias = "photos",
        alias = "urls",
        deserialize_with = "deserialize_photo_urls"
    )]
    pub photo_urls: Vec<String>,
}

impl GalleryGroup {
    #[cfg(test)]
    pub fn from_urls(urls: &[&str]) -> Self {
        Self {
            id: None,
            title: None,
            photo_urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PhotoUrls {
    Joined(String),
    List(Vec<String>),
    Missing(Option<()>),
}

fn deserialize_photo_urls<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = match PhotoUrls::deserialize(deserializer)? {
        PhotoUrls::Joined(value) => vec![value],
        PhotoUrls::List(values) => values,
        PhotoUrls::Missing(_) => Vec::new(),
    };
    Ok(raw
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Deserialize)]
struct GalleryPayload {
    #[serde(default)]
    groups: Option<Vec<GalleryGroup>>,
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("gallery fetch failed with HTTP {status}")]
    Upstream { status: u16, snippet: String },
    #[error("invalid JSON from gallery: {reason}")]
    InvalidJson { reason: String, snippet: String },
    #[error("gallery returned no groups")]
    Empty,
    #[error("gallery request failed: {0}")]
    Request(String),
}

impl GalleryError {
    pub fn snippet(&self) -> Option<&str> {
        match self {
            GalleryError::Upstream { snippet, .. } | GalleryError::InvalidJson { snippet, .. } => {
                Some(snippet)
            }
            _ => None,
        }
    }
}

#[async_trait]
pub trait GalleryClient: Send + Sync {
    async fn fetch_groups(&self, url: &str) -> Result<Vec<GalleryGroup>, GalleryError>;
}

/// Single GET, no retry.
#[derive(Clone)]
pub struct HttpGallery {
    http: Client,
}

impl HttpGallery {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl GalleryClient for HttpGallery {
    async fn fetch_groups(&self, url: &str) -> Result<Vec<GalleryGroup>, GalleryError> {
        info!(target: "chatbay.gallery", url = %url, "fetching gallery");
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| GalleryError::Request(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GalleryError::Request(err.to_string()))?;
        parse_gallery_response(status, &body)
    }
}

pub fn parse_gallery_response(
    status: StatusCode,
    body: &str,
) -> Result<Vec<GalleryGroup>, GalleryError> {
    let snippet = snippet_of(body);
    if status != StatusCode::OK {
        warn!(
            target: "chatbay.gallery",
            status = status.as_u16(),
            snippet = %snippet,
            "gallery_fetch_failed"
        );
        return Err(GalleryError::Upstream {
            status: status.as_u16(),
            snippet,
        });
    }

    let payload: GalleryPayload = serde_json::from_str(body).map_err(|err| {
        warn!(target: "chatbay.gallery", error = %err, "gallery_json_invalid");
        GalleryError::InvalidJson {
            reason: err.to_string(),
            snippet: snippet.clone(),
        }
    })?;

    // Groups without photos stay; they become error rows downstream.
    let groups = payload.groups.unwrap_or_default();
    if groups.is_empty() {
        return Err(GalleryError::Empty);
    }
    info!(target: "chatbay.gallery", groups = groups.len(), "gallery fetched");
    Ok(groups)
}

fn snippet_of(body: &str) -> String {
    if body.is_empty() {
        return "No response body".to_string();
    }
    body.chars().take(SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_joined_and_listed_photo_urls() {
        let body = r#"{"groups":[
            {"id": 7, "photo_urls": "https://i.postimg.cc/a.jpg, https://i.postimg.cc/b.jpg,"},
            {"title": "jacket", "photo_urls": ["https://i.postimg.cc/c.jpg", "https://i.postimg.cc/d.jpg,https://i.postimg.cc/e.jpg"]}
        ]}"#;
        let groups = parse_gallery_response(StatusCode::OK, body).expect("groups");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].photo_urls.len(), 2);
        assert_eq!(groups[0].id, Some(serde_json::json!(7)));
        assert_eq!(groups[1].photo_urls.len(), 3);
        assert_eq!(groups[1].title.as_deref(), Some("jacket"));
    }

    #[test]
    fn non_200_carries_status_and_snippet() {
        let body = "x".repeat(1000);
        let err = parse_gallery_response(StatusCode::FORBIDDEN, &body).unwrap_err();
        match err {
            GalleryError::Upstream { status, snippet } => {
                assert_eq!(status, 403);
                assert_eq!(snippet.len(), SNIPPET_CHARS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = parse_gallery_response(StatusCode::OK, "<html>oops</html>").unwrap_err();
        assert!(matches!(err, GalleryError::InvalidJson { .. }));
        assert_eq!(err.snippet(), Some("<html>oops</html>"));
    }

    #[test]
    fn missing_or_empty_groups_is_empty() {
        for body in [r#"{}"#, r#"{"groups": []}"#, r#"{"groups": null}"#] {
            let err = parse_gallery_response(StatusCode::OK, body).unwrap_err();
            assert!(matches!(err, GalleryError::Empty), "{body}");
        }
    }

    #[test]
    fn groups_without_photos_are_kept() {
        let body = r#"{"groups":[
            {"photo_urls": "https://i.postimg.cc/a.jpg"},
            {"photo_urls": ""},
            {"id": 3},
            {"photo_urls": ["https://i.postimg.cc/c.jpg"]}
        ]}"#;
        let groups = parse_gallery_response(StatusCode::OK, body).expect("groups");
        assert_eq!(groups.len(), 4);
        assert!(groups[1].photo_urls.is_empty());
        assert!(groups[2].photo_urls.is_empty());

        let only_empty = parse_gallery_response(StatusCode::OK, r#"{"groups":[{"photo_urls":""}]}"#)
            .expect("one group");
        assert_eq!(only_empty.len(), 1);
    }

    #[test]
    fn photo_keys_accept_aliases() {
        let body = r#"{"groups":[
            {"photos": ["https://i.postimg.cc/a.jpg"]},
            {"urls": "https://i.postimg.cc/b.jpg,https://i.postimg.cc/c.jpg"}
        ]}"#;
        let groups = parse_gallery_response(StatusCode::OK, body).expect("groups");
        assert_eq!(groups[0].photo_urls, vec!["https://i.postimg.cc/a.jpg"]);
        assert_eq!(groups[1].photo_urls.len(), 2);
    }
}
