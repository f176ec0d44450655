use crate::config::AppConfig;
use reqwest::{Client, StatusCode, Url, header::CONTENT_TYPE};
use std::collections::HashSet;
use tracing::debug;

pub const ALLOWED_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];
pub const MAX_PHOTOS_PER_ITEM: usize = 12;

pub fn clamp_photo_count(requested: usize) -> usize {
    requested.clamp(1, MAX_PHOTOS_PER_ITEM)
}

/// Joins up to `clamp_photo_count(max)` distinct URLs, keeping first-seen order.
pub fn join_photos(urls: &[String], max: usize, separator: &str) -> String {
    let limit = clamp_photo_count(max);
    let mut seen = HashSet::new();
    urls.iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .filter(|url| seen.insert(*url))
        .take(limit)
        .collect::<Vec<_>>()
        .join(separator)
}

#[derive(Clone)]
pub struct PhotoSanitizer {
    allowed_hosts: Vec<String>,
    preflight: bool,
    http: Client,
}

impl PhotoSanitizer {
    pub fn new(config: &AppConfig, http: Client) -> Self {
        Self {
            allowed_hosts: config.allowed_hosts.clone(),
            preflight: config.photo_preflight,
            http,
        }
    }

    /// Static checks only: scheme, host allow-list, extension, path encoding.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
        if trimmed.is_empty() {
            return None;
        }

        let candidate = if let Some(rest) = strip_prefix_ignore_case(trimmed, "http://") {
            format!("https://{rest}")
        } else if let Some(rest) = strip_prefix_ignore_case(trimmed, "https://") {
            format!("https://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("//") {
            format!("https://{rest}")
        } else if trimmed.contains("://") {
            return None;
        } else {
            format!("https://{trimmed}")
        };

        let parsed = Url::parse(&candidate).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        if !host_allowed(&host, &self.allowed_hosts) {
            return None;
        }

        let decoded = urlencoding::decode(parsed.path())
            .map(|path| path.into_owned())
            .unwrap_or_else(|_| parsed.path().to_string());
        let lowered = decoded.to_lowercase();
        if !ALLOWED_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
            return None;
        }

        let path = decoded
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        Some(format!("https://{authority}{path}"))
    }

    pub async fn sanitize(&self, raw: &str) -> Option<String> {
        let url = self.normalize(raw)?;
        if self.preflight && !self.is_public_image(&url).await {
            debug!(target: "chatbay.photos", url = %url, "photo_preflight_rejected");
            return None;
        }
        Some(url)
    }

    /// HEAD probe: 200 with an `image/*` content type. Any failure means no.
    async fn is_public_image(&self, url: &str) -> bool {
        let Ok(response) = self.http.head(url).send().await else {
            return false;
        };
        if response.status() != StatusCode::OK {
            return false;
        }
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }

    /// Sanitized, deduplicated, at most `clamp_photo_count(max)` entries.
    /// Probing stops once the cap is reached.
    pub async fn collect_item_photos(&self, urls: &[String], max: usize) -> Vec<String> {
        let limit = clamp_photo_count(max);
        let mut seen = HashSet::new();
        let mut cleaned = Vec::new();
        for raw in urls {
            // Skip the probe for URLs already kept.
            let Some(normalized) = self.normalize(raw) else {
                continue;
            };
            if seen.contains(&normalized) {
                continue;
            }
            if let Some(url) = self.sanitize(&normalized).await {
                seen.insert(url.clone());
                cleaned.push(url);
                if cleaned.len() >= limit {
                    break;
                }
            }
        }
        cleaned
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

fn host_allowed(host: &str, allowed: &[String]) -> bool {
    allowed
        .iter()
        .any(|d| host == d || host.ends_with(&format!(".{d}")))
}
