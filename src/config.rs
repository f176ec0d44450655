use crate::ebay::taxonomy::Condition;
use crate::llm::retry::{BackoffStrategy, RetryPolicy, duration_from_secs};
use serde_json::{Value, json};
use std::{path::PathBuf, time::Duration};
use tracing::warn;

pub const SERVICE_NAME: &str = "chatbay-analyzer";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_GALLERY_URL: &str = "https://chatbay.site/wp-json/chatbay/v1/gallery";
const DEFAULT_UPLOADS_URL: &str = "https://chatbay.site/ebay-media";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    /// Send the public photo URLs to the model.
    Url,
    /// Download each photo and send it as a base64 data URL.
    Inline,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub image_detail: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub image_mode: ImageMode,
    pub concurrent: bool,
    pub concurrency: usize,
    pub stagger: Duration,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Groups per batch; a longer pause follows every full batch.
    pub limit: usize,
    pub item_sleep: Duration,
    pub batch_pause: Duration,
}

#[derive(Debug, Clone)]
pub struct ListingDefaults {
    pub location: String,
    pub shipping_profile: String,
    pub return_profile: String,
    pub payment_profile: String,
    pub schedule: bool,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// Process configuration. Read once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub gallery_url: String,
    pub uploads_url: String,
    pub allowed_hosts: Vec<String>,
    pub photo_preflight: bool,
    pub default_photos_per_item: usize,
    pub default_condition: Condition,
    pub enforce_params: bool,
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    pub vision: VisionConfig,
    pub listing: ListingDefaults,
    pub ebay_app_id: Option<String>,
    pub template_dir: Option<PathBuf>,
    pub upload_password: Option<String>,
    pub frontend_origins: Vec<String>,
    pub http: HttpConfig,
    pub request_max_bytes: usize,
    pub metrics_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let uploads_url = env.string("EBAY_UPLOADS_URL", DEFAULT_UPLOADS_URL);
        let allowed_hosts = match env.list("ALLOWED_HOSTS") {
            hosts if !hosts.is_empty() => hosts,
            _ => reqwest::Url::parse(&uploads_url)
                .ok()
                .and_then(|url| url.host_str().map(str::to_lowercase))
                .into_iter()
                .collect(),
        };
        if allowed_hosts.is_empty() {
            warn!(
                target: "chatbay.config",
                "no photo hosts allowed; set ALLOWED_HOSTS or a valid EBAY_UPLOADS_URL"
            );
        }

        let default_condition = match env.optional("DEFAULT_CONDITION") {
            Some(raw) => Condition::parse_exact(&raw).unwrap_or_else(|| {
                warn!(
                    target: "chatbay.config",
                    "DEFAULT_CONDITION `{raw}` not recognized; using preowned"
                );
                Condition::Preowned
            }),
            None => Condition::Preowned,
        };

        let strategy = env
            .optional("RETRY_STRATEGY")
            .and_then(|raw| BackoffStrategy::from_str(&raw))
            .unwrap_or(BackoffStrategy::Linear);

        let image_mode = match env.optional("VISION_IMAGE_MODE").as_deref() {
            Some(mode) if mode.eq_ignore_ascii_case("inline") => ImageMode::Inline,
            _ => ImageMode::Url,
        };

        Self {
            port: env.parse("PORT", 10000u16),
            gallery_url: env.string("CHATBAY_GALLERY_URL", DEFAULT_GALLERY_URL),
            uploads_url,
            allowed_hosts,
            photo_preflight: env.flag("PHOTO_PREFLIGHT", true),
            default_photos_per_item: env.parse("DEFAULT_PHOTOS_PER_ITEM", 4usize).clamp(1, 12),
            default_condition,
            enforce_params: env.flag("ENFORCE_PARAMS", false),
            batch: BatchConfig {
                limit: env.parse("BATCH_LIMIT", 5usize).max(1),
                item_sleep: env.seconds("BATCH_SLEEP", 0.8),
                batch_pause: env.seconds("BATCH_PAUSE", 5.0),
            },
            retry: RetryPolicy {
                max_attempts: env.parse("MAX_RETRIES", 3u32).max(1),
                base: env.seconds("RETRY_BASE_SECS", 2.0),
                max_wait: env.seconds("RETRY_MAX_WAIT", 60.0),
                strategy,
            },
            vision: VisionConfig {
                api_key: env.optional("OPENAI_API_KEY"),
                base_url: env
                    .string("OPENAI_BASE_URL", "https://api.openai.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                model: env.string("OPENAI_MODEL", "gpt-4o-mini"),
                image_detail: env.string("OPENAI_IMAGE_DETAIL", "high"),
                temperature: env.parse("OPENAI_TEMPERATURE", 0.2f32),
                max_tokens: env.parse("OPENAI_MAX_TOKENS", 500u32),
                image_mode,
                concurrent: env.flag("VISION_CONCURRENT", false),
                concurrency: env.parse("VISION_CONCURRENCY", 3usize).max(1),
                stagger: Duration::from_millis(env.parse("VISION_STAGGER_MS", 250u64)),
            },
            listing: ListingDefaults {
                location: env.string("EBAY_LOCATION", "Middletown, CT, USA"),
                shipping_profile: env.string("EBAY_SHIP_PROFILE", "ADV FREE 2 DAYS"),
                return_profile: env.string("EBAY_RET_PROFILE", "No returns accepted"),
                payment_profile: env.string("EBAY_PAY_PROFILE", "eBay Payments"),
                schedule: env.flag("SCHEDULE_LISTINGS", true),
            },
            ebay_app_id: env.optional("EBAY_APP_ID"),
            template_dir: env.optional("TEMPLATE_DIR").map(PathBuf::from),
            upload_password: env.optional("UPLOAD_PASSWORD"),
            frontend_origins: env.list("FRONTEND_ORIGINS"),
            http: HttpConfig {
                timeout: Duration::from_secs(env.parse("HTTP_TIMEOUT_SECS", 30u64).max(1)),
                connect_timeout: Duration::from_secs(
                    env.parse("HTTP_CONNECT_TIMEOUT_SECS", 6u64).max(1),
                ),
            },
            request_max_bytes: env
                .parse("REQUEST_MAX_BYTES", 256 * 1024usize)
                .max(1024),
            metrics_key: env.optional("METRICS_KEY"),
        }
    }

    /// Effective configuration for `/status`. Secrets are reported as set/unset.
    pub fn status_json(&self) -> Value {
        json!({
            "service": SERVICE_NAME,
            "version": SERVICE_VERSION,
            "gallery_url": self.gallery_url,
            "uploads_url": self.uploads_url,
            "allowed_hosts": self.allowed_hosts,
            "photo_preflight": self.photo_preflight,
            "default_photos_per_item": self.default_photos_per_item,
            "default_condition": self.default_condition,
            "enforce_params": self.enforce_params,
            "batch": {
                "limit": self.batch.limit,
                "item_sleep_secs": self.batch.item_sleep.as_secs_f64(),
                "batch_pause_secs": self.batch.batch_pause.as_secs_f64(),
            },
            "retry": {
                "max_attempts": self.retry.max_attempts,
                "base_secs": self.retry.base.as_secs_f64(),
                "max_wait_secs": self.retry.max_wait.as_secs_f64(),
                "strategy": self.retry.strategy,
            },
            "vision": {
                "model": self.vision.model,
                "base_url": self.vision.base_url,
                "image_detail": self.vision.image_detail,
                "image_mode": match self.vision.image_mode {
                    ImageMode::Url => "url",
                    ImageMode::Inline => "inline",
                },
                "concurrent": self.vision.concurrent,
                "concurrency": self.vision.concurrency,
                "stagger_ms": self.vision.stagger.as_millis() as u64,
                "api_key_set": self.vision.api_key.is_some(),
            },
            "listing": {
                "location": self.listing.location,
                "shipping_profile": self.listing.shipping_profile,
                "return_profile": self.listing.return_profile,
                "payment_profile": self.listing.payment_profile,
                "schedule": self.listing.schedule,
            },
            "price_research": self.ebay_app_id.is_some(),
            "template_dir": self.template_dir.as_ref().map(|p| p.display().to_string()),
            "upload_password_set": self.upload_password.is_some(),
            "frontend_origins": self.frontend_origins,
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        match self.optional(key) {
            Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
                warn!(target: "chatbay.config", "{key}=`{raw}` is not valid; using default");
                default
            }),
            None => default,
        }
    }

    fn seconds(&self, key: &str, default: f64) -> Duration {
        duration_from_secs(self.parse(key, default))
            .or_else(|| duration_from_secs(default))
            .unwrap_or_default()
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.optional(key) {
            Some(value) => matches!(
                value.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => default,
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|raw| {
                raw.split(',')
                    .map(|item| item.trim().to_lowercase())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) fn test_config(overrides: &[(&str, &str)]) -> AppConfig {
    let mut pairs: Vec<(String, String)> = vec![
        ("ALLOWED_HOSTS".into(), "i.postimg.cc,chatbay.site".into()),
        ("PHOTO_PREFLIGHT".into(), "false".into()),
        ("BATCH_SLEEP".into(), "0".into()),
        ("BATCH_PAUSE".into(), "0".into()),
        ("RETRY_BASE_SECS".into(), "1".into()),
        ("SCHEDULE_LISTINGS".into(), "false".into()),
        ("OPENAI_API_KEY".into(), "sk-test".into()),
    ];
    for (key, value) in overrides {
        pairs.retain(|(k, _)| k != key);
        pairs.push((key.to_string(), value.to_string()));
    }
    AppConfig::from_lookup(move |key| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let cfg = AppConfig::from_lookup(|_| None);
        assert_eq!(cfg.port, 10000);
        assert_eq!(cfg.default_photos_per_item, 4);
        assert_eq!(cfg.default_condition, Condition::Preowned);
        assert_eq!(cfg.allowed_hosts, vec!["chatbay.site".to_string()]);
        assert_eq!(cfg.batch.item_sleep, Duration::from_millis(800));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.photo_preflight);
        assert!(!cfg.vision.concurrent);
        assert!(cfg.vision.api_key.is_none());
    }

    #[test]
    fn overrides_are_parsed_and_clamped() {
        let cfg = test_config(&[
            ("DEFAULT_PHOTOS_PER_ITEM", "40"),
            ("DEFAULT_CONDITION", "NEW"),
            ("MAX_RETRIES", "0"),
            ("RETRY_STRATEGY", "exponential"),
            ("ALLOWED_HOSTS", " I.PostImg.cc , ,cdn.chatbay.site"),
            ("VISION_IMAGE_MODE", "inline"),
            ("ENFORCE_PARAMS", "yes"),
        ]);
        assert_eq!(cfg.default_photos_per_item, 12);
        assert_eq!(cfg.default_condition, Condition::New);
        assert_eq!(cfg.retry.max_attempts, 1);
        assert_eq!(cfg.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(cfg.allowed_hosts, vec!["i.postimg.cc", "cdn.chatbay.site"]);
        assert_eq!(cfg.vision.image_mode, ImageMode::Inline);
        assert!(cfg.enforce_params);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let cfg = test_config(&[("BATCH_SLEEP", "-3"), ("PORT", "http")]);
        assert_eq!(cfg.batch.item_sleep, Duration::from_millis(800));
        assert_eq!(cfg.port, 10000);
    }

    #[test]
    fn huge_or_infinite_durations_fall_back() {
        let cfg = test_config(&[
            ("BATCH_SLEEP", "1e30"),
            ("BATCH_PAUSE", "inf"),
            ("RETRY_MAX_WAIT", "NaN"),
        ]);
        assert_eq!(cfg.batch.item_sleep, Duration::from_millis(800));
        assert_eq!(cfg.batch.batch_pause, Duration::from_secs(5));
        assert_eq!(cfg.retry.max_wait, Duration::from_secs(60));
    }

    #[test]
    fn empty_allow_list_is_reported_and_kept_empty() {
        let cfg = test_config(&[("ALLOWED_HOSTS", ""), ("EBAY_UPLOADS_URL", "not a url")]);
        assert!(cfg.allowed_hosts.is_empty());
    }

    #[test]
    fn status_redacts_secrets() {
        let cfg = test_config(&[("UPLOAD_PASSWORD", "hunter2")]);
        let status = cfg.status_json();
        let text = status.to_string();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("sk-test"));
        assert_eq!(status["upload_password_set"], json!(true));
        assert_eq!(status["vision"]["api_key_set"], json!(true));
    }
}
