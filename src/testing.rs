//! In-process fakes for the gallery and the vision model.

use crate::gallery::{GalleryClient, GalleryError, GalleryGroup};
use crate::llm::{VisionError, VisionModel};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Replies from a fixed script, in call order. An exhausted script
/// answers with an empty JSON object.
pub struct ScriptedVision {
    script: Mutex<VecDeque<Result<String, VisionError>>>,
    calls: AtomicUsize,
}

impl ScriptedVision {
    pub fn new(script: Vec<Result<String, VisionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn describe(&self, _prompt: &str, _photos: &[String]) -> Result<String, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("{}".to_string()))
    }
}

/// Answers by photo URL: anything containing `fail` is a terminal error,
/// otherwise the reply titles the item after the first photo's file name.
pub struct EchoVision;

#[async_trait]
impl VisionModel for EchoVision {
    async fn describe(&self, _prompt: &str, photos: &[String]) -> Result<String, VisionError> {
        let first = photos.first().cloned().unwrap_or_default();
        if first.contains("fail") {
            return Err(VisionError::Terminal("HTTP 400: unreadable image".into()));
        }
        let name = first.rsplit('/').next().unwrap_or_default();
        Ok(serde_json::json!({
            "title": format!("Item {name}"),
            "category": "t-shirt",
            "brand": "Nike",
            "size": "L",
            "color": "Black",
            "price_estimate": "$24.50",
            "description": "Soft cotton tee."
        })
        .to_string())
    }
}

pub struct StaticGallery(pub Result<Vec<GalleryGroup>, fn() -> GalleryError>);

impl StaticGallery {
    pub fn groups(groups: Vec<GalleryGroup>) -> Self {
        Self(Ok(groups))
    }

    pub fn failing(err: fn() -> GalleryError) -> Self {
        Self(Err(err))
    }
}

#[async_trait]
impl GalleryClient for StaticGallery {
    async fn fetch_groups(&self, _url: &str) -> Result<Vec<GalleryGroup>, GalleryError> {
        match &self.0 {
            Ok(groups) if groups.is_empty() => Err(GalleryError::Empty),
            Ok(groups) => Ok(groups.clone()),
            Err(make) => Err(make()),
        }
    }
}
