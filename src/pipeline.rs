use crate::analysis::{AnalysisRecord, GroupAnalysis, analyze_photos};
use crate::config::AppConfig;
use crate::ebay::export::{export_filename, write_csv};
use crate::ebay::listing::{
    RowContext, build_row, category_for, has_usable_price, schedule_time_next_day,
};
use crate::ebay::pricing::PriceResearch;
use crate::ebay::taxonomy::{Condition, normalize_condition};
use crate::ebay::{HeaderSchema, ListingRow, TemplateCatalog};
use crate::gallery::{GalleryClient, GalleryError, GalleryGroup, HttpGallery};
use crate::llm::{VisionClient, VisionModel};
use crate::models::{ExportQuery, ParamValue, StageReport};
use crate::photos::{MAX_PHOTOS_PER_ITEM, PhotoSanitizer};
use chrono::Utc;
use reqwest::{Client, Url};
use serde_json::json;
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const PREVIEW_GROUPS: usize = 2;

/// Everything one request needs. Clients and caches are shared read-only.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<AppConfig>,
    gallery: Arc<dyn GalleryClient>,
    vision: Arc<dyn VisionModel>,
    photos: PhotoSanitizer,
    templates: Arc<TemplateCatalog>,
    pricing: Option<PriceResearch>,
}

/// Validated request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportParams {
    pub condition: Condition,
    pub photos_per_item: usize,
    pub gallery_url: String,
}

/// A finished export: rows in gallery order plus the rendered CSV.
#[derive(Debug)]
pub struct ExportRun {
    pub run_id: Uuid,
    pub filename: String,
    pub schema: Arc<HeaderSchema>,
    pub rows: Vec<ListingRow>,
    pub csv: String,
    pub stages: Vec<StageReport>,
}

impl Pipeline {
    pub fn new(config: Arc<AppConfig>, http: Client) -> Self {
        let gallery = Arc::new(HttpGallery::new(http.clone()));
        let vision = Arc::new(VisionClient::new(config.vision.clone(), http.clone()));
        let templates = Arc::new(TemplateCatalog::load(config.template_dir.as_deref()));
        Self::with_clients(config, gallery, vision, http, templates)
    }

    pub fn with_clients(
        config: Arc<AppConfig>,
        gallery: Arc<dyn GalleryClient>,
        vision: Arc<dyn VisionModel>,
        http: Client,
        templates: Arc<TemplateCatalog>,
    ) -> Self {
        let photos = PhotoSanitizer::new(&config, http.clone());
        let pricing = config
            .ebay_app_id
            .clone()
            .map(|app_id| PriceResearch::new(http, app_id));
        Self {
            config,
            gallery,
            vision,
            photos,
            templates,
            pricing,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Applies defaults. With `ENFORCE_PARAMS` on, invalid values are
    /// rejected; otherwise they are normalized and clamped.
    pub fn resolve_params(&self, query: &ExportQuery) -> Result<ExportParams, PipelineError> {
        let enforce = self.config.enforce_params;

        let condition = match query.condition.as_deref().map(str::trim) {
            None | Some("") => self.config.default_condition,
            Some(raw) if enforce => Condition::parse_exact(raw).ok_or_else(|| {
                PipelineError::invalid_input(
                    "params",
                    format!("condition `{raw}` must be one of new, preowned, parts"),
                )
            })?,
            Some(raw) => normalize_condition(raw, self.config.default_condition),
        };

        let requested = match &query.photos_per_item {
            None => None,
            Some(ParamValue::Number(n)) => Some(*n),
            Some(ParamValue::Text(text)) if text.trim().is_empty() => None,
            Some(ParamValue::Text(text)) => match text.trim().parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) if enforce => {
                    return Err(PipelineError::invalid_input(
                        "params",
                        format!("photos_per_item `{text}` is not an integer"),
                    ));
                }
                Err(_) => None,
            },
        };
        let photos_per_item = match requested {
            None => self.config.default_photos_per_item,
            Some(n) if (1..=MAX_PHOTOS_PER_ITEM as i64).contains(&n) => n as usize,
            Some(n) if enforce => {
                return Err(PipelineError::invalid_input(
                    "params",
                    format!("photos_per_item must be between 1 and {MAX_PHOTOS_PER_ITEM}, got {n}"),
                ));
            }
            Some(n) => n.clamp(1, MAX_PHOTOS_PER_ITEM as i64) as usize,
        };

        let gallery_url = match query.gallery.as_deref().map(str::trim) {
            None | Some("") => self.config.gallery_url.clone(),
            Some(raw) => {
                let valid = Url::parse(raw)
                    .map(|url| matches!(url.scheme(), "http" | "https"))
                    .unwrap_or(false);
                if !valid {
                    return Err(PipelineError::invalid_input(
                        "params",
                        format!("gallery `{raw}` is not an http(s) URL"),
                    ));
                }
                raw.to_string()
            }
        };

        Ok(ExportParams {
            condition,
            photos_per_item,
            gallery_url,
        })
    }

    pub async fn fetch_groups(&self, gallery_url: &str) -> Result<Vec<GalleryGroup>, PipelineError> {
        self.gallery
            .fetch_groups(gallery_url)
            .await
            .map_err(PipelineError::from)
    }

    /// Analyzes groups in input order, sequentially with pacing or through
    /// the bounded fan-out when `VISION_CONCURRENT` is on.
    pub async fn analyze_groups(
        &self,
        groups: &[GalleryGroup],
        photos_per_item: usize,
    ) -> Vec<GroupAnalysis> {
        if self.config.vision.concurrent && groups.len() > 1 {
            self.analyze_concurrently(groups, photos_per_item).await
        } else {
            self.analyze_sequentially(groups, photos_per_item).await
        }
    }

    async fn analyze_sequentially(
        &self,
        groups: &[GalleryGroup],
        photos_per_item: usize,
    ) -> Vec<GroupAnalysis> {
        let batch = &self.config.batch;
        let mut results = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            let photos = self
                .photos
                .collect_item_photos(&group.photo_urls, photos_per_item)
                .await;
            results.push(
                analyze_photos(self.vision.as_ref(), &self.config.retry, index, photos).await,
            );

            if index + 1 == groups.len() {
                break;
            }
            let pause = if (index + 1) % batch.limit == 0 {
                batch.batch_pause
            } else {
                batch.item_sleep
            };
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }
        results
    }

    async fn analyze_concurrently(
        &self,
        groups: &[GalleryGroup],
        photos_per_item: usize,
    ) -> Vec<GroupAnalysis> {
        let gate = Arc::new(Semaphore::new(self.config.vision.concurrency));
        let stagger = self.config.vision.stagger;
        let mut handles = Vec::with_capacity(groups.len());

        for (index, group) in groups.iter().enumerate() {
            let gate = gate.clone();
            let vision = self.vision.clone();
            let sanitizer = self.photos.clone();
            let policy = self.config.retry.clone();
            let urls = group.photo_urls.clone();
            let fallback_photos = urls.clone();
            let delay = stagger.saturating_mul(index as u32);
            let handle = tokio::spawn(async move {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                let _permit = gate.acquire_owned().await.ok();
                let photos = sanitizer.collect_item_photos(&urls, photos_per_item).await;
                analyze_photos(vision.as_ref(), &policy, index, photos).await
            });
            handles.push((handle, fallback_photos));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, (handle, photos)) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(analysis) => results.push(analysis),
                Err(err) => {
                    error!(target: "chatbay.vision", group = index, error = %err, "analysis task failed");
                    results.push(GroupAnalysis {
                        index,
                        record: AnalysisRecord::failed(photos, format!("analysis task failed: {err}")),
                        attempts: 0,
                        waits: Vec::new(),
                    });
                }
            }
        }
        results
    }

    pub async fn analyze_gallery(
        &self,
        params: &ExportParams,
    ) -> Result<Vec<AnalysisRecord>, PipelineError> {
        let groups = self.fetch_groups(&params.gallery_url).await?;
        Ok(self
            .analyze_groups(&groups, params.photos_per_item)
            .await
            .into_iter()
            .map(|analysis| analysis.record)
            .collect())
    }

    /// Gallery → analysis → rows → CSV. `limit` caps the number of groups.
    pub async fn build_export(
        &self,
        params: &ExportParams,
        limit: Option<usize>,
    ) -> Result<ExportRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let mut stages = Vec::new();
        info!(
            target: "chatbay.export",
            run_id = %run_id,
            condition = params.condition.as_str(),
            photos_per_item = params.photos_per_item,
            "export started"
        );

        let mut groups = self
            .capture_stage("fetch_gallery", &mut stages, async {
                self.fetch_groups(&params.gallery_url).await.map(|groups| {
                    let output = json!({ "groups": groups.len() });
                    (groups, output)
                })
            })
            .await?;
        if let Some(limit) = limit {
            groups.truncate(limit);
        }

        let analyses = self
            .capture_stage("analyze_groups", &mut stages, async {
                let analyses = self.analyze_groups(&groups, params.photos_per_item).await;
                let failed = analyses.iter().filter(|a| a.record.is_error()).count();
                let retries: usize = analyses.iter().map(|a| a.waits.len()).sum();
                let attempts: u32 = analyses.iter().map(|a| a.attempts).sum();
                let output = json!({
                    "groups": analyses.len(),
                    "failed": failed,
                    "attempts": attempts,
                    "retries": retries,
                });
                Ok::<_, PipelineError>((analyses, output))
            })
            .await?;

        let schema = self.schema_for(&analyses);
        let rows = self
            .capture_stage("build_rows", &mut stages, async {
                let rows = self.build_rows(&analyses, params, &schema).await;
                let output = json!({ "rows": rows.len(), "schema": schema.name });
                Ok::<_, PipelineError>((rows, output))
            })
            .await?;

        let csv = write_csv(&schema, &rows)
            .map_err(|err| PipelineError::internal("render_csv", err.to_string()))?;
        let filename = export_filename(Utc::now());
        info!(
            target: "chatbay.export",
            run_id = %run_id,
            rows = rows.len(),
            filename = %filename,
            "export finished"
        );
        Ok(ExportRun {
            run_id,
            filename,
            schema,
            rows,
            csv,
            stages,
        })
    }

    /// Template picked from the first successfully analyzed record.
    fn schema_for(&self, analyses: &[GroupAnalysis]) -> Arc<HeaderSchema> {
        match analyses.iter().find(|a| !a.record.is_error()) {
            Some(first) => self
                .templates
                .for_category(category_for(&first.record), &first.record.category_text),
            None => self.templates.for_category("", ""),
        }
    }

    async fn build_rows(
        &self,
        analyses: &[GroupAnalysis],
        params: &ExportParams,
        schema: &HeaderSchema,
    ) -> Vec<ListingRow> {
        let schedule_time = self
            .config
            .listing
            .schedule
            .then(|| schedule_time_next_day(Utc::now()));
        let ctx = RowContext {
            condition: params.condition,
            photos_per_item: params.photos_per_item,
            defaults: &self.config.listing,
            schedule_time,
        };

        let mut rows = Vec::with_capacity(analyses.len());
        for analysis in analyses {
            let record = &analysis.record;
            let researched = match &self.pricing {
                Some(pricing) if !record.is_error() && !has_usable_price(&record.price_estimate) => {
                    let keywords = if record.title.trim().is_empty() {
                        record.brand.as_str()
                    } else {
                        record.title.as_str()
                    };
                    pricing.lookup(keywords, category_for(record)).await
                }
                _ => None,
            };
            rows.push(build_row(record, researched, &ctx, schema));
        }
        rows
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<(T, serde_json::Value), PipelineError>>,
    {
        let started = Instant::now();
        let (value, output) = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, output));
        Ok(value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
    snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    NotFound,
    /// The upstream answered with this non-success status.
    Upstream(u16),
    BadGateway,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::InvalidInput)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Internal)
    }

    fn with_kind(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
            snippet: None,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn snippet(&self) -> Option<&str> {
        self.snippet.as_deref()
    }
}

impl From<GalleryError> for PipelineError {
    fn from(err: GalleryError) -> Self {
        let snippet = err.snippet().map(str::to_string);
        let kind = match &err {
            GalleryError::Upstream { status, .. } => PipelineErrorKind::Upstream(*status),
            GalleryError::InvalidJson { .. } | GalleryError::Request(_) => {
                PipelineErrorKind::BadGateway
            }
            GalleryError::Empty => PipelineErrorKind::NotFound,
        };
        if kind != PipelineErrorKind::NotFound {
            warn!(target: "chatbay.gallery", error = %err, "gallery stage failed");
        }
        Self {
            stage: "fetch_gallery",
            message: err.to_string(),
            kind,
            snippet,
        }
    }
}
