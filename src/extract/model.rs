use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::dates::{fuzzy_parse_date, parse_time_text};
use crate::error::Result;
use crate::extract::{resolve_url, Extractor, Page};
use crate::types::{ExtractionMethod, Seed};

/// Fields a model-assisted extraction run may return per candidate.
/// Everything is raw text; parsing happens on our side.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandidateFields {
    pub title: String,
    pub date_text: Option<String>,
    pub time_text: Option<String>,
    pub detail_url: Option<String>,
    pub ticket_url: Option<String>,
    pub description: Option<String>,
}

/// The model-assisted extraction capability: a pluggable, possibly
/// network-backed fallback with its own failure mode. A failure or a
/// malformed response is equivalent to "no extraction"; it must never
/// throw uncaught into the pipeline.
#[async_trait]
pub trait ModelExtractor: Send + Sync {
    async fn extract(
        &self,
        content: &str,
        url: &str,
        source_name: &str,
    ) -> Result<Vec<CandidateFields>>;
}

/// Default capability when no backend is configured: extracts nothing.
pub struct NullModelExtractor;

#[async_trait]
impl ModelExtractor for NullModelExtractor {
    async fn extract(&self, _: &str, _: &str, _: &str) -> Result<Vec<CandidateFields>> {
        Ok(Vec::new())
    }
}

/// Deterministic test double: returns a fixed set of candidates so the
/// rest of the pipeline can be exercised without any network dependency.
pub struct FixedModelExtractor {
    pub candidates: Vec<CandidateFields>,
}

#[async_trait]
impl ModelExtractor for FixedModelExtractor {
    async fn extract(&self, _: &str, _: &str, _: &str) -> Result<Vec<CandidateFields>> {
        Ok(self.candidates.clone())
    }
}

/// Adapter plugging the capability into the Discovery Engine's ordered
/// extractor list.
pub struct ModelAssistedExtractor {
    model: Arc<dyn ModelExtractor>,
    source_name: String,
}

impl ModelAssistedExtractor {
    pub fn new(model: Arc<dyn ModelExtractor>, source_name: impl Into<String>) -> Self {
        Self {
            model,
            source_name: source_name.into(),
        }
    }
}

#[async_trait]
impl Extractor for ModelAssistedExtractor {
    fn name(&self) -> &'static str {
        "model_assisted"
    }

    async fn discover(&self, page: &Page, today: NaiveDate) -> Result<Vec<Seed>> {
        let candidates = match self
            .model
            .extract(&page.html, &page.url, &self.source_name)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Model extraction failed on {}: {}; treating as empty", page.url, e);
                return Ok(Vec::new());
            }
        };

        let seeds = candidates
            .into_iter()
            .filter(|c| !c.title.trim().is_empty())
            .map(|c| {
                let date = c
                    .date_text
                    .as_deref()
                    .and_then(|t| fuzzy_parse_date(t, chrono::Datelike::year(&today)));
                let time = c.time_text.as_deref().and_then(parse_time_text);
                Seed {
                    title: c.title.trim().to_string(),
                    raw_date_text: c.date_text,
                    date,
                    time,
                    detail_url: c
                        .detail_url
                        .as_deref()
                        .and_then(|href| resolve_url(&page.url, href)),
                    ticket_url: c
                        .ticket_url
                        .as_deref()
                        .and_then(|href| resolve_url(&page.url, href)),
                    image_url: None,
                    description: c.description,
                    extraction_method: ExtractionMethod::ModelAssisted,
                    page_url: page.url.clone(),
                }
            })
            .collect();

        Ok(seeds)
    }
}
