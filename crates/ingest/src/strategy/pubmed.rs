//! PubMed ingestion: search, relevance filter, parse, upsert.
//!
//! The HTTP client for NCBI E-utilities lives behind [`PubMedGateway`]; the
//! publication store behind [`PublicationSink`]. This module owns only the
//! pipeline between them.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use biosource_core::{IngestionSummary, PubMedSettings, Source};

use super::{IngestionStrategy, StrategyError};

/// One search hit as returned by the gateway, before parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPublication {
    pub pmid: Option<String>,
    /// Gateway-assigned relevance in `[0, 1]`. Missing scores count as `0.0`.
    #[serde(default)]
    pub relevance_score: Option<f64>,
    /// Article fields: `title`, `abstract`, `journal`, `doi`, `authors`, `pub_date`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub pmid: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub authors: Vec<String>,
    pub publication_date: Option<NaiveDate>,
}

#[async_trait]
pub trait PubMedGateway: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> anyhow::Result<Vec<RawPublication>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[async_trait]
pub trait PublicationSink: Send + Sync {
    async fn upsert(&self, source_id: Uuid, publication: &Publication) -> anyhow::Result<UpsertOutcome>;
}

// ── In-memory sink ───────────────────────────────────────────────────

/// Publications keyed by PMID, in first-seen order.
#[derive(Default)]
pub struct InMemoryPublicationSink {
    publications: RwLock<IndexMap<String, (Uuid, Publication)>>,
}

impl InMemoryPublicationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pmid: &str) -> anyhow::Result<Option<Publication>> {
        let publications = self.read()?;
        Ok(publications.get(pmid).map(|(_, publication)| publication.clone()))
    }

    pub fn len(&self) -> anyhow::Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> anyhow::Result<RwLockReadGuard<'_, IndexMap<String, (Uuid, Publication)>>> {
        self.publications
            .read()
            .map_err(|e| anyhow::anyhow!("publication store lock poisoned: {e}"))
    }
}

#[async_trait]
impl PublicationSink for InMemoryPublicationSink {
    async fn upsert(&self, source_id: Uuid, publication: &Publication) -> anyhow::Result<UpsertOutcome> {
        let mut publications = self
            .publications
            .write()
            .map_err(|e| anyhow::anyhow!("publication store lock poisoned: {e}"))?;
        let previous = publications.insert(publication.pmid.clone(), (source_id, publication.clone()));
        Ok(if previous.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }
}

// ── Strategy ─────────────────────────────────────────────────────────

pub struct PubMedStrategy {
    gateway: Arc<dyn PubMedGateway>,
    sink: Arc<dyn PublicationSink>,
    settings: PubMedSettings,
}

impl PubMedStrategy {
    pub fn new(
        gateway: Arc<dyn PubMedGateway>,
        sink: Arc<dyn PublicationSink>,
        settings: PubMedSettings,
    ) -> Self {
        Self {
            gateway,
            sink,
            settings,
        }
    }
}

#[async_trait]
impl IngestionStrategy for PubMedStrategy {
    fn name(&self) -> &str {
        "pubmed"
    }

    async fn ingest(&self, source: &Source) -> anyhow::Result<IngestionSummary> {
        let config = source
            .pubmed_config()
            .map_err(|e| StrategyError::Config(e.to_string()))?;
        if config.query.trim().is_empty() {
            return Err(StrategyError::Config(format!("source '{}' has an empty query", source.name)).into());
        }

        let threshold = config
            .relevance_threshold
            .unwrap_or(self.settings.default_relevance_threshold);
        let max_results = config.max_results.unwrap_or(self.settings.max_results);

        let raw = self
            .gateway
            .search(&config.query, max_results)
            .await
            .map_err(|e| StrategyError::Fetch(format!("{e:#}")))?;

        let mut summary = IngestionSummary {
            fetched: raw.len() as u64,
            ..Default::default()
        };

        for record in raw {
            if !passes_threshold(&record, threshold) {
                summary.filtered += 1;
                continue;
            }

            let publication = match parse_publication(&record) {
                Ok(p) => p,
                Err(reason) => {
                    summary.errors.push(reason);
                    continue;
                }
            };
            summary.parsed += 1;

            match self.sink.upsert(source.id, &publication).await {
                Ok(UpsertOutcome::Created) => summary.created += 1,
                Ok(UpsertOutcome::Updated) => summary.updated += 1,
                Err(e) => summary.errors.push(format!("pmid {}: {e:#}", publication.pmid)),
            }
        }

        info!(
            source_id = %source.id,
            query = %config.query,
            threshold,
            fetched = summary.fetched,
            filtered = summary.filtered,
            created = summary.created,
            updated = summary.updated,
            errors = summary.errors.len(),
            "pubmed ingestion finished"
        );
        Ok(summary)
    }
}

/// A threshold of zero (or below) keeps every record.
fn passes_threshold(record: &RawPublication, threshold: f64) -> bool {
    if threshold <= 0.0 {
        return true;
    }
    let score = record.relevance_score.unwrap_or(0.0);
    if score < threshold {
        debug!(pmid = ?record.pmid, score, threshold, "dropping low-relevance record");
        return false;
    }
    true
}

fn str_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_publication(record: &RawPublication) -> Result<Publication, String> {
    let pmid = record
        .pmid
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "record without pmid skipped".to_string())?
        .to_string();
    let title = str_field(&record.payload, "title")
        .ok_or_else(|| format!("pmid {pmid}: missing title"))?;

    let authors: Vec<String> = record
        .payload
        .get("authors")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|a| match a {
                    serde_json::Value::String(name) => Some(name.trim().to_string()),
                    other => other.get("name").and_then(|n| n.as_str()).map(str::to_string),
                })
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Publication {
        pmid,
        title,
        abstract_text: str_field(&record.payload, "abstract"),
        journal: str_field(&record.payload, "journal"),
        doi: str_field(&record.payload, "doi"),
        authors,
        publication_date: str_field(&record.payload, "pub_date").and_then(|d| parse_pub_date(&d)),
    })
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM` and `YYYY`; partial dates snap to the first day.
fn parse_pub_date(raw: &str) -> Option<NaiveDate> {
    let padded = match raw.len() {
        4 => format!("{raw}-01-01"),
        7 => format!("{raw}-01"),
        _ => raw.to_string(),
    };
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d").ok()
}
