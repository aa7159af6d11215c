use serde::{Deserialize, Serialize};

/// Outcome counts reported by an ingestion strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    /// Raw records returned by the upstream source.
    pub fetched: u64,
    /// Records dropped before parsing (e.g. below relevance threshold).
    #[serde(default)]
    pub filtered: u64,
    pub parsed: u64,
    pub created: u64,
    pub updated: u64,
    /// Record-level problems that did not abort the run.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl IngestionSummary {
    /// A run that finished but skipped some records.
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Flatten into the JSON map stored as job metrics.
    pub fn to_metrics(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut metrics = serde_json::Map::new();
        metrics.insert("records_fetched".into(), self.fetched.into());
        metrics.insert("records_filtered".into(), self.filtered.into());
        metrics.insert("records_parsed".into(), self.parsed.into());
        metrics.insert("records_created".into(), self.created.into());
        metrics.insert("records_updated".into(), self.updated.into());
        metrics.insert("record_errors".into(), (self.errors.len() as u64).into());
        metrics
    }
}
