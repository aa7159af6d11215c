//! Data source entity as seen by the ingestion engine.
//!
//! Sources are owned by the source management service; this crate only
//! reads them and stamps `last_ingested_at` after a successful run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::schedule::Schedule;

/// Kind of biomedical data origin. Selects the ingestion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Pubmed,
    Api,
    FileUpload,
    Database,
    WebScraping,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pubmed => "pubmed",
            Self::Api => "api",
            Self::FileUpload => "file_upload",
            Self::Database => "database",
            Self::WebScraping => "web_scraping",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pubmed" => Ok(Self::Pubmed),
            "api" => Ok(Self::Api),
            "file_upload" => Ok(Self::FileUpload),
            "database" => Ok(Self::Database),
            "web_scraping" => Ok(Self::WebScraping),
            other => Err(CoreError::InvalidConfig(format!("unknown source type '{other}'"))),
        }
    }
}

/// Query settings for PubMed sources, stored inside `Source::config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubMedConfig {
    /// Entrez search term.
    pub query: String,
    #[serde(default)]
    pub max_results: Option<u32>,
    /// Records scoring below this are discarded. `0.0` keeps everything;
    /// `None` defers to the engine-wide default.
    #[serde(default)]
    pub relevance_threshold: Option<f64>,
}

/// A configured data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    pub source_type: SourceType,
    /// Free-form, type-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub ingestion_schedule: Schedule,
    #[serde(default)]
    pub last_ingested_at: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(name: impl Into<String>, source_type: SourceType, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id: None,
            source_type,
            config,
            ingestion_schedule: Schedule::manual(),
            last_ingested_at: None,
        }
    }

    pub fn with_schedule(self, schedule: Schedule) -> Self {
        Self {
            ingestion_schedule: schedule,
            ..self
        }
    }

    /// Parse `config` as a [`PubMedConfig`].
    pub fn pubmed_config(&self) -> Result<PubMedConfig, CoreError> {
        if self.source_type != SourceType::Pubmed {
            return Err(CoreError::InvalidConfig(format!(
                "source '{}' is of type {}, not pubmed",
                self.name, self.source_type
            )));
        }
        serde_json::from_value(self.config.clone())
            .map_err(|e| CoreError::InvalidConfig(format!("pubmed config for '{}': {}", self.name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleFrequency;

    #[test]
    fn source_type_string_forms_agree() {
        for st in [
            SourceType::Pubmed,
            SourceType::Api,
            SourceType::FileUpload,
            SourceType::Database,
            SourceType::WebScraping,
        ] {
            let json = serde_json::to_string(&st).unwrap();
            assert_eq!(json, format!("\"{}\"", st.as_str()));
            assert_eq!(st.as_str().parse::<SourceType>().unwrap(), st);
        }
        assert!("ftp".parse::<SourceType>().is_err());
    }

    #[test]
    fn pubmed_config_defaults() {
        let source = Source::new(
            "brca",
            SourceType::Pubmed,
            serde_json::json!({"query": "BRCA1 AND breast cancer"}),
        );
        let config = source.pubmed_config().unwrap();
        assert_eq!(config.query, "BRCA1 AND breast cancer");
        assert!(config.relevance_threshold.is_none());
        assert!(config.max_results.is_none());
    }

    #[test]
    fn pubmed_config_rejects_other_types() {
        let source = Source::new("rest", SourceType::Api, serde_json::json!({"query": "x"}));
        let err = source.pubmed_config().unwrap_err();
        assert!(err.to_string().contains("not pubmed"));
    }

    #[test]
    fn pubmed_config_missing_query() {
        let source = Source::new("broken", SourceType::Pubmed, serde_json::json!({}));
        assert!(matches!(source.pubmed_config(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn source_deserializes_with_defaults() {
        let json = format!(
            r#"{{"id":"{}","name":"clinvar","source_type":"api"}}"#,
            Uuid::new_v4()
        );
        let source: Source = serde_json::from_str(&json).unwrap();
        assert_eq!(source.source_type, SourceType::Api);
        assert_eq!(source.ingestion_schedule.frequency, ScheduleFrequency::Manual);
        assert!(source.last_ingested_at.is_none());
        assert!(source.config.is_null());
    }
}
