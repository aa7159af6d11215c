//! Per-source-type ingestion strategies.
//!
//! A strategy performs the fetch/parse/persist work for one [`SourceType`].
//! The service only sees the contract: `ingest(source) -> IngestionSummary`.

pub mod pubmed;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use biosource_core::{IngestionSummary, Source, SourceType};

pub use pubmed::{
    InMemoryPublicationSink, PubMedGateway, PubMedStrategy, Publication, PublicationSink,
    RawPublication, UpsertOutcome,
};

#[async_trait]
pub trait IngestionStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn ingest(&self, source: &Source) -> anyhow::Result<IngestionSummary>;
}

/// Categorised strategy failures. Strategies may return any error; these
/// variants let the service record a meaningful kind on the job.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("invalid source config: {0}")]
    Config(String),
}

impl StrategyError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Parse(_) => "parse",
            Self::Config(_) => "config",
        }
    }
}

/// Kind to record for an arbitrary strategy error.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<StrategyError>()
        .map(StrategyError::kind)
        .unwrap_or("strategy")
}

/// Strategy table keyed by source type, built once at startup.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<SourceType, Arc<dyn IngestionStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` for `source_type`, replacing any previous entry.
    pub fn register(&mut self, source_type: SourceType, strategy: Arc<dyn IngestionStrategy>) {
        info!(source_type = %source_type, strategy = strategy.name(), "registered ingestion strategy");
        self.strategies.insert(source_type, strategy);
    }

    pub fn with(mut self, source_type: SourceType, strategy: Arc<dyn IngestionStrategy>) -> Self {
        self.register(source_type, strategy);
        self
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn IngestionStrategy>> {
        self.strategies.get(&source_type).cloned()
    }

    pub fn supported_types(&self) -> Vec<SourceType> {
        let mut types: Vec<SourceType> = self.strategies.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl IngestionStrategy for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn ingest(&self, _source: &Source) -> anyhow::Result<IngestionSummary> {
            Ok(IngestionSummary::default())
        }
    }

    #[test]
    fn registry_lookup() {
        let registry = StrategyRegistry::new()
            .with(SourceType::Pubmed, Arc::new(Noop))
            .with(SourceType::Api, Arc::new(Noop));
        assert!(registry.get(SourceType::Pubmed).is_some());
        assert!(registry.get(SourceType::FileUpload).is_none());
        assert_eq!(registry.supported_types(), vec![SourceType::Api, SourceType::Pubmed]);
    }

    #[test]
    fn error_kind_downcasts() {
        let err: anyhow::Error = StrategyError::Parse("bad xml".into()).into();
        assert_eq!(error_kind(&err), "parse");

        let wrapped = err.context("while ingesting oncology");
        assert_eq!(error_kind(&wrapped), "parse");

        let plain = anyhow::anyhow!("socket closed");
        assert_eq!(error_kind(&plain), "strategy");
    }
}
