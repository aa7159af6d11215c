//! Ingestion orchestration: scheduling, execution and job bookkeeping for
//! biomedical data sources.
//!
//! [`IngestionSchedulingService`] is the entry point. It binds a
//! [`SourceRepository`], an [`IngestionJobRepository`], a
//! [`SchedulerBackend`](biosource_scheduler::SchedulerBackend) and a
//! [`StrategyRegistry`], and is driven either by callers (manual triggers)
//! or by [`run_ingestion_scheduler`] (due scheduled jobs).

pub mod db;
pub mod error;
pub mod events;
pub mod poller;
pub mod repository;
pub mod service;
pub mod strategy;

pub use error::{IngestionError, RepositoryError};
pub use events::{EventBus, IngestionEvent};
pub use poller::run_ingestion_scheduler;
pub use repository::{
    InMemoryIngestionJobRepository, InMemorySourceRepository, IngestionJobRepository,
    PgIngestionJobRepository, PgSourceRepository, SourceRepository,
};
pub use service::{IngestionSchedulingService, RunReport, ServiceOptions};
pub use strategy::{IngestionStrategy, StrategyError, StrategyRegistry};
