//! Ingestion scheduling service -- binds repositories, the scheduler backend
//! and the strategy table.
//!
//! Split into focused submodules:
//! - `core`: service struct, constructor, options and the single-flight guard
//! - `scheduling`: schedule / unschedule / restore and the due-job sweep
//! - `execution`: the shared job lifecycle plus manual, retry and cancel entry points

mod core;
mod execution;
mod scheduling;

pub use self::core::{IngestionSchedulingService, RunReport, ServiceOptions};
