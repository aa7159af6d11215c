pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod schedule;
pub mod source;
pub mod summary;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, PostgresConfig, PubMedSettings, SchedulerSettings};
pub use error::*;
pub use job::*;
pub use schedule::*;
pub use source::*;
pub use summary::IngestionSummary;
