//! Time-based scheduler backend for source ingestion.
//!
//! The backend keeps one [`ScheduledJob`] per scheduled source and hands out
//! jobs whose next run has passed. It never executes anything itself; the
//! ingestion service polls [`SchedulerBackend::get_due_jobs`] and runs them.

pub mod backend;
pub mod error;
pub mod job;
pub mod memory;
pub mod policy;

pub use backend::SchedulerBackend;
pub use error::SchedulerError;
pub use job::ScheduledJob;
pub use memory::InMemorySchedulerBackend;
pub use policy::next_run_after;
