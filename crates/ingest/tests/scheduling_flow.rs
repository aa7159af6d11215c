//! End-to-end scheduling flows through the public API: PubMed strategy with
//! a fixture gateway, in-memory repositories, and the background poller.
//!
//! The PostgreSQL round trip is `#[ignore]`d for CI; run it against a real
//! database with `cargo test -p biosource-ingest -- --ignored` and `PG_*` set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;

use biosource_core::{
    Clock, Config, IngestionJob, IngestionTrigger, JobStatus, ManualClock, PubMedSettings,
    Schedule, ScheduleFrequency, Source, SourceType,
};
use biosource_ingest::db::init_pg_pool;
use biosource_ingest::strategy::{
    InMemoryPublicationSink, PubMedGateway, PubMedStrategy, RawPublication,
};
use biosource_ingest::{
    run_ingestion_scheduler, InMemoryIngestionJobRepository, InMemorySourceRepository,
    IngestionJobRepository, IngestionSchedulingService, PgIngestionJobRepository,
    StrategyRegistry,
};
use biosource_scheduler::{InMemorySchedulerBackend, SchedulerBackend};

struct FixtureGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl PubMedGateway for FixtureGateway {
    async fn search(&self, query: &str, _max_results: u32) -> anyhow::Result<Vec<RawPublication>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            RawPublication {
                pmid: Some("38000001".into()),
                relevance_score: Some(0.92),
                payload: serde_json::json!({
                    "title": format!("{query} variants in hereditary breast cancer"),
                    "journal": "J Clin Oncol",
                    "pub_date": "2024-01-15",
                }),
            },
            RawPublication {
                pmid: Some("38000002".into()),
                relevance_score: Some(0.15),
                payload: serde_json::json!({"title": "Unrelated cohort study"}),
            },
        ])
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 6, 0, 0).unwrap()
}

struct World {
    service: Arc<IngestionSchedulingService>,
    sources: Arc<InMemorySourceRepository>,
    jobs: Arc<InMemoryIngestionJobRepository>,
    backend: Arc<InMemorySchedulerBackend>,
    gateway: Arc<FixtureGateway>,
    sink: Arc<InMemoryPublicationSink>,
    clock: ManualClock,
}

fn world() -> World {
    let clock = ManualClock::new(t0());
    let sources = Arc::new(InMemorySourceRepository::new());
    let jobs = Arc::new(InMemoryIngestionJobRepository::new());
    let backend = Arc::new(InMemorySchedulerBackend::new(Arc::new(clock.clone())));
    let gateway = Arc::new(FixtureGateway {
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(InMemoryPublicationSink::new());

    let pubmed = PubMedStrategy::new(gateway.clone(), sink.clone(), PubMedSettings::default());
    let strategies = StrategyRegistry::new().with(SourceType::Pubmed, Arc::new(pubmed));

    let service = IngestionSchedulingService::new(
        sources.clone(),
        jobs.clone(),
        backend.clone(),
        strategies,
        Arc::new(clock.clone()),
    );

    World {
        service: Arc::new(service),
        sources,
        jobs,
        backend,
        gateway,
        sink,
        clock,
    }
}

fn brca_source(schedule: Schedule) -> Source {
    Source::new(
        "BRCA1 literature",
        SourceType::Pubmed,
        serde_json::json!({"query": "BRCA1", "relevance_threshold": 0.5}),
    )
    .with_schedule(schedule)
}

#[tokio::test]
async fn scheduled_pubmed_ingestion_end_to_end() {
    let w = world();
    let source = brca_source(
        Schedule::every(ScheduleFrequency::Hourly).starting_at(t0() - Duration::hours(1)),
    );
    let id = source.id;
    w.sources.insert(source).unwrap();

    let scheduled = w.service.schedule_source(id).await.unwrap();
    assert_eq!(scheduled.next_run_at, t0() + Duration::hours(1));

    let due_at = t0() + Duration::hours(1);
    w.clock.set(due_at);
    let report = w.service.run_due_jobs(due_at).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(w.gateway.calls.load(Ordering::SeqCst), 1);

    let history = w.service.job_history(id).await.unwrap();
    assert_eq!(history.len(), 1);
    let job = &history[0];
    assert_eq!(job.trigger, IngestionTrigger::Scheduled);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.metrics["records_fetched"], 2);
    assert_eq!(job.metrics["records_filtered"], 1);
    assert_eq!(job.metrics["records_created"], 1);
    assert_eq!(job.source_config_snapshot["query"], "BRCA1");
    assert_eq!(
        w.jobs.status_history(job.id).unwrap(),
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );

    assert!(w.sink.get("38000001").unwrap().is_some());
    assert!(w.sink.get("38000002").unwrap().is_none());

    let stored = w.sources.get(id).unwrap().unwrap();
    assert_eq!(stored.last_ingested_at, Some(due_at));

    let next = w.backend.get_job(&scheduled.job_id).unwrap().unwrap();
    assert_eq!(next.next_run_at, due_at + Duration::hours(1));
}

#[tokio::test]
async fn manual_trigger_bypasses_backend() {
    let w = world();
    let source = brca_source(Schedule::manual());
    let id = source.id;
    w.sources.insert(source).unwrap();

    let summary = w.service.trigger_ingestion(id, None).await.unwrap();
    assert_eq!(summary.created, 1);
    assert!(w.backend.is_empty().unwrap());

    // Second run sees the publication already stored.
    let summary = w.service.trigger_ingestion(id, None).await.unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 1);
    assert_eq!(w.service.job_history(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn poller_runs_due_jobs_until_shutdown() {
    let w = world();
    let source = brca_source(Schedule::every(ScheduleFrequency::Daily));
    let id = source.id;
    w.sources.insert(source).unwrap();
    w.service.restore_schedules().await.unwrap();

    // Already past the first window when the poller starts.
    w.clock.advance(Duration::days(1) + Duration::minutes(1));
    assert!(w.service.clock().now() > t0() + Duration::days(1));

    let shutdown = Arc::new(Notify::new());
    let handle = tokio::spawn(run_ingestion_scheduler(
        w.service.clone(),
        StdDuration::from_millis(10),
        shutdown.clone(),
    ));

    let mut completed = false;
    for _ in 0..200 {
        let history = w.service.job_history(id).await.unwrap();
        if history.iter().any(|j| j.status == JobStatus::Completed) {
            completed = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(completed, "poller never ran the due job");

    shutdown.notify_one();
    tokio::time::timeout(StdDuration::from_secs(2), handle)
        .await
        .expect("poller did not stop")
        .unwrap();

    // Several ticks elapsed, but the window was handed out only once.
    assert_eq!(w.gateway.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore]
async fn postgres_job_repository_round_trip() {
    biosource_core::config::load_dotenv();
    let config = Config::from_env();
    let pool = init_pg_pool(&config.postgres)
        .await
        .expect("PostgreSQL must be configured for this test");
    let repo = PgIngestionJobRepository::new(pool);

    let source = brca_source(Schedule::manual());
    let mut job = IngestionJob::new(&source, IngestionTrigger::Api, None, Utc::now());
    repo.save(&job).await.unwrap();
    job.start(Utc::now()).unwrap();
    repo.save(&job).await.unwrap();
    job.fail(Utc::now(), "fetch", "connection reset").unwrap();
    let saved = repo.save(&job).await.unwrap();

    assert_eq!(saved.status, JobStatus::Failed);
    assert_eq!(saved.errors[0].message, "connection reset");
    let history = repo.list_for_source(source.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, job.id);
}
