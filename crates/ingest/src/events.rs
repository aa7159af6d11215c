//! Lifecycle notifications for ingestion jobs and schedules.
//!
//! Publishing is best effort: the service never waits on or depends on a
//! subscriber, and a send with no receivers is not an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use biosource_core::{IngestionTrigger, JobStatus};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestionEvent {
    JobStarted {
        job_id: Uuid,
        source_id: Uuid,
        trigger: IngestionTrigger,
        at: DateTime<Utc>,
    },
    JobFinished {
        job_id: Uuid,
        source_id: Uuid,
        status: JobStatus,
        duration_ms: Option<i64>,
        at: DateTime<Utc>,
    },
    ScheduleRegistered {
        source_id: Uuid,
        scheduled_job_id: String,
        next_run_at: DateTime<Utc>,
    },
    ScheduleRemoved {
        source_id: Uuid,
        scheduled_job_id: String,
    },
}

/// Fan-out channel for [`IngestionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestionEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: IngestionEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!("no event subscribers");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        let delivered = bus.publish(IngestionEvent::ScheduleRemoved {
            source_id: Uuid::new_v4(),
            scheduled_job_id: "gone".into(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();
        bus.publish(IngestionEvent::JobStarted {
            job_id,
            source_id: Uuid::new_v4(),
            trigger: IngestionTrigger::Manual,
            at: Utc::now(),
        });
        match rx.recv().await.unwrap() {
            IngestionEvent::JobStarted { job_id: got, .. } => assert_eq!(got, job_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(IngestionEvent::ScheduleRemoved {
            source_id: Uuid::nil(),
            scheduled_job_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "schedule_removed");
        assert_eq!(json["scheduled_job_id"], "abc");
    }
}
