//! Build lifecycle events.
//!
//! Each event carries the full build and, when resolvable, the previous
//! build on the same branch so subscribers can compute deltas without a
//! second query. Publication is best-effort: a bus outage drops the event
//! with a warning and never fails the operation that caused it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::PipelineBuild;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildEventKind {
    BuildCreated,
    BuildStatusChanged,
    BuildStopped,
    BuildRestarted,
}

impl BuildEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildEventKind::BuildCreated => "build_created",
            BuildEventKind::BuildStatusChanged => "build_status_changed",
            BuildEventKind::BuildStopped => "build_stopped",
            BuildEventKind::BuildRestarted => "build_restarted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: BuildEventKind,
    pub build: PipelineBuild,
    pub previous: Option<PipelineBuild>,
}

#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: BuildEvent) -> anyhow::Result<()>;
}

/// Publish an event, demoting bus failures to a warning.
pub(crate) async fn emit(
    publisher: &dyn EventPublisher,
    kind: BuildEventKind,
    build: &PipelineBuild,
    previous: Option<&PipelineBuild>,
) {
    let event = BuildEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        kind,
        build: build.clone(),
        previous: previous.cloned(),
    };
    if let Err(e) = publisher.publish(event).await {
        crate::metrics::event_publish_failed(kind.as_str());
        tracing::warn!(
            build_id = build.id,
            kind = kind.as_str(),
            "dropping build event: {e}"
        );
    }
}

/// Publisher that logs events; the default when no bus is wired.
pub struct LogPublisher;

#[async_trait::async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: BuildEvent) -> anyhow::Result<()> {
        tracing::info!(
            build_id = event.build.id,
            status = event.build.status.as_str(),
            kind = event.kind.as_str(),
            "build event"
        );
        Ok(())
    }
}

/// Publisher that retains events in memory; used by tests and embedders
/// that poll instead of subscribing.
#[derive(Default)]
pub struct MemoryPublisher {
    events: std::sync::Mutex<Vec<BuildEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> MemoryPublisher {
        MemoryPublisher::default()
    }

    pub fn drain(&self) -> Vec<BuildEvent> {
        std::mem::take(&mut self.events.lock().expect("event buffer poisoned"))
    }

    pub fn kinds(&self) -> Vec<BuildEventKind> {
        self.events
            .lock()
            .expect("event buffer poisoned")
            .iter()
            .map(|e| e.kind)
            .collect()
    }
}

#[async_trait::async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: BuildEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .expect("event buffer poisoned")
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::test_build;

    struct FailingPublisher;

    #[async_trait::async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _event: BuildEvent) -> anyhow::Result<()> {
            anyhow::bail!("bus down")
        }
    }

    #[tokio::test]
    async fn memory_publisher_captures_events_in_order() {
        let publisher = MemoryPublisher::new();
        let pb = test_build();
        emit(&publisher, BuildEventKind::BuildCreated, &pb, None).await;
        emit(&publisher, BuildEventKind::BuildStatusChanged, &pb, Some(&pb)).await;

        let events = publisher.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, BuildEventKind::BuildCreated);
        assert!(events[0].previous.is_none());
        assert_eq!(events[1].previous.as_ref().map(|p| p.id), Some(pb.id));
    }

    #[tokio::test]
    async fn bus_outage_is_swallowed() {
        let pb = test_build();
        // Must not panic or propagate.
        emit(&FailingPublisher, BuildEventKind::BuildStopped, &pb, None).await;
    }
}
