use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::violation_models::{NewEvent, PersonMonthlyStat, ViolationEvent};
use crate::db::repositories::ViolationsRepository;
use crate::gateway::ViolationGateway;

/// PostgreSQL-backed gateway over the violations repository.
#[derive(Clone)]
pub struct PgViolationGateway {
    repo: ViolationsRepository,
}

impl PgViolationGateway {
    pub fn new(repo: ViolationsRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ViolationGateway for PgViolationGateway {
    async fn upsert_active_event(&self, event: &NewEvent) -> Result<Uuid> {
        self.repo.upsert_active(event).await
    }

    async fn reopen_event(&self, event_id: Uuid) -> Result<()> {
        self.repo.reopen(event_id).await
    }

    async fn resolve_event(
        &self,
        event_id: Uuid,
        end_time: DateTime<Utc>,
        resolution_snapshot_path: Option<String>,
    ) -> Result<()> {
        self.repo
            .resolve(event_id, end_time, resolution_snapshot_path.as_deref())
            .await
    }

    async fn attach_snapshot(&self, event_id: Uuid, snapshot_path: &str) -> Result<()> {
        self.repo.attach_snapshot(event_id, snapshot_path).await
    }

    async fn get_active_events(&self, owner_id: Uuid) -> Result<Vec<ViolationEvent>> {
        self.repo.get_active_for_owner(owner_id).await
    }

    async fn get_person_monthly_stats(
        &self,
        person_track_id: i64,
        owner_id: Uuid,
        month: DateTime<Utc>,
    ) -> Result<Vec<PersonMonthlyStat>> {
        self.repo.monthly_stats(person_track_id, owner_id, month).await
    }
}
