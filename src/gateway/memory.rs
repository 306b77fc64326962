//! In-memory gateway for tests and database-free dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::db::models::violation_models::{
    NewEvent, PersonMonthlyStat, ViolationEvent, STATUS_ACTIVE, STATUS_RESOLVED,
};
use crate::gateway::ViolationGateway;

#[derive(Default)]
pub struct MemoryViolationGateway {
    events: Mutex<Vec<ViolationEvent>>,
    /// When non-zero, the next N write operations fail (fault injection).
    fail_next: AtomicU32,
}

impl MemoryViolationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write operations fail, to exercise retry paths.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ViolationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn maybe_fail(&self) -> Result<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("injected persistence failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ViolationGateway for MemoryViolationGateway {
    async fn upsert_active_event(&self, event: &NewEvent) -> Result<Uuid> {
        self.maybe_fail()?;
        let mut events = self.events.lock().unwrap();
        if let Some(existing) = events.iter().find(|e| {
            e.status == STATUS_ACTIVE
                && e.channel_id == event.channel_id
                && e.person_track_id == event.person_track_id
                && e.violation_type == event.violation_type
        }) {
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        events.push(ViolationEvent {
            id,
            owner_id: event.owner_id,
            channel_id: event.channel_id,
            person_track_id: event.person_track_id,
            violation_type: event.violation_type.clone(),
            severity: event.severity.clone(),
            start_time: event.start_time,
            end_time: None,
            duration_seconds: None,
            snapshot_path: None,
            resolution_snapshot_path: None,
            status: STATUS_ACTIVE.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn reopen_event(&self, event_id: Uuid) -> Result<()> {
        self.maybe_fail()?;
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| anyhow!("no such event: {}", event_id))?;
        event.status = STATUS_ACTIVE.to_string();
        event.end_time = None;
        event.duration_seconds = None;
        event.resolution_snapshot_path = None;
        Ok(())
    }

    async fn resolve_event(
        &self,
        event_id: Uuid,
        end_time: DateTime<Utc>,
        resolution_snapshot_path: Option<String>,
    ) -> Result<()> {
        self.maybe_fail()?;
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id && e.status == STATUS_ACTIVE)
            .ok_or_else(|| anyhow!("no active event: {}", event_id))?;
        event.status = STATUS_RESOLVED.to_string();
        event.end_time = Some(end_time);
        event.duration_seconds = Some((end_time - event.start_time).num_seconds());
        event.resolution_snapshot_path = resolution_snapshot_path;
        Ok(())
    }

    async fn attach_snapshot(&self, event_id: Uuid, snapshot_path: &str) -> Result<()> {
        self.maybe_fail()?;
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| anyhow!("no such event: {}", event_id))?;
        event.snapshot_path = Some(snapshot_path.to_string());
        Ok(())
    }

    async fn get_active_events(&self, owner_id: Uuid) -> Result<Vec<ViolationEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.owner_id == owner_id && e.status == STATUS_ACTIVE)
            .cloned()
            .collect())
    }

    async fn get_person_monthly_stats(
        &self,
        person_track_id: i64,
        owner_id: Uuid,
        month: DateTime<Utc>,
    ) -> Result<Vec<PersonMonthlyStat>> {
        let events = self.events.lock().unwrap();
        let mut stats: HashMap<String, (i64, i64)> = HashMap::new();
        for event in events.iter().filter(|e| {
            e.person_track_id == person_track_id
                && e.owner_id == owner_id
                && e.start_time.year() == month.year()
                && e.start_time.month() == month.month()
        }) {
            let entry = stats.entry(event.violation_type.clone()).or_default();
            entry.0 += 1;
            entry.1 += event.duration_seconds.unwrap_or(0);
        }
        let mut result: Vec<PersonMonthlyStat> = stats
            .into_iter()
            .map(|(violation_type, (count, total))| PersonMonthlyStat {
                violation_type,
                count,
                total_duration_seconds: total,
            })
            .collect();
        result.sort_by(|a, b| a.violation_type.cmp(&b.violation_type));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_event(channel: Uuid, track: i64) -> NewEvent {
        NewEvent {
            owner_id: Uuid::nil(),
            channel_id: channel,
            person_track_id: track,
            violation_type: "helmet".to_string(),
            severity: "medium".to_string(),
            start_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_for_active_key() {
        let gateway = MemoryViolationGateway::new();
        let channel = Uuid::new_v4();
        let first = gateway.upsert_active_event(&new_event(channel, 1)).await.unwrap();
        let second = gateway.upsert_active_event(&new_event(channel, 1)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.event_count(), 1);
    }

    #[tokio::test]
    async fn resolve_computes_duration_from_start() {
        let gateway = MemoryViolationGateway::new();
        let mut event = new_event(Uuid::new_v4(), 2);
        event.start_time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let id = gateway.upsert_active_event(&event).await.unwrap();
        gateway
            .resolve_event(
                id,
                DateTime::from_timestamp(1_700_000_600, 0).unwrap(),
                None,
            )
            .await
            .unwrap();
        let stored = &gateway.events()[0];
        assert_eq!(stored.duration_seconds, Some(600));
        assert_eq!(stored.status, STATUS_RESOLVED);
    }
}
