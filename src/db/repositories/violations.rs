use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::violation_models::{NewEvent, PersonMonthlyStat, ViolationEvent};
use crate::error::Error;

const EVENT_COLUMNS: &str = "id, owner_id, channel_id, person_track_id, violation_type, severity, \
     start_time, end_time, duration_seconds, snapshot_path, resolution_snapshot_path, status, created_at";

/// Violation events repository
#[derive(Clone)]
pub struct ViolationsRepository {
    pool: Arc<PgPool>,
}

impl ViolationsRepository {
    /// Create a new violations repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Open an active event for the key, or return the existing active
    /// event's id. The partial unique index over active rows makes this
    /// atomic under concurrent writers, so a briefly split person track
    /// cannot produce duplicate active events.
    pub async fn upsert_active(&self, event: &NewEvent) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO violation_events (
                id, owner_id, channel_id, person_track_id, violation_type, severity, start_time, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'active')
            ON CONFLICT (channel_id, person_track_id, violation_type) WHERE status = 'active'
            DO UPDATE SET status = violation_events.status
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.owner_id)
        .bind(event.channel_id)
        .bind(event.person_track_id)
        .bind(&event.violation_type)
        .bind(&event.severity)
        .bind(event.start_time)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to upsert active event: {}", e)))?;

        Ok(id)
    }

    /// Re-activate a resolved event within its cooldown window.
    pub async fn reopen(&self, event_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE violation_events
            SET status = 'active', end_time = NULL, duration_seconds = NULL,
                resolution_snapshot_path = NULL
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to reopen event: {}", e)))?;

        Ok(())
    }

    /// Resolve an active event.
    pub async fn resolve(
        &self,
        event_id: Uuid,
        end_time: DateTime<Utc>,
        resolution_snapshot_path: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE violation_events
            SET status = 'resolved', end_time = $2,
                duration_seconds = EXTRACT(EPOCH FROM ($2 - start_time))::BIGINT,
                resolution_snapshot_path = $3
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(event_id)
        .bind(end_time)
        .bind(resolution_snapshot_path)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to resolve event: {}", e)))?;

        Ok(())
    }

    /// Attach the onset snapshot to an event.
    pub async fn attach_snapshot(&self, event_id: Uuid, snapshot_path: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE violation_events
            SET snapshot_path = $2
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(snapshot_path)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to attach snapshot: {}", e)))?;

        Ok(())
    }

    /// All currently active events for an owner.
    pub async fn get_active_for_owner(&self, owner_id: Uuid) -> Result<Vec<ViolationEvent>> {
        let result = sqlx::query_as::<_, ViolationEvent>(&format!(
            r#"
            SELECT {}
            FROM violation_events
            WHERE owner_id = $1 AND status = 'active'
            ORDER BY start_time DESC
            "#,
            EVENT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get active events: {}", e)))?;

        Ok(result)
    }

    /// Events for a channel, newest first.
    pub async fn get_by_channel(
        &self,
        channel_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ViolationEvent>> {
        let limit = limit.unwrap_or(100);

        let result = sqlx::query_as::<_, ViolationEvent>(&format!(
            r#"
            SELECT {}
            FROM violation_events
            WHERE channel_id = $1
            ORDER BY start_time DESC
            LIMIT $2
            "#,
            EVENT_COLUMNS
        ))
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get events for channel: {}", e)))?;

        Ok(result)
    }

    /// Per-violation-type counts and durations for one person in one month.
    pub async fn monthly_stats(
        &self,
        person_track_id: i64,
        owner_id: Uuid,
        month: DateTime<Utc>,
    ) -> Result<Vec<PersonMonthlyStat>> {
        let result = sqlx::query_as::<_, PersonMonthlyStat>(
            r#"
            SELECT violation_type,
                   COUNT(*) AS count,
                   COALESCE(SUM(duration_seconds), 0)::BIGINT AS total_duration_seconds
            FROM violation_events
            WHERE person_track_id = $1
              AND owner_id = $2
              AND date_trunc('month', start_time) = date_trunc('month', $3::timestamptz)
            GROUP BY violation_type
            ORDER BY violation_type
            "#,
        )
        .bind(person_track_id)
        .bind(owner_id)
        .bind(month)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get monthly stats: {}", e)))?;

        Ok(result)
    }

    /// Delete resolved events older than a cutoff date.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM violation_events
            WHERE status = 'resolved' AND start_time < $1
            "#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to delete old events: {}", e)))?;

        Ok(result.rows_affected())
    }
}
