use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Violation event model: one bounded interval during which one person
/// lacked one piece of required PPE. Append-mostly; never mutated again
/// after final resolution.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ViolationEvent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub channel_id: Uuid,
    pub person_track_id: i64,
    pub violation_type: String,
    pub severity: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub snapshot_path: Option<String>,
    pub resolution_snapshot_path: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to open a new active event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub owner_id: Uuid,
    pub channel_id: Uuid,
    pub person_track_id: i64,
    pub violation_type: String,
    pub severity: String,
    pub start_time: DateTime<Utc>,
}

/// Aggregated per-person monthly statistics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersonMonthlyStat {
    pub violation_type: String,
    pub count: i64,
    pub total_duration_seconds: i64,
}

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_RESOLVED: &str = "resolved";
