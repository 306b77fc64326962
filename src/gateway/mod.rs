//! Persistence gateway boundary.
//!
//! The only shared mutable resource in the system. Workers never touch the
//! database directly; they submit ordered operations through an
//! `EventWriter`, which retries failed writes with bounded backoff and
//! flags the channel persistence-degraded while anything is pending, so a
//! violation transition is never silently dropped.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::violation_models::{NewEvent, PersonMonthlyStat, ViolationEvent};

pub mod memory;
pub mod pg;
pub mod writer;

pub use memory::MemoryViolationGateway;
pub use pg::PgViolationGateway;
pub use writer::{EventWriter, GatewayOp};

/// Durable storage contract for violation events and statistics.
#[async_trait]
pub trait ViolationGateway: Send + Sync {
    /// Open an active event, or return the existing active event's id for
    /// the same (channel, person_track, violation_type) key. Idempotent.
    async fn upsert_active_event(&self, event: &NewEvent) -> Result<Uuid>;

    /// Re-activate a resolved event (cooldown continuation).
    async fn reopen_event(&self, event_id: Uuid) -> Result<()>;

    /// Close an active event.
    async fn resolve_event(
        &self,
        event_id: Uuid,
        end_time: DateTime<Utc>,
        resolution_snapshot_path: Option<String>,
    ) -> Result<()>;

    /// Attach the onset snapshot path.
    async fn attach_snapshot(&self, event_id: Uuid, snapshot_path: &str) -> Result<()>;

    /// All active events for an owner.
    async fn get_active_events(&self, owner_id: Uuid) -> Result<Vec<ViolationEvent>>;

    /// Per-type counts and total durations for one person in one month.
    async fn get_person_monthly_stats(
        &self,
        person_track_id: i64,
        owner_id: Uuid,
        month: DateTime<Utc>,
    ) -> Result<Vec<PersonMonthlyStat>>;
}
