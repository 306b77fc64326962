//! Ordered, retrying writer between the per-channel pipeline and the gateway.
//!
//! The pipeline never blocks on the database: it enqueues operations here and
//! a background task drains them in FIFO order, retrying each one with capped
//! backoff until it succeeds. While an operation is being retried the channel
//! health is flagged as persistence-degraded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::models::violation_models::NewEvent;
use crate::gateway::ViolationGateway;
use crate::stream::ChannelHealth;
use crate::track::EventKey;

const INITIAL_RETRY: Duration = Duration::from_secs(1);
const MAX_RETRY: Duration = Duration::from_secs(30);

/// How long a key -> row id mapping survives after its last use. Must
/// comfortably outlast any cooldown window so a reopen can still find the
/// resolved row's id.
const ID_RETENTION_SECS: i64 = 3600;

/// A persistence operation, keyed by the in-memory event identity so the
/// writer can map it to the database row id once the open lands.
#[derive(Debug)]
pub enum GatewayOp {
    Open { key: EventKey, event: NewEvent },
    Reopen { key: EventKey, event: NewEvent },
    Resolve {
        key: EventKey,
        end_time: DateTime<Utc>,
        resolution_snapshot_path: Option<String>,
    },
    Attach { key: EventKey, path: String },
}

pub struct EventWriter {
    tx: mpsc::UnboundedSender<GatewayOp>,
    handle: JoinHandle<()>,
}

impl EventWriter {
    pub fn spawn(
        gateway: Arc<dyn ViolationGateway>,
        health: Arc<RwLock<ChannelHealth>>,
    ) -> Self {
        Self::spawn_with_retry(gateway, health, INITIAL_RETRY, MAX_RETRY)
    }

    pub fn spawn_with_retry(
        gateway: Arc<dyn ViolationGateway>,
        health: Arc<RwLock<ChannelHealth>>,
        initial_retry: Duration,
        max_retry: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain(gateway, health, rx, initial_retry, max_retry));
        Self { tx, handle }
    }

    pub fn submit(&self, op: GatewayOp) {
        // The drain task only exits after the sender is dropped.
        if self.tx.send(op).is_err() {
            error!("event writer task is gone, dropping persistence op");
        }
    }

    /// Close the queue and wait for every queued operation to land.
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!("event writer task failed: {}", e);
        }
    }
}

async fn drain(
    gateway: Arc<dyn ViolationGateway>,
    health: Arc<RwLock<ChannelHealth>>,
    mut rx: mpsc::UnboundedReceiver<GatewayOp>,
    initial_retry: Duration,
    max_retry: Duration,
) {
    // In-memory event key -> database row id, filled in as opens land.
    // Entries linger past resolution so a cooldown reopen can address the
    // same row, and expire after ID_RETENTION_SECS of disuse.
    let mut ids: HashMap<EventKey, (Uuid, DateTime<Utc>)> = HashMap::new();

    while let Some(op) = rx.recv().await {
        let mut delay = initial_retry;
        loop {
            match apply(gateway.as_ref(), &mut ids, &op).await {
                Ok(()) => {
                    set_degraded(&health, false);
                    let cutoff = Utc::now() - chrono::Duration::seconds(ID_RETENTION_SECS);
                    ids.retain(|_, (_, touched)| *touched > cutoff);
                    break;
                }
                Err(e) => {
                    warn!(
                        "persistence op failed, retrying in {:?}: {}",
                        delay, e
                    );
                    set_degraded(&health, true);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_retry);
                }
            }
        }
    }
}

fn set_degraded(health: &RwLock<ChannelHealth>, degraded: bool) {
    if let Ok(mut health) = health.write() {
        health.persistence_degraded = degraded;
    }
}

async fn apply(
    gateway: &dyn ViolationGateway,
    ids: &mut HashMap<EventKey, (Uuid, DateTime<Utc>)>,
    op: &GatewayOp,
) -> anyhow::Result<()> {
    match op {
        GatewayOp::Open { key, event } => {
            let id = gateway.upsert_active_event(event).await?;
            ids.insert(key.clone(), (id, Utc::now()));
        }
        GatewayOp::Reopen { key, event } => match ids.get_mut(key) {
            Some((id, touched)) => {
                gateway.reopen_event(*id).await?;
                *touched = Utc::now();
            }
            // The open may have happened before a restart; the upsert finds
            // an active row by key or creates a fresh one.
            None => {
                let id = gateway.upsert_active_event(event).await?;
                ids.insert(key.clone(), (id, Utc::now()));
            }
        },
        GatewayOp::Resolve {
            key,
            end_time,
            resolution_snapshot_path,
        } => {
            if let Some((id, touched)) = ids.get_mut(key) {
                gateway
                    .resolve_event(*id, *end_time, resolution_snapshot_path.clone())
                    .await?;
                *touched = Utc::now();
            } else {
                warn!("resolve for unknown event key {:?}, skipping", key);
            }
        }
        GatewayOp::Attach { key, path } => {
            if let Some((id, touched)) = ids.get_mut(key) {
                gateway.attach_snapshot(*id, path).await?;
                *touched = Utc::now();
            } else {
                warn!("snapshot attach for unknown event key {:?}, skipping", key);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::violation_models::STATUS_RESOLVED;
    use crate::gateway::MemoryViolationGateway;

    fn key(track: u32) -> EventKey {
        EventKey {
            track_id: track,
            violation_type: "helmet".to_string(),
        }
    }

    fn event(channel: Uuid, track: u32) -> NewEvent {
        NewEvent {
            owner_id: Uuid::nil(),
            channel_id: channel,
            person_track_id: track as i64,
            violation_type: "helmet".to_string(),
            severity: "medium".to_string(),
            start_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_attach_resolve_land_in_order() {
        let gateway = Arc::new(MemoryViolationGateway::new());
        let health = Arc::new(RwLock::new(ChannelHealth::default()));
        let writer = EventWriter::spawn(gateway.clone(), health.clone());

        let channel = Uuid::new_v4();
        writer.submit(GatewayOp::Open { key: key(1), event: event(channel, 1) });
        writer.submit(GatewayOp::Attach {
            key: key(1),
            path: "violations/a/b/x.jpg".to_string(),
        });
        writer.submit(GatewayOp::Resolve {
            key: key(1),
            end_time: Utc::now(),
            resolution_snapshot_path: None,
        });
        writer.finish().await;

        let events = gateway.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, STATUS_RESOLVED);
        assert_eq!(events[0].snapshot_path.as_deref(), Some("violations/a/b/x.jpg"));
        assert!(!health.read().unwrap().persistence_degraded);
    }

    #[tokio::test]
    async fn retries_until_gateway_recovers() {
        let gateway = Arc::new(MemoryViolationGateway::new());
        gateway.fail_next_writes(2);
        let health = Arc::new(RwLock::new(ChannelHealth::default()));
        let writer = EventWriter::spawn_with_retry(
            gateway.clone(),
            health.clone(),
            Duration::from_millis(1),
            Duration::from_millis(4),
        );

        writer.submit(GatewayOp::Open {
            key: key(7),
            event: event(Uuid::new_v4(), 7),
        });
        writer.finish().await;

        // The op retried through the injected failures and still landed.
        assert_eq!(gateway.event_count(), 1);
        assert!(!health.read().unwrap().persistence_degraded);
    }

    #[tokio::test]
    async fn reopen_after_resolve_reuses_the_same_row() {
        let gateway = Arc::new(MemoryViolationGateway::new());
        let health = Arc::new(RwLock::new(ChannelHealth::default()));
        let writer = EventWriter::spawn(gateway.clone(), health);

        writer.submit(GatewayOp::Open { key: key(1), event: event(Uuid::new_v4(), 1) });
        writer.submit(GatewayOp::Resolve {
            key: key(1),
            end_time: Utc::now(),
            resolution_snapshot_path: None,
        });
        writer.submit(GatewayOp::Reopen { key: key(1), event: event(Uuid::new_v4(), 1) });
        writer.finish().await;

        let events = gateway.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, crate::db::models::violation_models::STATUS_ACTIVE);
        assert!(events[0].end_time.is_none());
    }

    #[tokio::test]
    async fn reopen_without_known_id_falls_back_to_upsert() {
        let gateway = Arc::new(MemoryViolationGateway::new());
        let health = Arc::new(RwLock::new(ChannelHealth::default()));
        let writer = EventWriter::spawn(gateway.clone(), health.clone());

        writer.submit(GatewayOp::Reopen {
            key: key(3),
            event: event(Uuid::new_v4(), 3),
        });
        writer.finish().await;

        assert_eq!(gateway.event_count(), 1);
    }
}
