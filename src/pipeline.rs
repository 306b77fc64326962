//! Per-channel processing pipeline.
//!
//! Consumes the frame queue one supervisor fills and drives the rest of the
//! engine: detection, person correlation, the violation state machine,
//! evidence snapshots, and persistence submissions. All per-person state
//! lives here, scoped to the channel, so channels never contend with each
//! other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{SnapshotConfig, TrackerConfig};
use crate::db::models::violation_models::NewEvent;
use crate::detect::{BBox, GuardedDetector};
use crate::gateway::writer::{EventWriter, GatewayOp};
use crate::snapshot::{evaluate, SnapshotKind, SnapshotManager};
use crate::stream::{Frame, StreamTarget};
use crate::track::{EventKey, PersonCorrelator, TrackId, Transition, ViolationTracker};

const DEFAULT_SEVERITY: &str = "medium";

pub struct ChannelPipeline {
    owner_id: Uuid,
    channel_id: Uuid,
    detector: Arc<GuardedDetector>,
    correlator: PersonCorrelator,
    tracker: ViolationTracker,
    snapshots: SnapshotManager,
    writer: EventWriter,
    min_area_ratio: f32,
    severity: HashMap<String, String>,
    cooldown: Duration,
    /// Resolution snapshot already written for a key's current event
    /// lifecycle, with the time it was last used. Entries outlive the
    /// cooldown window by at most one frame.
    resolution_paths: HashMap<EventKey, (String, DateTime<Utc>)>,
}

impl ChannelPipeline {
    pub fn new(
        target: &StreamTarget,
        detector: Arc<GuardedDetector>,
        tracker_config: &TrackerConfig,
        snapshot_config: &SnapshotConfig,
        writer: EventWriter,
    ) -> Self {
        Self {
            owner_id: target.owner_id,
            channel_id: target.channel_id,
            detector,
            correlator: PersonCorrelator::new(tracker_config),
            tracker: ViolationTracker::new(tracker_config),
            snapshots: SnapshotManager::from_config(snapshot_config),
            writer,
            min_area_ratio: snapshot_config.min_area_ratio,
            severity: tracker_config.severity.clone(),
            cooldown: Duration::seconds(tracker_config.cooldown_secs as i64),
            resolution_paths: HashMap::new(),
        }
    }

    /// Process frames until the supervisor closes the queue, then flush
    /// every pending persistence operation.
    pub async fn run(mut self, mut frames: mpsc::Receiver<Frame>) {
        while let Some(frame) = frames.recv().await {
            self.process_frame(&frame).await;
        }
        info!("channel {} pipeline draining", self.channel_id);
        self.writer.finish().await;
    }

    pub async fn process_frame(&mut self, frame: &Frame) {
        let now = frame.captured_at;
        let detections = self.detector.detect(frame).await;

        let boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
        let track_ids = self.correlator.assign(&boxes, now);
        let expired: Vec<TrackId> = self
            .correlator
            .expire_silent(now)
            .into_iter()
            .map(|t| t.id)
            .collect();

        let observations: Vec<(TrackId, Vec<String>)> = track_ids
            .iter()
            .zip(detections.iter())
            .map(|(id, d)| (*id, d.missing_ppe.clone()))
            .collect();
        let bbox_by_track: HashMap<TrackId, BBox> =
            track_ids.iter().copied().zip(boxes.iter().copied()).collect();

        for transition in self.tracker.update(&observations, &expired, now) {
            match transition {
                Transition::Opened { key, at } => {
                    self.resolution_paths.remove(&key);
                    self.writer.submit(GatewayOp::Open {
                        key: key.clone(),
                        event: self.new_event(&key, at),
                    });
                    if let Some(path) = self
                        .capture(&key, &bbox_by_track, frame, at, SnapshotKind::Onset)
                        .await
                    {
                        self.writer.submit(GatewayOp::Attach { key, path });
                    }
                }
                Transition::Reopened { key, at } => {
                    self.writer.submit(GatewayOp::Reopen {
                        key: key.clone(),
                        event: self.new_event(&key, at),
                    });
                }
                Transition::Resolved {
                    key,
                    at,
                    track_visible,
                    ..
                } => {
                    // A reopened event keeps the resolution snapshot from
                    // its first resolution; compliance flicker inside the
                    // cooldown window must not pile up files.
                    let reused = self.resolution_paths.get_mut(&key).map(|(path, touched)| {
                        *touched = at;
                        path.clone()
                    });
                    let resolution_snapshot_path = match reused {
                        Some(path) => Some(path),
                        None if track_visible => {
                            let path = self
                                .capture(&key, &bbox_by_track, frame, at, SnapshotKind::Resolution)
                                .await;
                            if let Some(p) = &path {
                                self.resolution_paths.insert(key.clone(), (p.clone(), at));
                            }
                            path
                        }
                        None => None,
                    };
                    self.writer.submit(GatewayOp::Resolve {
                        key,
                        end_time: at,
                        resolution_snapshot_path,
                    });
                }
            }
        }

        self.resolution_paths
            .retain(|_, (_, touched)| now - *touched < self.cooldown);
    }

    /// Write an evidence snapshot if the subject passes the visibility
    /// gate. Failure here never blocks the event lifecycle.
    async fn capture(
        &self,
        key: &EventKey,
        bbox_by_track: &HashMap<TrackId, BBox>,
        frame: &Frame,
        at: DateTime<Utc>,
        kind: SnapshotKind,
    ) -> Option<String> {
        let bbox = bbox_by_track.get(&key.track_id)?;

        if let Err(rejection) = evaluate(bbox, frame.width, frame.height, self.min_area_ratio) {
            debug!(
                "channel {} snapshot skipped for track {} ({}): {}",
                self.channel_id, key.track_id, key.violation_type, rejection
            );
            return None;
        }

        match self
            .snapshots
            .write(
                self.owner_id,
                self.channel_id,
                key.track_id,
                &key.violation_type,
                at,
                kind,
                &frame.jpeg,
            )
            .await
        {
            Ok(path) => Some(path),
            Err(err) => {
                error!("channel {} snapshot write failed: {}", self.channel_id, err);
                None
            }
        }
    }

    fn new_event(&self, key: &EventKey, start_time: DateTime<Utc>) -> NewEvent {
        let severity = self
            .severity
            .get(&key.violation_type)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SEVERITY.to_string());
        NewEvent {
            owner_id: self.owner_id,
            channel_id: self.channel_id,
            person_track_id: key.track_id as i64,
            violation_type: key.violation_type.clone(),
            severity,
            start_time,
        }
    }
}
