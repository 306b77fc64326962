//! The violation state machine.
//!
//! Converts per-frame (person-track, missing-PPE) observations into bounded
//! violation events: one event per occurrence regardless of how many frames
//! it spans, resolution when the violation stops being observed, and a
//! cooldown window after resolution during which a fresh occurrence
//! re-opens the prior event instead of creating a new one.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::TrackerConfig;
use crate::track::TrackId;

/// Identity of one violation lifecycle within a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub track_id: TrackId,
    pub violation_type: String,
}

impl EventKey {
    pub fn new(track_id: TrackId, violation_type: impl Into<String>) -> Self {
        Self {
            track_id,
            violation_type: violation_type.into(),
        }
    }
}

/// Externally visible lifecycle transitions. Continued observation of an
/// active violation emits nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Opened {
        key: EventKey,
        at: DateTime<Utc>,
    },
    /// A fresh occurrence within the cooldown window of the prior
    /// resolution; the prior event becomes active again.
    Reopened {
        key: EventKey,
        at: DateTime<Utc>,
    },
    Resolved {
        key: EventKey,
        started_at: DateTime<Utc>,
        at: DateTime<Utc>,
        duration_seconds: i64,
        /// Whether the person was still in frame at resolution time;
        /// gates the resolution snapshot.
        track_visible: bool,
    },
}

#[derive(Debug, Clone)]
struct ResolvedState {
    resolved_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
}

pub struct ViolationTracker {
    cooldown: Duration,
    /// key -> start time of the active event
    active: HashMap<EventKey, DateTime<Utc>>,
    /// keys resolved within the cooldown window
    recently_resolved: HashMap<EventKey, ResolvedState>,
}

impl ViolationTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            cooldown: Duration::seconds(config.cooldown_secs as i64),
            active: HashMap::new(),
            recently_resolved: HashMap::new(),
        }
    }

    /// Feed one frame's observations. `observations` lists every visible
    /// track with its (possibly empty) missing-PPE labels; `expired` lists
    /// tracks the correlator just dropped. Transitions come back in
    /// deterministic order: opens/reopens first, then resolutions.
    pub fn update(
        &mut self,
        observations: &[(TrackId, Vec<String>)],
        expired: &[TrackId],
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();

        let mut observed: Vec<EventKey> = Vec::new();
        for (track_id, missing) in observations {
            for violation_type in missing {
                observed.push(EventKey::new(*track_id, violation_type.clone()));
            }
        }

        for key in &observed {
            if self.active.contains_key(key) {
                continue; // still active: no writes, no snapshots
            }
            match self.recently_resolved.remove(key) {
                Some(prev) if now - prev.resolved_at < self.cooldown => {
                    // Continuation of the prior event; duration keeps
                    // accruing from the original start.
                    self.active.insert(key.clone(), prev.started_at);
                    transitions.push(Transition::Reopened {
                        key: key.clone(),
                        at: now,
                    });
                }
                _ => {
                    self.active.insert(key.clone(), now);
                    transitions.push(Transition::Opened {
                        key: key.clone(),
                        at: now,
                    });
                }
            }
        }

        // Resolve active events whose violation stopped being observed:
        // either the person is visible and now compliant, or their track
        // expired. A track merely silent (not yet expired) stays pending.
        let visible: Vec<TrackId> = observations.iter().map(|(id, _)| *id).collect();
        let mut to_resolve: Vec<(EventKey, bool)> = Vec::new();
        for key in self.active.keys() {
            if observed.contains(key) {
                continue;
            }
            if visible.contains(&key.track_id) {
                to_resolve.push((key.clone(), true));
            } else if expired.contains(&key.track_id) {
                to_resolve.push((key.clone(), false));
            }
        }
        to_resolve.sort_by(|a, b| {
            (a.0.track_id, &a.0.violation_type).cmp(&(b.0.track_id, &b.0.violation_type))
        });

        for (key, track_visible) in to_resolve {
            let started_at = self
                .active
                .remove(&key)
                .expect("resolving a key taken from the active map");
            self.recently_resolved.insert(
                key.clone(),
                ResolvedState {
                    resolved_at: now,
                    started_at,
                },
            );
            transitions.push(Transition::Resolved {
                key,
                started_at,
                at: now,
                duration_seconds: (now - started_at).num_seconds(),
                track_visible,
            });
        }

        self.recently_resolved
            .retain(|_, state| now - state.resolved_at < self.cooldown);

        transitions
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
