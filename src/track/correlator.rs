//! Person correlation within one stream.
//!
//! Bounding-box proximity matching, not biometric re-identification: each
//! detection is matched to the nearest live track by IoU (with a center
//! distance fallback for fast movers), unmatched boxes spawn new tracks,
//! and tracks silent past the silence window expire. The whole heuristic
//! sits behind this type so a stronger tracker can replace it without
//! touching the violation state machine.

use chrono::{DateTime, Duration, Utc};

use crate::config::TrackerConfig;
use crate::detect::BBox;

pub type TrackId = u32;

/// Short-lived per-stream identity for one physical person.
#[derive(Debug, Clone)]
pub struct PersonTrack {
    pub id: TrackId,
    pub last_bbox: BBox,
    pub last_seen: DateTime<Utc>,
}

pub struct PersonCorrelator {
    tracks: Vec<PersonTrack>,
    next_id: TrackId,
    silence: Duration,
    min_iou: f32,
}

impl PersonCorrelator {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            silence: Duration::seconds(config.track_silence_secs as i64),
            min_iou: config.min_match_iou,
        }
    }

    /// Assign a track id to each detection box, in input order. Each live
    /// track is matched at most once; leftover boxes spawn fresh tracks.
    pub fn assign(&mut self, boxes: &[BBox], now: DateTime<Utc>) -> Vec<TrackId> {
        // Score every (detection, track) pair, best matches first.
        let mut scored: Vec<(usize, usize, f32)> = Vec::new();
        for (di, bbox) in boxes.iter().enumerate() {
            for (ti, track) in self.tracks.iter().enumerate() {
                if let Some(score) = self.match_score(bbox, &track.last_bbox) {
                    scored.push((di, ti, score));
                }
            }
        }
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut det_to_track: Vec<Option<usize>> = vec![None; boxes.len()];
        let mut track_taken = vec![false; self.tracks.len()];
        for (di, ti, _score) in scored {
            if det_to_track[di].is_none() && !track_taken[ti] {
                det_to_track[di] = Some(ti);
                track_taken[ti] = true;
            }
        }

        let mut ids = Vec::with_capacity(boxes.len());
        for (di, bbox) in boxes.iter().enumerate() {
            match det_to_track[di] {
                Some(ti) => {
                    let track = &mut self.tracks[ti];
                    track.last_bbox = *bbox;
                    track.last_seen = now;
                    ids.push(track.id);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(PersonTrack {
                        id,
                        last_bbox: *bbox,
                        last_seen: now,
                    });
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Remove and return tracks that have gone silent.
    pub fn expire_silent(&mut self, now: DateTime<Utc>) -> Vec<PersonTrack> {
        let silence = self.silence;
        let (expired, live): (Vec<_>, Vec<_>) = self
            .tracks
            .drain(..)
            .partition(|t| now - t.last_seen > silence);
        self.tracks = live;
        expired
    }

    pub fn live_count(&self) -> usize {
        self.tracks.len()
    }

    /// IoU when above threshold, otherwise a weak center-distance score
    /// for boxes that moved too far between frames to overlap.
    fn match_score(&self, detection: &BBox, track: &BBox) -> Option<f32> {
        let iou = detection.iou(track);
        if iou >= self.min_iou {
            return Some(iou);
        }
        let reach = track.width().hypot(track.height());
        let distance = detection.center_distance(track);
        if distance <= reach {
            // Always below any accepted IoU score so overlap wins ties.
            Some(self.min_iou * (1.0 - distance / reach) * 0.99)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn correlator() -> PersonCorrelator {
        PersonCorrelator::new(&TrackerConfig::default())
    }

    #[test]
    fn consecutive_overlapping_boxes_keep_one_identity() {
        let mut c = correlator();
        let ids0 = c.assign(&[BBox::new(100.0, 100.0, 200.0, 400.0)], at(0));
        let ids1 = c.assign(&[BBox::new(105.0, 102.0, 206.0, 404.0)], at(1));
        assert_eq!(ids0, ids1);
        assert_eq!(c.live_count(), 1);
    }

    #[test]
    fn distant_box_spawns_a_new_track() {
        let mut c = correlator();
        let first = c.assign(&[BBox::new(0.0, 0.0, 50.0, 150.0)], at(0));
        let second = c.assign(&[BBox::new(1500.0, 800.0, 1560.0, 1000.0)], at(1));
        assert_ne!(first[0], second[0]);
        assert_eq!(c.live_count(), 2);
    }

    #[test]
    fn two_people_keep_distinct_identities() {
        let mut c = correlator();
        let frame0 = c.assign(
            &[
                BBox::new(100.0, 100.0, 200.0, 400.0),
                BBox::new(600.0, 120.0, 700.0, 420.0),
            ],
            at(0),
        );
        // Both drift slightly; order of detections flips.
        let frame1 = c.assign(
            &[
                BBox::new(605.0, 121.0, 704.0, 419.0),
                BBox::new(104.0, 99.0, 204.0, 401.0),
            ],
            at(1),
        );
        assert_eq!(frame1[0], frame0[1]);
        assert_eq!(frame1[1], frame0[0]);
    }

    #[test]
    fn silent_track_expires_after_window() {
        let mut c = correlator();
        let ids = c.assign(&[BBox::new(100.0, 100.0, 200.0, 400.0)], at(0));

        // Within the 5s default silence window: still live.
        assert!(c.expire_silent(at(4)).is_empty());
        assert_eq!(c.live_count(), 1);

        let expired = c.expire_silent(at(6));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, ids[0]);
        assert_eq!(c.live_count(), 0);
    }

    #[test]
    fn fast_mover_is_matched_by_center_distance() {
        let mut c = correlator();
        let first = c.assign(&[BBox::new(100.0, 100.0, 160.0, 280.0)], at(0));
        // Moved past IoU overlap but within one box-diagonal of the track.
        let second = c.assign(&[BBox::new(180.0, 110.0, 240.0, 290.0)], at(1));
        assert_eq!(first, second);
    }
}
