//! Detection adapter boundary.
//!
//! The object-detection model is an external collaborator: a pure function
//! from frame to per-person PPE findings. Adapter failures are downgraded
//! to "no detections this frame" so a flaky model service can never stall
//! or kill a channel.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::stream::Frame;

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_well_formed(&self) -> bool {
        self.x1.is_finite()
            && self.y1.is_finite()
            && self.x2.is_finite()
            && self.y2.is_finite()
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Intersection over union with another box. Zero when disjoint or
    /// either box is degenerate.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    pub fn center_distance(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// One detected person and the PPE items missing on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonDetection {
    pub bbox: BBox,
    pub missing_ppe: Vec<String>,
    pub confidence: f32,
}

/// External detection model contract: frame in, per-person findings out.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<PersonDetection>>;
}

/// Placeholder adapter for deployments where the model service is not
/// wired up yet. Yields no detections.
pub struct NullDetector;

#[async_trait]
impl Detector for NullDetector {
    async fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<PersonDetection>> {
        Ok(Vec::new())
    }
}

/// Required-PPE set for one sector. Data-driven: sectors are configuration,
/// not branching inside the tracker.
#[derive(Debug, Clone)]
pub struct SectorProfile {
    name: String,
    required: HashSet<String>,
}

static BUILTIN_SECTORS: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    let mut sectors = HashMap::new();
    sectors.insert(
        "construction".to_string(),
        vec!["helmet".to_string(), "vest".to_string()],
    );
    sectors.insert("logistics".to_string(), vec!["vest".to_string()]);
    sectors.insert(
        "manufacturing".to_string(),
        vec![
            "helmet".to_string(),
            "goggles".to_string(),
            "gloves".to_string(),
        ],
    );
    sectors
});

impl SectorProfile {
    /// Resolve the active sector from config; config-defined sectors are
    /// merged over the built-in ones. An unknown sector name falls back to
    /// requiring everything the model can report.
    pub fn from_config(config: &DetectionConfig) -> Self {
        let mut sectors = BUILTIN_SECTORS.clone();
        for (name, items) in &config.sectors {
            sectors.insert(name.clone(), items.clone());
        }

        match sectors.remove(&config.sector) {
            Some(items) => Self {
                name: config.sector.clone(),
                required: items.into_iter().collect(),
            },
            None => {
                warn!(
                    "unknown sector '{}'; all reported PPE items will be enforced",
                    config.sector
                );
                Self {
                    name: config.sector.clone(),
                    required: HashSet::new(),
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop missing-PPE labels this sector does not require. An empty
    /// required set enforces everything.
    pub fn filter(&self, missing: Vec<String>) -> Vec<String> {
        if self.required.is_empty() {
            return missing;
        }
        missing
            .into_iter()
            .filter(|item| self.required.contains(item))
            .collect()
    }
}

/// Wraps the external detector with the failure policy and the sector
/// filter. Errors are logged and mapped to an empty result; persons are
/// kept even when fully compliant (the correlator needs their boxes).
pub struct GuardedDetector {
    inner: std::sync::Arc<dyn Detector>,
    min_confidence: f32,
    profile: SectorProfile,
}

impl GuardedDetector {
    pub fn new(inner: std::sync::Arc<dyn Detector>, config: &DetectionConfig) -> Self {
        Self {
            inner,
            min_confidence: config.min_confidence,
            profile: SectorProfile::from_config(config),
        }
    }

    pub async fn detect(&self, frame: &Frame) -> Vec<PersonDetection> {
        let detections = match self.inner.detect(frame).await {
            Ok(detections) => detections,
            Err(err) => {
                warn!("detection adapter failed, treating as no detections: {}", err);
                return Vec::new();
            }
        };

        detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence && d.bbox.is_well_formed())
            .map(|mut d| {
                d.missing_ppe = self.profile.filter(std::mem::take(&mut d.missing_ppe));
                d
            })
            .collect()
    }
}
