//! Visibility gate for snapshot capture.
//!
//! A photo is only worth persisting when it is evidentiary: the person
//! fully in frame and large enough to recognize. Rejections are logged by
//! the caller and never block the violation lifecycle itself.

use crate::detect::BBox;

#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    /// Bounding box is not a well-ordered, finite rectangle
    Malformed,
    /// Bounding box extends outside the frame bounds
    OutOfFrame,
    /// Subject too small or far away to be evidentiary
    TooSmall { ratio: f32 },
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRejection::Malformed => write!(f, "malformed bounding box"),
            GateRejection::OutOfFrame => write!(f, "bounding box extends outside the frame"),
            GateRejection::TooSmall { ratio } => {
                write!(f, "subject covers only {:.1}% of the frame", ratio * 100.0)
            }
        }
    }
}

/// Decide whether a person with this bounding box is photographable.
pub fn evaluate(
    bbox: &BBox,
    frame_width: u32,
    frame_height: u32,
    min_area_ratio: f32,
) -> Result<(), GateRejection> {
    if !bbox.is_well_formed() {
        return Err(GateRejection::Malformed);
    }

    if bbox.x1 < 0.0
        || bbox.y1 < 0.0
        || bbox.x2 > frame_width as f32
        || bbox.y2 > frame_height as f32
    {
        return Err(GateRejection::OutOfFrame);
    }

    let frame_area = frame_width as f32 * frame_height as f32;
    if frame_area <= 0.0 {
        return Err(GateRejection::Malformed);
    }
    let ratio = bbox.area() / frame_area;
    if ratio < min_area_ratio {
        return Err(GateRejection::TooSmall { ratio });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 1920;
    const H: u32 = 1080;

    #[test]
    fn accepts_large_in_frame_subject() {
        // 8% of the frame, fully inside.
        let bbox = BBox::new(100.0, 100.0, 100.0 + 384.0, 100.0 + 432.0);
        assert!(evaluate(&bbox, W, H, 0.05).is_ok());
    }

    #[test]
    fn rejects_two_percent_subject() {
        let bbox = BBox::new(0.0, 0.0, 192.0, 216.0); // 2% of 1920x1080
        match evaluate(&bbox, W, H, 0.05) {
            Err(GateRejection::TooSmall { ratio }) => assert!((ratio - 0.02).abs() < 1e-3),
            other => panic!("expected TooSmall, got {:?}", other),
        }
    }

    #[test]
    fn rejects_out_of_frame_boxes() {
        assert_eq!(
            evaluate(&BBox::new(-5.0, 10.0, 500.0, 900.0), W, H, 0.05),
            Err(GateRejection::OutOfFrame)
        );
        assert_eq!(
            evaluate(&BBox::new(1500.0, 10.0, 1930.0, 900.0), W, H, 0.05),
            Err(GateRejection::OutOfFrame)
        );
    }

    #[test]
    fn rejects_malformed_boxes() {
        assert_eq!(
            evaluate(&BBox::new(500.0, 10.0, 100.0, 900.0), W, H, 0.05),
            Err(GateRejection::Malformed)
        );
        assert_eq!(
            evaluate(&BBox::new(0.0, 0.0, f32::INFINITY, 10.0), W, H, 0.05),
            Err(GateRejection::Malformed)
        );
    }
}
