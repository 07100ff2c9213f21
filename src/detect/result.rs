use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::zone::Point;

/// Axis-aligned bounding box in pixel coordinates, `x1 < x2`, `y1 < y2`.
///
/// Serialized as `[x1, y1, x2, y2]`, the detector's `xyxy` layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box whose integer center is exactly `center`. Handy for scripted detectors.
    pub fn around(center: Point, half_width: i32, half_height: i32) -> Self {
        Self::new(
            center.x - half_width,
            center.y - half_height,
            center.x + half_width,
            center.y + half_height,
        )
    }

    /// Box center, integer-truncated. This is the point tested against zones.
    pub fn reference_point(&self) -> Point {
        Point::new(
            ((self.x1 as i64 + self.x2 as i64) / 2) as i32,
            ((self.y1 as i64 + self.y2 as i64) / 2) as i32,
        )
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_well_formed(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One object found by the detector on one frame. Not retained past assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Convenience constructor for a `person` detection centered on `center`.
    pub fn person_at(center: Point) -> Self {
        Self::new("person", 0.9, BoundingBox::around(center, 4, 8))
    }

    pub fn reference_point(&self) -> Point {
        self.bbox.reference_point()
    }

    /// Reject data no real detector would produce.
    pub fn validate(&self) -> Result<()> {
        if !self.bbox.is_well_formed() {
            return Err(anyhow!(
                "malformed bounding box [{}, {}, {}, {}]",
                self.bbox.x1,
                self.bbox.y1,
                self.bbox.x2,
                self.bbox.y2
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!("confidence {} out of bounds", self.confidence));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_point_truncates() {
        let b = BoundingBox::new(1, 2, 4, 7);
        assert_eq!(b.reference_point(), Point::new(2, 4));
        let b = BoundingBox::around(Point::new(5, 5), 3, 6);
        assert_eq!(b.reference_point(), Point::new(5, 5));
    }

    #[test]
    fn validation_rejects_malformed_data() {
        let ok = Detection::new("person", 0.5, BoundingBox::new(0, 0, 10, 10));
        assert!(ok.validate().is_ok());

        let inverted = Detection::new("person", 0.5, BoundingBox::new(10, 0, 0, 10));
        assert!(inverted.validate().is_err());

        let flat = Detection::new("person", 0.5, BoundingBox::new(0, 5, 10, 5));
        assert!(flat.validate().is_err());

        let nan = Detection::new("person", f32::NAN, BoundingBox::new(0, 0, 10, 10));
        assert!(nan.validate().is_err());

        let over = Detection::new("person", 1.2, BoundingBox::new(0, 0, 10, 10));
        assert!(over.validate().is_err());
    }

    #[test]
    fn detection_json_uses_xyxy_array() {
        let det: Detection =
            serde_json::from_str(r#"{"label":"person","confidence":0.8,"bbox":[0,0,10,20]}"#)
                .unwrap();
        assert_eq!(det.bbox, BoundingBox::new(0, 0, 10, 20));
        assert_eq!(det.reference_point(), Point::new(5, 10));
    }
}
