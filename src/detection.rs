use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

/// COCO ids of car, motorcycle, bus and truck.
pub const VEHICLE_CLASSES: [i32; 4] = [2, 3, 5, 7];

/// One detector box as handed over for a single frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Ltrb>,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: i32,
}

impl Detection {
    #[inline]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class: i32, confidence: f32) -> Self {
        Self {
            bbox: BBox::ltrb(x1, y1, x2, y2),
            confidence,
            class,
        }
    }

    #[inline(always)]
    pub fn center(&self) -> na::Point2<f32> {
        self.bbox.center()
    }

    /// Well-formed box and a confidence within `[0, 1]`.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid() && (0.0..=1.0).contains(&self.confidence)
    }

    #[inline]
    pub fn distance_to(&self, pt: &na::Point2<f32>) -> f32 {
        na::distance(&self.center(), pt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detector_output() {
        let det: Detection =
            serde_json::from_str(r#"{"bbox":[10,20,30,40],"c":2,"p":0.87}"#).unwrap();

        assert_eq!(det.class, 2);
        assert_eq!(det.center(), na::Point2::new(20.0, 30.0));
        assert!(det.is_valid());
    }

    #[test]
    fn confidence_outside_unit_range_is_invalid() {
        for p in [-0.1, 1.5, f32::NAN, f32::INFINITY] {
            assert!(!Detection::new(0.0, 0.0, 10.0, 10.0, 2, p).is_valid(), "p = {}", p);
        }

        assert!(Detection::new(0.0, 0.0, 10.0, 10.0, 2, 0.0).is_valid());
        assert!(Detection::new(0.0, 0.0, 10.0, 10.0, 2, 1.0).is_valid());
    }

    #[test]
    fn distance_is_between_centers() {
        let det = Detection::new(0.0, 0.0, 10.0, 10.0, 2, 0.9);

        assert_eq!(det.distance_to(&na::Point2::new(8.0, 9.0)), 5.0);
    }
}
