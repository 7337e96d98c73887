use nalgebra as na;

use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;
use crate::classifier::Status;
use crate::owners::OwnerRecord;
use crate::Detection;

/// One observation of a track: where its box center was, and when.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub frame: u64,
    pub center: na::Point2<f32>,
    pub timestamp: f32, // in seconds
}

/// A persistent identity for one vehicle across frames.
///
/// Only the store appends samples; only the speed estimator raises the
/// running maximum; only the classifier moves the status and the one-shot
/// `notified` flag.
#[derive(Debug, Clone)]
pub struct Track {
    pub(crate) id: u32,
    pub(crate) class: i32,
    pub(crate) confidence: f32,
    pub(crate) bbox: BBox<Ltrb>,
    pub(crate) history: CircularQueue<Sample>,
    pub(crate) first_frame: u64,
    pub(crate) last_frame: u64,
    pub(crate) hits: u32,
    pub(crate) last_speed_kmh: Option<f32>,
    pub(crate) max_speed_kmh: f32,
    pub(crate) speed_capped: bool,
    pub(crate) status: Status,
    pub(crate) notified: bool,
    pub(crate) plate_text: Option<String>,
    pub(crate) owner: Option<OwnerRecord>,
}

impl Track {
    pub(crate) fn new(
        id: u32,
        det: &Detection,
        frame: u64,
        timestamp: f32,
        history_capacity: usize,
    ) -> Self {
        let mut history = CircularQueue::with_capacity(history_capacity);
        history.push(Sample {
            frame,
            center: det.center(),
            timestamp,
        });

        Self {
            id,
            class: det.class,
            confidence: det.confidence,
            bbox: det.bbox,
            history,
            first_frame: frame,
            last_frame: frame,
            hits: 1,
            last_speed_kmh: None,
            max_speed_kmh: 0.0,
            speed_capped: false,
            status: Status::Unknown,
            notified: false,
            plate_text: None,
            owner: None,
        }
    }

    /// Appends the matched detection to the history. Class is kept as created.
    pub(crate) fn record(&mut self, det: &Detection, frame: u64, timestamp: f32) {
        self.history.push(Sample {
            frame,
            center: det.center(),
            timestamp,
        });

        self.confidence = det.confidence;
        self.bbox = det.bbox;
        self.last_frame = frame;
        self.hits += 1;
    }

    /// Folds an instantaneous speed into the running maximum.
    /// Returns `true` when the maximum was raised.
    pub(crate) fn record_speed(&mut self, kmh: f32, capped: bool) -> bool {
        self.last_speed_kmh = Some(kmh);

        if kmh > self.max_speed_kmh {
            self.max_speed_kmh = kmh;
            self.speed_capped = capped;
            true
        } else {
            if capped {
                self.speed_capped = true;
            }
            false
        }
    }

    /// Sets the one-shot notification flag. `true` only on the first call.
    pub(crate) fn mark_notified(&mut self) -> bool {
        if self.notified {
            return false;
        }

        self.notified = true;
        true
    }

    /// Fills enrichment fields that are still empty. Returns `true` if
    /// anything was written.
    pub(crate) fn enrich(&mut self, plate: Option<String>, owner: Option<OwnerRecord>) -> bool {
        let mut changed = false;

        if self.plate_text.is_none() {
            if let Some(plate) = plate.filter(|p| !p.trim().is_empty()) {
                self.plate_text = Some(plate);
                changed = true;
            }
        }

        if self.owner.is_none() {
            if let Some(owner) = owner {
                self.owner = Some(owner);
                changed = true;
            }
        }

        changed
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn class(&self) -> i32 {
        self.class
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    #[inline]
    pub fn bbox(&self) -> &BBox<Ltrb> {
        &self.bbox
    }

    #[inline]
    pub fn history(&self) -> &CircularQueue<Sample> {
        &self.history
    }

    /// Center of the most recent sample.
    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        self.history
            .latest()
            .map(|s| s.center)
            .unwrap_or_else(|| self.bbox.center())
    }

    #[inline]
    pub fn first_frame(&self) -> u64 {
        self.first_frame
    }

    #[inline]
    pub fn last_frame(&self) -> u64 {
        self.last_frame
    }

    #[inline]
    pub fn hits(&self) -> u32 {
        self.hits
    }

    #[inline]
    pub fn last_speed_kmh(&self) -> Option<f32> {
        self.last_speed_kmh
    }

    #[inline]
    pub fn max_speed_kmh(&self) -> f32 {
        self.max_speed_kmh
    }

    /// Whether the running maximum was truncated by the plausibility cap.
    #[inline]
    pub fn speed_capped(&self) -> bool {
        self.speed_capped
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.status
    }

    #[inline]
    pub fn notified(&self) -> bool {
        self.notified
    }

    #[inline]
    pub fn plate_text(&self) -> Option<&str> {
        self.plate_text.as_deref()
    }

    #[inline]
    pub fn owner(&self) -> Option<&OwnerRecord> {
        self.owner.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32) -> Detection {
        Detection::new(x - 10.0, y - 10.0, x + 10.0, y + 10.0, 2, 0.9)
    }

    #[test]
    fn history_is_bounded() {
        let mut track = Track::new(1, &det(0.0, 0.0), 0, 0.0, 4);
        for f in 1..100u64 {
            track.record(&det(f as f32, 0.0), f, f as f32 / 30.0);
        }

        assert_eq!(track.history().len(), 4);
        assert_eq!(track.last_frame(), 99);
        assert_eq!(track.hits(), 100);
        assert_eq!(track.center(), na::Point2::new(99.0, 0.0));
    }

    #[test]
    fn class_is_fixed_at_creation() {
        let mut track = Track::new(1, &det(0.0, 0.0), 0, 0.0, 4);
        let mut truck = det(5.0, 0.0);
        truck.class = 7;
        track.record(&truck, 1, 0.1);

        assert_eq!(track.class(), 2);
    }

    #[test]
    fn maximum_never_decreases() {
        let mut track = Track::new(1, &det(0.0, 0.0), 0, 0.0, 4);
        let mut prev = track.max_speed_kmh();

        for kmh in [12.0, 40.0, 8.0, 39.9, 55.5, 0.0, 55.0] {
            track.record_speed(kmh, false);
            assert!(track.max_speed_kmh() >= prev);
            prev = track.max_speed_kmh();
        }

        assert_eq!(track.max_speed_kmh(), 55.5);
        assert_eq!(track.last_speed_kmh(), Some(55.0));
    }

    #[test]
    fn notified_is_one_shot() {
        let mut track = Track::new(1, &det(0.0, 0.0), 0, 0.0, 4);

        assert!(track.mark_notified());
        assert!(!track.mark_notified());
        assert!(track.notified());
    }

    #[test]
    fn enrichment_is_written_once() {
        let mut track = Track::new(1, &det(0.0, 0.0), 0, 0.0, 4);

        assert!(!track.enrich(Some("  ".into()), None));
        assert!(track.enrich(Some("ABC123".into()), None));
        assert!(!track.enrich(Some("XYZ999".into()), None));

        assert_eq!(track.plate_text(), Some("ABC123"));
    }
}
