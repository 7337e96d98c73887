use std::sync::Arc;

use parking_lot::RwLock;
use serde_derive::Serialize;
use tracing::{debug, info, trace};

use crate::association::Associator;
use crate::bbox::{BBox, Xywh};
use crate::calibration::{Calibration, CalibrationStore};
use crate::classifier::{Classifier, Status};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{Collaborators, EngineEvent, EventEmitter, OverspeedEvent, WorkerStats};
use crate::feed::FrameReceiver;
use crate::report::{Report, TrackRecord};
use crate::speed::SpeedEstimator;
use crate::store::TrackStore;
use crate::track::Track;
use crate::{Detection, Frame};

/// Per-frame view of one vehicle that was seen in that frame.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VehicleResult {
    pub track_id: u32,
    pub class_id: i32,
    /// Instantaneous speed of this step, if one was recorded.
    pub speed_kmh: Option<f32>,
    pub max_speed_kmh: f32,
    pub status: Status,
    pub reason: String,
    pub bbox: BBox<Xywh>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub skipped: bool,
    pub vehicles: Vec<VehicleResult>,
    pub expired: Vec<u32>,
}

impl FrameOutcome {
    fn skipped(frame_index: u64) -> Self {
        Self {
            frame_index,
            skipped: true,
            ..Default::default()
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub detections: u64,
    pub detections_filtered: u64,
    pub tracks_created: u64,
    pub tracks_expired: u64,
    pub overspeed_events: u64,
}

/// Picks the stored calibration for `key`, or the inline scale of the
/// config when none is stored and none is required.
pub fn resolve_calibration(
    config: &EngineConfig,
    store: &dyn CalibrationStore,
    key: &str,
) -> Result<Calibration> {
    match store.load(key) {
        Ok(calibration) => Ok(calibration),
        Err(Error::CalibrationNotFound(_)) if !config.require_calibration => {
            debug!(key, "no stored calibration, using configured scale");
            Calibration::new(config.meters_per_pixel, config.fps)
        }
        Err(err) => Err(err),
    }
}

/// Read-only access to a running engine's tracks from other threads.
#[derive(Clone)]
pub struct ReportHandle {
    store: Arc<RwLock<TrackStore>>,
    classifier: Classifier,
}

impl ReportHandle {
    pub fn report(&self) -> Report {
        Report::from_tracks(self.store.read().all(), &self.classifier)
    }

    pub fn track(&self, track_id: u32) -> Option<TrackRecord> {
        self.store.read().get(track_id).map(TrackRecord::from)
    }

    pub fn live_tracks(&self) -> usize {
        self.store.read().len()
    }
}

/// Tracking core of one video stream. Frames must be fed in increasing
/// index order.
pub struct Engine {
    stream: String,
    config: EngineConfig,
    calibration: Calibration,
    associator: Associator,
    estimator: SpeedEstimator,
    classifier: Classifier,
    store: Arc<RwLock<TrackStore>>,
    events: EventEmitter,
    last_frame: Option<u64>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(
        stream: impl Into<String>,
        config: EngineConfig,
        calibration: Calibration,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        let stream = stream.into();
        let events = EventEmitter::spawn(config.event_queue_capacity, collaborators)?;

        info!(
            stream = %stream,
            meters_per_pixel = calibration.meters_per_pixel,
            fps = calibration.fps,
            limit_kmh = config.speed_limit_kmh,
            grace_kmh = config.grace_kmh,
            stride = config.frame_stride,
            "engine started"
        );

        Ok(Self {
            associator: Associator::new(config.gating_distance_px, config.association),
            estimator: SpeedEstimator::new(
                calibration,
                config.min_pixels_for_speed,
                config.max_reasonable_speed_kmh,
            ),
            classifier: Classifier::new(config.speed_limit_kmh, config.grace_kmh),
            store: Arc::new(RwLock::new(TrackStore::new(config.history_capacity))),
            stream,
            config,
            calibration,
            events,
            last_frame: None,
            stats: EngineStats::default(),
        })
    }

    /// Engine using the config's inline scale and the default collaborators.
    pub fn with_config(stream: impl Into<String>, config: EngineConfig) -> Result<Self> {
        let calibration = Calibration::new(config.meters_per_pixel, config.fps)?;

        Self::new(stream, config, calibration, Collaborators::default())
    }

    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        if let Some(previous) = self.last_frame {
            if frame.index <= previous {
                return Err(Error::FrameOutOfOrder {
                    previous,
                    got: frame.index,
                });
            }
        }

        self.last_frame = Some(frame.index);
        self.stats.frames_seen += 1;

        if frame.index % self.config.frame_stride != 0 {
            self.stats.frames_skipped += 1;
            trace!(stream = %self.stream, frame = frame.index, "frame skipped by stride");
            return Ok(FrameOutcome::skipped(frame.index));
        }

        self.stats.frames_processed += 1;
        self.events.flush();
        self.apply_enrichments();

        let detections: Vec<Detection> = frame
            .iter()
            .filter(|d| self.config.is_vehicle(d.class) && d.is_valid())
            .copied()
            .collect();

        let filtered = frame.len() - detections.len();
        self.stats.detections += frame.len() as u64;
        self.stats.detections_filtered += filtered as u64;

        if filtered > 0 {
            debug!(stream = %self.stream, frame = frame.index, filtered, "detections dropped");
        }

        let mut outcome = FrameOutcome {
            frame_index: frame.index,
            ..Default::default()
        };
        let mut pending = Vec::new();

        {
            let mut store = self.store.write();

            let association = {
                let tracks: Vec<&Track> = store.all().collect();
                self.associator.associate(&detections, &tracks)
            };

            for &(di, track_id) in &association.matches {
                store.update(track_id, &detections[di], frame.index, frame.timestamp);

                if let Some(track) = store.get_mut(track_id) {
                    let step = self.estimator.apply(track);
                    let verdict = self.classifier.evaluate(track);

                    if verdict.changed() {
                        pending.push(EngineEvent::StatusChanged {
                            stream: self.stream.clone(),
                            track_id,
                            frame: frame.index,
                            from: verdict.previous,
                            to: verdict.status,
                            max_speed_kmh: track.max_speed_kmh,
                        });
                    }

                    if verdict.overspeed_edge {
                        info!(
                            stream = %self.stream,
                            track = track_id,
                            max_speed_kmh = track.max_speed_kmh,
                            capped = track.speed_capped,
                            "vehicle over speed limit"
                        );

                        pending.push(EngineEvent::Overspeed(self.overspeed_event(track, frame.index)));
                    }

                    outcome.vehicles.push(self.vehicle_result(track, step.kmh()));
                }
            }

            for &di in &association.unmatched_detections {
                let track = store.create(&detections[di], frame.index, frame.timestamp);
                self.stats.tracks_created += 1;

                outcome.vehicles.push(self.vehicle_result(track, None));
            }

            for track in store.expire(frame.index, self.config.max_age_frames) {
                self.stats.tracks_expired += 1;
                outcome.expired.push(track.id);

                pending.push(EngineEvent::TrackFinalized {
                    stream: self.stream.clone(),
                    record: TrackRecord::from(&track),
                });
            }
        }

        outcome.vehicles.sort_by_key(|v| v.track_id);

        for event in pending {
            if matches!(event, EngineEvent::Overspeed(_)) {
                self.stats.overspeed_events += 1;
            }

            self.events.emit(event);
        }

        Ok(outcome)
    }

    /// Consumes a frame feed until its producer hangs up.
    pub fn run(&mut self, frames: FrameReceiver) -> Result<EngineStats> {
        for frame in frames {
            self.process_frame(&frame)?;
        }

        Ok(self.stats)
    }

    /// Report over the tracks that are currently live.
    pub fn report(&self) -> Report {
        Report::from_tracks(self.store.read().all(), &self.classifier)
    }

    pub fn reporter(&self) -> ReportHandle {
        ReportHandle {
            store: Arc::clone(&self.store),
            classifier: self.classifier,
        }
    }

    /// Finalizes every live track, drains the event worker and returns the
    /// report of the tracks that were live at the end of the stream.
    ///
    /// Tracks that expired earlier are not part of it; they were handed to
    /// the notifier as `TrackFinalized` events when they expired.
    pub fn finish(mut self) -> (Report, WorkerStats) {
        self.apply_enrichments();

        let mut tracks = self.store.write().drain();

        for track in &tracks {
            self.events.emit(EngineEvent::TrackFinalized {
                stream: self.stream.clone(),
                record: TrackRecord::from(track),
            });
        }

        let worker = self.events.shutdown();

        // parked overspeed events are only handled during shutdown
        for e in self.events.take_enrichments() {
            if let Some(track) = tracks.iter_mut().find(|t| t.id == e.track_id) {
                track.enrich(e.plate_text, e.owner);
            }
        }

        let report = Report::from_tracks(&tracks, &self.classifier);

        info!(
            stream = %self.stream,
            frames = self.stats.frames_seen,
            tracks = self.stats.tracks_created,
            overspeed = report.summary.overspeed_count,
            "engine finished"
        );

        (report, worker)
    }

    #[inline]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    #[inline]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    #[inline]
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Events waiting for room in the worker queue.
    #[inline]
    pub fn pending_events(&self) -> usize {
        self.events.pending()
    }

    fn apply_enrichments(&mut self) {
        let enrichments = self.events.take_enrichments();

        if enrichments.is_empty() {
            return;
        }

        let mut store = self.store.write();

        for e in enrichments {
            match store.get_mut(e.track_id) {
                Some(track) => {
                    if track.enrich(e.plate_text, e.owner) {
                        debug!(track = e.track_id, "track enriched");
                    }
                }
                None => debug!(track = e.track_id, "enrichment for expired track ignored"),
            }
        }
    }

    fn overspeed_event(&self, track: &Track, frame: u64) -> OverspeedEvent {
        OverspeedEvent {
            stream: self.stream.clone(),
            track_id: track.id,
            class_id: track.class,
            frame,
            max_speed_kmh: track.max_speed_kmh,
            speed_limit_kmh: self.classifier.speed_limit_kmh(),
            grace_kmh: self.classifier.grace_kmh(),
            speed_capped: track.speed_capped,
            bbox: *track.bbox.as_slice(),
        }
    }

    fn vehicle_result(&self, track: &Track, speed_kmh: Option<f32>) -> VehicleResult {
        VehicleResult {
            track_id: track.id,
            class_id: track.class,
            speed_kmh,
            max_speed_kmh: track.max_speed_kmh,
            status: track.status,
            reason: self.classifier.reason(track),
            bbox: track.bbox.as_xywh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::InMemoryCalibrationStore;

    fn config() -> EngineConfig {
        EngineConfig {
            frame_stride: 1,
            max_age_frames: 5,
            ..Default::default()
        }
    }

    fn car(x: f32, y: f32) -> Detection {
        Detection::new(x - 20.0, y - 15.0, x + 20.0, y + 15.0, 2, 0.9)
    }

    #[test]
    fn rejects_out_of_order_frames() {
        let mut engine = Engine::with_config("cam", config()).unwrap();
        engine.process_frame(&Frame::new(4, 0.0, vec![])).unwrap();

        assert!(matches!(
            engine.process_frame(&Frame::new(4, 0.0, vec![])),
            Err(Error::FrameOutOfOrder { previous: 4, got: 4 })
        ));
        assert!(engine.process_frame(&Frame::new(3, 0.0, vec![])).is_err());
        assert!(engine.process_frame(&Frame::new(5, 0.0, vec![])).is_ok());
    }

    #[test]
    fn stride_skips_frames() {
        let mut engine = Engine::with_config(
            "cam",
            EngineConfig {
                frame_stride: 3,
                ..Default::default()
            },
        )
        .unwrap();

        let skipped: Vec<bool> = (0..7)
            .map(|i| engine.process_frame(&Frame::new(i, 0.0, vec![car(100.0, 100.0)])).unwrap().skipped)
            .collect();

        assert_eq!(skipped, vec![false, true, true, false, true, true, false]);
        assert_eq!(engine.stats().frames_processed, 3);
        assert_eq!(engine.report().summary.total_tracks, 1);
    }

    #[test]
    fn filters_non_vehicles_and_broken_boxes() {
        let mut engine = Engine::with_config("cam", config()).unwrap();
        let person = Detection::new(0.0, 0.0, 10.0, 30.0, 0, 0.95);
        let broken = Detection::new(50.0, 50.0, 40.0, 60.0, 2, 0.95);
        let overconfident = Detection::new(300.0, 300.0, 340.0, 330.0, 2, 1.7);

        let out = engine
            .process_frame(&Frame::new(
                0,
                0.0,
                vec![person, broken, overconfident, car(200.0, 200.0)],
            ))
            .unwrap();

        assert_eq!(out.vehicles.len(), 1);
        assert_eq!(engine.stats().detections_filtered, 3);
    }

    #[test]
    fn required_calibration_must_exist() {
        let store = InMemoryCalibrationStore::new();
        let cfg = EngineConfig {
            calibration_key: Some("cam".into()),
            require_calibration: true,
            ..Default::default()
        };

        assert!(matches!(
            resolve_calibration(&cfg, &store, "cam"),
            Err(Error::CalibrationNotFound(_))
        ));

        let lenient = EngineConfig::default();
        assert_eq!(
            resolve_calibration(&lenient, &store, "cam").unwrap().meters_per_pixel,
            0.05
        );

        store.save("cam", 0.02, 25.0).unwrap();
        assert_eq!(resolve_calibration(&cfg, &store, "cam").unwrap().fps, 25.0);
    }

    #[test]
    fn reporter_reads_from_another_thread() {
        let mut engine = Engine::with_config("cam", config()).unwrap();
        let reporter = engine.reporter();

        engine
            .process_frame(&Frame::new(0, 0.0, vec![car(100.0, 100.0), car(400.0, 100.0)]))
            .unwrap();

        let total = std::thread::spawn(move || reporter.report().summary.total_tracks)
            .join()
            .unwrap();

        assert_eq!(total, 2);
    }
}
