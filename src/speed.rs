use tracing::trace;

use crate::calibration::Calibration;
use crate::math;
use crate::track::Track;

/// Outcome of one estimation step for a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedSample {
    /// Fewer than two samples in the history.
    Insufficient,
    /// Displacement below the jitter threshold; nothing recorded.
    Jitter { pixels: f32 },
    /// A recorded step. `raw_kmh` is the value before the plausibility cap.
    Measured { kmh: f32, raw_kmh: f32, capped: bool },
}

impl SpeedSample {
    pub fn kmh(&self) -> Option<f32> {
        match self {
            SpeedSample::Measured { kmh, .. } => Some(*kmh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpeedEstimator {
    meters_per_pixel: f32,
    fps: f32,
    min_pixels: f32,
    max_kmh: f32,
}

impl SpeedEstimator {
    pub fn new(calibration: Calibration, min_pixels: f32, max_kmh: f32) -> Self {
        Self {
            meters_per_pixel: calibration.meters_per_pixel,
            fps: calibration.fps,
            min_pixels,
            max_kmh,
        }
    }

    #[inline]
    pub fn meters_per_pixel(&self) -> f32 {
        self.meters_per_pixel
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Instantaneous speed from the two newest samples, without touching the track.
    pub fn estimate(&self, track: &Track) -> SpeedSample {
        let (prev, last) = match track.history.latest_pair() {
            Some(pair) => pair,
            None => return SpeedSample::Insufficient,
        };

        let pixels = math::distance(&prev.center, &last.center);

        if pixels.is_nan() || pixels < self.min_pixels {
            return SpeedSample::Jitter { pixels };
        }

        if last.frame <= prev.frame {
            return SpeedSample::Measured {
                kmh: 0.0,
                raw_kmh: 0.0,
                capped: false,
            };
        }

        let frames = (last.frame - prev.frame) as f32;
        let raw_kmh = math::speed_kmh(pixels, frames, self.fps, self.meters_per_pixel);
        let capped = raw_kmh > self.max_kmh;

        SpeedSample::Measured {
            kmh: raw_kmh.min(self.max_kmh),
            raw_kmh,
            capped,
        }
    }

    /// Estimates and folds the result into the track's running maximum.
    pub fn apply(&self, track: &mut Track) -> SpeedSample {
        let sample = self.estimate(track);

        match sample {
            SpeedSample::Measured {
                kmh,
                raw_kmh,
                capped,
            } => {
                track.record_speed(kmh, capped);
                trace!(
                    track = track.id,
                    kmh,
                    raw_kmh,
                    capped,
                    max = track.max_speed_kmh,
                    "speed step"
                );
            }
            SpeedSample::Jitter { pixels } => {
                trace!(track = track.id, pixels, "displacement below threshold");
            }
            SpeedSample::Insufficient => {}
        }

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Detection;
    use approx::assert_relative_eq;

    fn det_at(x: f32, y: f32) -> Detection {
        Detection::new(x - 20.0, y - 10.0, x + 20.0, y + 10.0, 2, 0.9)
    }

    fn estimator(mpp: f32, fps: f32) -> SpeedEstimator {
        SpeedEstimator::new(Calibration::new(mpp, fps).unwrap(), 3.0, 180.0)
    }

    #[test]
    fn single_sample_is_insufficient() {
        let t = Track::new(1, &det_at(0.0, 0.0), 0, 0.0, 8);

        assert_eq!(estimator(0.05, 30.0).estimate(&t), SpeedSample::Insufficient);
    }

    #[test]
    fn uses_frame_delta_not_wall_clock() {
        let mut t = Track::new(1, &det_at(100.0, 100.0), 3, 0.0, 8);
        // timestamps are deliberately wrong
        t.record(&det_at(100.0, 130.0), 6, 99.0);

        let s = estimator(0.05, 30.0).apply(&mut t);

        // 30 px * 0.05 m over 3/30 s = 15 m/s
        assert_relative_eq!(s.kmh().unwrap(), 54.0, epsilon = 1e-3);
        assert_relative_eq!(t.max_speed_kmh(), 54.0, epsilon = 1e-3);
    }

    #[test]
    fn sub_threshold_motion_is_jitter() {
        let mut t = Track::new(1, &det_at(100.0, 100.0), 0, 0.0, 8);
        t.record(&det_at(101.0, 100.0), 1, 0.0);

        let s = estimator(0.05, 30.0).apply(&mut t);

        assert!(matches!(s, SpeedSample::Jitter { .. }));
        assert_eq!(t.max_speed_kmh(), 0.0);
        assert_eq!(t.last_speed_kmh(), None);
    }

    #[test]
    fn spike_is_capped_before_maximum() {
        let mut t = Track::new(1, &det_at(0.0, 0.0), 0, 0.0, 8);
        t.record(&det_at(50.0, 0.0), 1, 0.0);

        let s = estimator(0.035, 30.0).apply(&mut t);

        match s {
            SpeedSample::Measured {
                kmh,
                raw_kmh,
                capped,
            } => {
                assert_eq!(kmh, 180.0);
                assert_relative_eq!(raw_kmh, 189.0, epsilon = 1e-2);
                assert!(capped);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(t.max_speed_kmh(), 180.0);
        assert!(t.speed_capped());
    }

    #[test]
    fn non_increasing_frames_record_zero() {
        let mut t = Track::new(1, &det_at(0.0, 0.0), 5, 0.0, 8);
        t.record(&det_at(40.0, 0.0), 5, 0.0);

        let s = estimator(0.05, 30.0).apply(&mut t);

        assert_eq!(s.kmh(), Some(0.0));
        assert_eq!(t.max_speed_kmh(), 0.0);
    }

    #[test]
    fn maximum_tracks_fastest_step() {
        let e = estimator(0.05, 30.0);
        let mut t = Track::new(1, &det_at(0.0, 0.0), 0, 0.0, 4);
        let mut x = 0.0;
        let mut prev_max = 0.0;

        for (f, step) in [10.0, 25.0, 5.0, 12.0, 30.0, 2.0].iter().enumerate() {
            x += step;
            t.record(&det_at(x, 0.0), (f as u64 + 1) * 3, 0.0);
            e.apply(&mut t);

            assert!(t.max_speed_kmh() >= prev_max);
            prev_max = t.max_speed_kmh();
        }

        // fastest step: 30 px in 3 frames at 30 fps => 15 m/s
        assert_relative_eq!(t.max_speed_kmh(), 54.0, epsilon = 1e-3);
    }
}
