use std::collections::HashMap;

use nalgebra as na;
use parking_lot::RwLock;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::math;

/// Frame rate assumed when the source does not report a usable one.
pub const FALLBACK_FPS: f32 = 30.0;

/// Meters-per-pixel from two image points spanning a known real-world width.
pub fn compute_scale(
    p1: na::Point2<f32>,
    p2: na::Point2<f32>,
    real_world_width: f32,
) -> Result<f32> {
    if !real_world_width.is_finite() || real_world_width <= 0.0 {
        return Err(Error::InvalidCalibration(format!(
            "reference width must be positive, got {}",
            real_world_width
        )));
    }

    let dist = math::distance(&p1, &p2);

    if !dist.is_finite() {
        return Err(Error::InvalidCalibration(
            "reference points must be finite".to_string(),
        ));
    }

    if dist <= f32::EPSILON {
        return Err(Error::DegenerateReference(p1.x, p1.y));
    }

    Ok(real_world_width / dist)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub meters_per_pixel: f32,
    pub fps: f32,
}

impl Calibration {
    pub fn new(meters_per_pixel: f32, fps: f32) -> Result<Self> {
        if !meters_per_pixel.is_finite() || meters_per_pixel <= 0.0 {
            return Err(Error::InvalidCalibration(format!(
                "meters per pixel must be positive, got {}",
                meters_per_pixel
            )));
        }

        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            FALLBACK_FPS
        };

        Ok(Self {
            meters_per_pixel,
            fps,
        })
    }

    pub fn from_reference(
        p1: na::Point2<f32>,
        p2: na::Point2<f32>,
        real_world_width: f32,
        fps: f32,
    ) -> Result<Self> {
        Self::new(compute_scale(p1, p2, real_world_width)?, fps)
    }
}

/// Keyed persistence of per-video calibrations.
pub trait CalibrationStore: Send + Sync {
    fn save(&self, key: &str, meters_per_pixel: f32, fps: f32) -> Result<Calibration>;
    fn load(&self, key: &str) -> Result<Calibration>;
}

/// Process-local store. Writers are serialised by the lock, readers share it.
#[derive(Debug, Default)]
pub struct InMemoryCalibrationStore {
    entries: RwLock<HashMap<String, Calibration>>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn save(&self, key: &str, meters_per_pixel: f32, fps: f32) -> Result<Calibration> {
        let calibration = Calibration::new(meters_per_pixel, fps)?;
        let mut entries = self.entries.write();

        if entries.contains_key(key) {
            return Err(Error::CalibrationExists(key.to_string()));
        }

        debug!(
            key,
            meters_per_pixel = calibration.meters_per_pixel,
            fps = calibration.fps,
            "calibration saved"
        );
        entries.insert(key.to_string(), calibration);

        Ok(calibration)
    }

    fn load(&self, key: &str) -> Result<Calibration> {
        self.entries
            .read()
            .get(key)
            .copied()
            .ok_or_else(|| Error::CalibrationNotFound(key.to_string()))
    }
}
