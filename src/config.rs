use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::association::AssociationMethod;
use crate::detection::VEHICLE_CLASSES;
use crate::error::{Error, Result};

/// Tuning of one stream's engine. Every field has a default, so a TOML file
/// only needs to name what it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub speed_limit_kmh: f32,
    pub grace_kmh: f32,
    pub meters_per_pixel: f32,
    pub fps: f32,
    /// Process every Nth frame.
    pub frame_stride: u64,
    pub gating_distance_px: f32,
    pub min_pixels_for_speed: f32,
    pub max_reasonable_speed_kmh: f32,
    pub max_age_frames: u64,
    pub history_capacity: usize,
    pub association: AssociationMethod,
    pub vehicle_classes: Vec<i32>,
    pub event_queue_capacity: usize,
    /// Key of a stored calibration overriding `meters_per_pixel` and `fps`.
    pub calibration_key: Option<String>,
    /// Fail instead of falling back to the inline scale when the key is unknown.
    pub require_calibration: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            speed_limit_kmh: 60.0,
            grace_kmh: 5.0,
            meters_per_pixel: 0.05,
            fps: 30.0,
            frame_stride: 3,
            gating_distance_px: 100.0,
            min_pixels_for_speed: 3.0,
            max_reasonable_speed_kmh: 180.0,
            max_age_frames: 30,
            history_capacity: 16,
            association: AssociationMethod::Greedy,
            vehicle_classes: VEHICLE_CLASSES.to_vec(),
            event_queue_capacity: 256,
            calibration_key: None,
            require_calibration: false,
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, v: f32) -> Result<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{} must be positive, got {}", name, v)))
            }
        }

        positive("speed_limit_kmh", self.speed_limit_kmh)?;
        positive("meters_per_pixel", self.meters_per_pixel)?;
        positive("gating_distance_px", self.gating_distance_px)?;
        positive("max_reasonable_speed_kmh", self.max_reasonable_speed_kmh)?;

        if !self.grace_kmh.is_finite() || self.grace_kmh < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "grace_kmh must not be negative, got {}",
                self.grace_kmh
            )));
        }

        if !self.min_pixels_for_speed.is_finite() || self.min_pixels_for_speed < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "min_pixels_for_speed must not be negative, got {}",
                self.min_pixels_for_speed
            )));
        }

        if self.frame_stride == 0 {
            return Err(Error::InvalidConfig("frame_stride must be at least 1".into()));
        }

        if self.history_capacity < 2 {
            return Err(Error::InvalidConfig(
                "history_capacity must hold at least two samples".into(),
            ));
        }

        if self.event_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_queue_capacity must be at least 1".into(),
            ));
        }

        if self.vehicle_classes.is_empty() {
            return Err(Error::InvalidConfig("vehicle_classes must not be empty".into()));
        }

        if self.require_calibration && self.calibration_key.is_none() {
            return Err(Error::InvalidConfig(
                "require_calibration is set but calibration_key is missing".into(),
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn is_vehicle(&self, class: i32) -> bool {
        self.vehicle_classes.contains(&class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();

        assert_eq!(c.speed_limit_kmh, 60.0);
        assert_eq!(c.grace_kmh, 5.0);
        assert_eq!(c.meters_per_pixel, 0.05);
        assert_eq!(c.frame_stride, 3);
        assert_eq!(c.gating_distance_px, 100.0);
        assert_eq!(c.min_pixels_for_speed, 3.0);
        assert_eq!(c.max_reasonable_speed_kmh, 180.0);
        assert!(c.is_vehicle(2) && c.is_vehicle(7) && !c.is_vehicle(0));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml_str(
            r#"
            speed_limit_kmh = 50.0
            frame_stride = 1
            association = "hungarian"
            calibration_key = "junction-4"
            "#,
        )
        .unwrap();

        assert_eq!(c.speed_limit_kmh, 50.0);
        assert_eq!(c.frame_stride, 1);
        assert_eq!(c.association, AssociationMethod::Hungarian);
        assert_eq!(c.calibration_key.as_deref(), Some("junction-4"));
        assert_eq!(c.grace_kmh, 5.0);
    }

    #[test]
    fn rejects_invalid_values() {
        for toml in [
            "frame_stride = 0",
            "speed_limit_kmh = -1.0",
            "history_capacity = 1",
            "grace_kmh = -0.5",
            "vehicle_classes = []",
            "require_calibration = true",
        ] {
            assert!(
                matches!(EngineConfig::from_toml_str(toml), Err(Error::InvalidConfig(_))),
                "{} should be rejected",
                toml
            );
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("speed_limit_kmh = \"fast\""),
            Err(Error::Toml(_))
        ));
    }
}
