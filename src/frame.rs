use serde_derive::{Deserialize, Serialize};

use crate::detection::Detection;

/// Detector output for one decoded frame of a stream.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Frame {
    pub index: u64,
    #[serde(default)]
    pub timestamp: f32, // in seconds
    pub detections: Vec<Detection>,
}

impl Frame {
    pub fn new(index: u64, timestamp: f32, detections: Vec<Detection>) -> Self {
        Self {
            index,
            timestamp,
            detections,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
