use serde_derive::{Deserialize, Serialize};
use std::fmt;

use crate::track::Track;

/// Speed verdict of a track. Variants are ordered by severity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    WithinLimit,
    Grace,
    Overspeed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::WithinLimit => "within_limit",
            Status::Grace => "grace",
            Status::Overspeed => "overspeed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub previous: Status,
    pub status: Status,
    /// First time this track was seen above `limit + grace`.
    pub overspeed_edge: bool,
}

impl Verdict {
    #[inline]
    pub fn changed(&self) -> bool {
        self.previous != self.status
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    speed_limit_kmh: f32,
    grace_kmh: f32,
}

impl Classifier {
    pub fn new(speed_limit_kmh: f32, grace_kmh: f32) -> Self {
        Self {
            speed_limit_kmh,
            grace_kmh,
        }
    }

    #[inline]
    pub fn speed_limit_kmh(&self) -> f32 {
        self.speed_limit_kmh
    }

    #[inline]
    pub fn grace_kmh(&self) -> f32 {
        self.grace_kmh
    }

    #[inline]
    pub fn limit_with_grace(&self) -> f32 {
        self.speed_limit_kmh + self.grace_kmh
    }

    pub fn classify(&self, max_speed_kmh: f32) -> Status {
        if max_speed_kmh > self.limit_with_grace() {
            Status::Overspeed
        } else if max_speed_kmh > self.speed_limit_kmh {
            Status::Grace
        } else if max_speed_kmh > 0.0 {
            Status::WithinLimit
        } else {
            Status::Unknown
        }
    }

    /// Re-evaluates the track status from its running maximum and reports
    /// the overspeed edge at most once per track.
    pub fn evaluate(&self, track: &mut Track) -> Verdict {
        let previous = track.status;
        let status = self.classify(track.max_speed_kmh).max(previous);
        track.status = status;

        let overspeed_edge = status == Status::Overspeed && track.mark_notified();

        Verdict {
            previous,
            status,
            overspeed_edge,
        }
    }

    /// Short human readable reason for a status.
    pub fn reason(&self, track: &Track) -> String {
        let max = track.max_speed_kmh;

        match track.status {
            Status::Unknown => "no speed measured yet".to_string(),
            Status::WithinLimit => format!(
                "max {:.1} km/h within limit {:.1} km/h",
                max, self.speed_limit_kmh
            ),
            Status::Grace => format!(
                "max {:.1} km/h above limit {:.1} km/h, within grace {:.1} km/h",
                max, self.speed_limit_kmh, self.grace_kmh
            ),
            Status::Overspeed if track.speed_capped => format!(
                "max {:.1} km/h (capped) exceeds {:.1} km/h",
                max,
                self.limit_with_grace()
            ),
            Status::Overspeed => format!(
                "max {:.1} km/h exceeds {:.1} km/h",
                max,
                self.limit_with_grace()
            ),
        }
    }
}
