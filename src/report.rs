use serde_derive::{Deserialize, Serialize};

use crate::classifier::{Classifier, Status};
use crate::error::Result;
use crate::owners::OwnerRecord;
use crate::track::Track;

/// Finalized view of one track as handed to reporting collaborators.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub track_id: u32,
    pub class_id: i32,
    pub max_speed_kmh: f32,
    pub status: Status,
    pub speed_capped: bool,
    pub plate_text: Option<String>,
    pub owner_info: Option<OwnerRecord>,
    pub first_frame: u64,
    pub last_frame: u64,
}

impl From<&Track> for TrackRecord {
    fn from(t: &Track) -> TrackRecord {
        TrackRecord {
            track_id: t.id,
            class_id: t.class,
            max_speed_kmh: (t.max_speed_kmh * 100.0).round() / 100.0,
            status: t.status,
            speed_capped: t.speed_capped,
            plate_text: t.plate_text.clone(),
            owner_info: t.owner.clone(),
            first_frame: t.first_frame,
            last_frame: t.last_frame,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total_tracks: usize,
    pub overspeed_count: usize,
    pub grace_count: usize,
    pub within_limit_count: usize,
    pub unknown_count: usize,
    pub speed_limit_kmh: f32,
    pub grace_kmh: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub summary: Summary,
    pub overspeed: Vec<TrackRecord>,
    pub grace: Vec<TrackRecord>,
    pub within_limit: Vec<TrackRecord>,
    pub unknown: Vec<TrackRecord>,
}

impl Report {
    pub fn from_records<I>(records: I, classifier: &Classifier) -> Self
    where
        I: IntoIterator<Item = TrackRecord>,
    {
        let mut report = Report {
            summary: Summary {
                speed_limit_kmh: classifier.speed_limit_kmh(),
                grace_kmh: classifier.grace_kmh(),
                ..Default::default()
            },
            ..Default::default()
        };

        for rec in records {
            report.summary.total_tracks += 1;

            match rec.status {
                Status::Overspeed => {
                    report.summary.overspeed_count += 1;
                    report.overspeed.push(rec);
                }
                Status::Grace => {
                    report.summary.grace_count += 1;
                    report.grace.push(rec);
                }
                Status::WithinLimit => {
                    report.summary.within_limit_count += 1;
                    report.within_limit.push(rec);
                }
                Status::Unknown => {
                    report.summary.unknown_count += 1;
                    report.unknown.push(rec);
                }
            }
        }

        report
    }

    pub fn from_tracks<'a, I>(tracks: I, classifier: &Classifier) -> Self
    where
        I: IntoIterator<Item = &'a Track>,
    {
        Self::from_records(tracks.into_iter().map(TrackRecord::from), classifier)
    }

    pub fn find(&self, track_id: u32) -> Option<&TrackRecord> {
        self.overspeed
            .iter()
            .chain(self.grace.iter())
            .chain(self.within_limit.iter())
            .chain(self.unknown.iter())
            .find(|r| r.track_id == track_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Detection;

    fn track(id: u32, max: f32, c: &Classifier) -> Track {
        let mut t = Track::new(id, &Detection::new(0.0, 0.0, 10.0, 10.0, 2, 0.9), 0, 0.0, 4);
        t.record_speed(max, false);
        c.evaluate(&mut t);
        t
    }

    #[test]
    fn buckets_by_status() {
        let c = Classifier::new(60.0, 5.0);
        let tracks = vec![
            track(1, 30.0, &c),
            track(2, 63.0, &c),
            track(3, 99.123, &c),
            track(4, 0.0, &c),
            track(5, 60.0, &c),
        ];

        let r = Report::from_tracks(&tracks, &c);

        assert_eq!(r.summary.total_tracks, 5);
        assert_eq!(r.summary.overspeed_count, 1);
        assert_eq!(r.summary.grace_count, 1);
        assert_eq!(r.summary.within_limit_count, 2);
        assert_eq!(r.summary.unknown_count, 1);
        assert_eq!(r.find(3).unwrap().max_speed_kmh, 99.12);
        assert!(r.find(42).is_none());
    }

    #[test]
    fn serializes_nullable_enrichment() {
        let c = Classifier::new(60.0, 5.0);
        let r = Report::from_tracks(&[track(7, 80.0, &c)], &c);
        let v: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();

        assert_eq!(v["summary"]["overspeed_count"], 1);
        assert_eq!(v["overspeed"][0]["track_id"], 7);
        assert_eq!(v["overspeed"][0]["status"], "overspeed");
        assert!(v["overspeed"][0]["plate_text"].is_null());
        assert!(v["overspeed"][0]["owner_info"].is_null());
    }
}
