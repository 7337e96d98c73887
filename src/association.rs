use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use munkres::{solve_assignment, WeightMatrix};
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::track::Track;
use crate::Detection;

/// Largest per-class problem handed to the assignment solver.
const MAX_ASSIGNMENT_SIZE: usize = 256;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssociationMethod {
    /// Per detection, nearest unclaimed track. Cheap, may swap identities on
    /// crossing trajectories.
    #[default]
    Greedy,
    /// Minimum total distance per class (Hungarian algorithm).
    Hungarian,
}

/// Result of matching one frame's detections against the live tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    /// `(detection index, track id)`, ascending by detection index.
    pub matches: Vec<(usize, u32)>,
    /// Detections that start new tracks, ascending.
    pub unmatched_detections: Vec<usize>,
    /// Tracks that received nothing this frame, ascending by id.
    pub unmatched_tracks: Vec<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct Associator {
    gating_distance: f32,
    method: AssociationMethod,
}

impl Associator {
    pub fn new(gating_distance: f32, method: AssociationMethod) -> Self {
        Self {
            gating_distance,
            method,
        }
    }

    #[inline]
    pub fn gating_distance(&self) -> f32 {
        self.gating_distance
    }

    #[inline]
    pub fn method(&self) -> AssociationMethod {
        self.method
    }

    /// `tracks` must be ordered by ascending id.
    pub fn associate(&self, detections: &[Detection], tracks: &[&Track]) -> Association {
        let mut matches = match self.method {
            AssociationMethod::Greedy => {
                let dets: Vec<usize> = (0..detections.len()).collect();
                let trks: Vec<usize> = (0..tracks.len()).collect();

                self.greedy(detections, tracks, &dets, &trks)
            }
            AssociationMethod::Hungarian => self.hungarian(detections, tracks),
        };

        matches.sort_unstable_by_key(|&(d, _)| d);

        let matched_dets: HashSet<usize> = matches.iter().map(|&(d, _)| d).collect();
        let matched_trks: HashSet<u32> = matches.iter().map(|&(_, t)| t).collect();

        let unmatched_detections = (0..detections.len())
            .filter(|d| !matched_dets.contains(d))
            .collect();

        let unmatched_tracks = tracks
            .iter()
            .map(|t| t.id)
            .filter(|id| !matched_trks.contains(id))
            .collect();

        let association = Association {
            matches,
            unmatched_detections,
            unmatched_tracks,
        };

        debug!(
            matched = association.matches.len(),
            new = association.unmatched_detections.len(),
            missed = association.unmatched_tracks.len(),
            "detections associated"
        );

        association
    }

    #[inline]
    fn gated_distance(&self, det: &Detection, track: &Track) -> Option<f32> {
        if det.class != track.class {
            return None;
        }

        let d = det.distance_to(&track.center());

        if d < self.gating_distance {
            Some(d)
        } else {
            None
        }
    }

    /// Detections in ascending index order each claim their nearest free
    /// candidate; distance ties go to the lower track id.
    fn greedy(
        &self,
        detections: &[Detection],
        tracks: &[&Track],
        dets: &[usize],
        trks: &[usize],
    ) -> Vec<(usize, u32)> {
        let mut claimed = HashSet::new();
        let mut matches = Vec::new();

        for &di in dets {
            let det = &detections[di];

            let best = trks
                .iter()
                .map(|&ti| tracks[ti])
                .filter(|t| !claimed.contains(&t.id))
                .filter_map(|t| Some((self.gated_distance(det, t)?, t.id)))
                .min_by(|a, b| {
                    a.0.partial_cmp(&b.0)
                        .unwrap_or(Ordering::Equal)
                        .then(a.1.cmp(&b.1))
                });

            if let Some((_, id)) = best {
                claimed.insert(id);
                matches.push((di, id));
            }
        }

        matches
    }

    fn hungarian(&self, detections: &[Detection], tracks: &[&Track]) -> Vec<(usize, u32)> {
        let mut by_class: BTreeMap<i32, (Vec<usize>, Vec<usize>)> = BTreeMap::new();

        for (idx, det) in detections.iter().enumerate() {
            by_class.entry(det.class).or_default().0.push(idx);
        }

        for (idx, track) in tracks.iter().enumerate() {
            if let Some(entry) = by_class.get_mut(&track.class) {
                entry.1.push(idx);
            }
        }

        let mut matches = Vec::new();

        for (class, (dets, trks)) in by_class {
            if dets.is_empty() || trks.is_empty() {
                continue;
            }

            let n = dets.len().max(trks.len());

            if n > MAX_ASSIGNMENT_SIZE {
                warn!(class, n, "assignment problem too big, using greedy matching");
                matches.extend(self.greedy(detections, tracks, &dets, &trks));
                continue;
            }

            let dist = na::DMatrix::from_fn(trks.len(), dets.len(), |r, c| {
                self.gated_distance(&detections[dets[c]], tracks[trks[r]])
                    .unwrap_or(f32::INFINITY)
            });

            let prohibitive = self.gating_distance.max(1.0) * 16.0;
            let mut weights = WeightMatrix::from_fn(n, |(r, c)| {
                if r < trks.len() && c < dets.len() && dist[(r, c)].is_finite() {
                    dist[(r, c)]
                } else {
                    prohibitive
                }
            });

            match solve_assignment(&mut weights) {
                Ok(positions) => {
                    for pos in positions {
                        if pos.row < trks.len()
                            && pos.column < dets.len()
                            && dist[(pos.row, pos.column)].is_finite()
                        {
                            matches.push((dets[pos.column], tracks[trks[pos.row]].id));
                        }
                    }
                }
                Err(err) => {
                    warn!(class, ?err, "assignment could not be solved, using greedy matching");
                    matches.extend(self.greedy(detections, tracks, &dets, &trks));
                }
            }
        }

        matches
    }
}
