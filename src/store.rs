use std::collections::BTreeMap;

use tracing::debug;

use crate::track::Track;
use crate::Detection;

/// Owner of the live tracks of one stream.
///
/// Ids start at 1 and are never handed out twice, even after expiry.
#[derive(Debug)]
pub struct TrackStore {
    tracks: BTreeMap<u32, Track>,
    next_id: u32,
    history_capacity: usize,
}

impl TrackStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            history_capacity,
        }
    }

    pub fn create(&mut self, det: &Detection, frame: u64, timestamp: f32) -> &Track {
        let id = self.next_id;
        let capacity = self.history_capacity;
        self.next_id += 1;

        debug!(track = id, class = det.class, frame, "track created");

        self.tracks
            .entry(id)
            .or_insert_with(|| Track::new(id, det, frame, timestamp, capacity))
    }

    /// Appends the detection to the track's history. Returns `false` for an
    /// unknown id.
    pub fn update(&mut self, track_id: u32, det: &Detection, frame: u64, timestamp: f32) -> bool {
        match self.tracks.get_mut(&track_id) {
            Some(track) => {
                track.record(det, frame, timestamp);
                true
            }
            None => false,
        }
    }

    /// Removes and returns, in id order, every track last updated before
    /// `current_frame - max_age`.
    pub fn expire(&mut self, current_frame: u64, max_age: u64) -> Vec<Track> {
        let stale: Vec<u32> = self
            .tracks
            .values()
            .filter(|t| t.last_frame.saturating_add(max_age) < current_frame)
            .map(|t| t.id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.tracks.remove(&id))
            .inspect(|t| {
                debug!(
                    track = t.id,
                    last_frame = t.last_frame,
                    current_frame,
                    "track expired"
                )
            })
            .collect()
    }

    /// Id-ordered view of the live tracks.
    #[inline]
    pub fn all(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    #[inline]
    pub fn get(&self, track_id: u32) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    #[inline]
    pub fn get_mut(&mut self, track_id: u32) -> Option<&mut Track> {
        self.tracks.get_mut(&track_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Number of tracks ever created.
    #[inline]
    pub fn total_created(&self) -> u32 {
        self.next_id - 1
    }

    /// Drains every live track, e.g. at the end of a stream.
    pub fn drain(&mut self) -> Vec<Track> {
        std::mem::take(&mut self.tracks).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32) -> Detection {
        Detection::new(x, 0.0, x + 20.0, 20.0, 2, 0.8)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut store = TrackStore::new(8);
        let a = store.create(&det(0.0), 0, 0.0).id();
        let b = store.create(&det(50.0), 0, 0.0).id();

        assert_eq!((a, b), (1, 2));

        let expired = store.expire(100, 10);
        assert_eq!(expired.len(), 2);
        assert!(store.is_empty());

        assert_eq!(store.create(&det(0.0), 100, 0.0).id(), 3);
        assert_eq!(store.total_created(), 3);
    }

    #[test]
    fn update_appends_history_only() {
        let mut store = TrackStore::new(8);
        let id = store.create(&det(0.0), 0, 0.0).id();

        assert!(store.update(id, &det(10.0), 3, 0.1));
        assert!(!store.update(99, &det(10.0), 3, 0.1));

        let t = store.get(id).unwrap();
        assert_eq!(t.history().len(), 2);
        assert_eq!(t.last_frame(), 3);
        assert_eq!(t.max_speed_kmh(), 0.0);
    }

    #[test]
    fn expiry_boundary() {
        let mut store = TrackStore::new(8);
        let id = store.create(&det(0.0), 10, 0.0).id();

        // age equal to max_age is kept
        assert!(store.expire(15, 5).is_empty());
        assert!(store.get(id).is_some());

        // one frame beyond is removed
        let gone = store.expire(16, 5);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].id(), id);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn only_stale_tracks_expire() {
        let mut store = TrackStore::new(8);
        let old = store.create(&det(0.0), 0, 0.0).id();
        let fresh = store.create(&det(100.0), 0, 0.0).id();
        store.update(fresh, &det(101.0), 9, 0.0);

        let gone: Vec<u32> = store.expire(9, 5).iter().map(Track::id).collect();

        assert_eq!(gone, vec![old]);
        assert_eq!(store.all().map(Track::id).collect::<Vec<_>>(), vec![fresh]);
    }
}
