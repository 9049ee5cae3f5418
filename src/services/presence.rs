//! Face presence debouncing
//!
//! Raw detector batches are noisy: a face flickers in and out between frames
//! and passers-by show up for a single batch. A face only counts once it has
//! been tracked for a full debounce window and was re-seen recently. Presence
//! is dropped when the last tracked face goes stale.

use crate::domain::types::{
    FaceDetection, FaceId, FaceObservation, Presence, PresenceEvent, PresenceState,
};
use rustc_hash::FxHashMap;
use tokio::time::{Duration, Instant};
use tracing::debug;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

pub struct PresenceTracker {
    faces: FxHashMap<FaceId, FaceObservation>,
    state: PresenceState,
    debounce: Duration,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

impl PresenceTracker {
    pub fn new(debounce: Duration) -> Self {
        Self { faces: FxHashMap::default(), state: PresenceState::default(), debounce }
    }

    /// Record one detector batch
    pub fn observe(&mut self, detections: &[FaceDetection]) {
        for detection in detections {
            match self.faces.get_mut(&detection.face_id) {
                Some(face) => face.last_seen = Some(detection.timestamp),
                None => {
                    debug!(face_id = %detection.face_id, "face_tracked");
                    self.faces.insert(
                        detection.face_id,
                        FaceObservation::new(detection.face_id, detection.timestamp),
                    );
                }
            }
        }
    }

    /// Age faces and evaluate presence. Emits at most one event.
    pub fn tick(&mut self, now: Instant) -> Option<PresenceEvent> {
        let debounce = self.debounce;
        let mut event = None;
        let mut stale: smallvec::SmallVec<[FaceId; 4]> = smallvec::SmallVec::new();

        for face in self.faces.values() {
            let age = now.saturating_duration_since(face.first_seen);
            if age < debounce {
                continue;
            }
            match face.last_seen {
                Some(last) if now.saturating_duration_since(last) <= debounce => {
                    let recent = now.saturating_duration_since(last) < debounce;
                    if recent && self.state.presence == Presence::Absent && event.is_none() {
                        event = Some(PresenceEvent::Acquired);
                    }
                }
                _ => stale.push(face.face_id),
            }
        }

        for face_id in stale {
            debug!(face_id = %face_id, "face_expired");
            self.faces.remove(&face_id);
        }

        if event == Some(PresenceEvent::Acquired) {
            self.state = PresenceState { presence: Presence::Present, changed_at: Some(now) };
            return event;
        }

        if self.faces.is_empty() && self.state.presence == Presence::Present {
            self.state = PresenceState { presence: Presence::Absent, changed_at: Some(now) };
            return Some(PresenceEvent::Lost);
        }

        None
    }

    /// Forget all faces and presence without emitting anything
    pub fn clear(&mut self) {
        self.faces.clear();
        self.state = PresenceState::default();
    }

    pub fn is_present(&self) -> bool {
        self.state.presence == Presence::Present
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn tracked_faces(&self) -> usize {
        self.faces.len()
    }
}
