//! Shared types for the visitor kiosk

use crate::error::{Device, KioskResult};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::time::Instant;

/// Newtype wrapper for detector face IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FaceId(pub i64);

impl std::fmt::Display for FaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one synthesis request so late notifications can be told apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SpeechId(pub u64);

impl std::fmt::Display for SpeechId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one finalized utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct UtteranceId(pub u64);

impl std::fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One face reported by the detector, stamped on arrival
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceDetection {
    pub face_id: FaceId,
    pub timestamp: Instant,
}

/// Tracked face state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceObservation {
    pub face_id: FaceId,
    pub first_seen: Instant,
    pub last_seen: Option<Instant>,
}

impl FaceObservation {
    #[inline]
    pub fn new(face_id: FaceId, now: Instant) -> Self {
        Self { face_id, first_seen: now, last_seen: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Absent,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceState {
    pub presence: Presence,
    pub changed_at: Option<Instant>,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self { presence: Presence::Absent, changed_at: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Acquired,
    Lost,
}

impl PresenceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceEvent::Acquired => "presence_acquired",
            PresenceEvent::Lost => "presence_lost",
        }
    }
}

/// A visitor answer, finalized after the silence timeout
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub captured_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub value: String,
    pub accuracy: f64,
    #[serde(default)]
    pub subtype: Option<String>,
}

/// Normalized classifier output for one utterance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationResult {
    pub intents: SmallVec<[Intent; 8]>,
    pub entities: SmallVec<[Entity; 4]>,
}

impl ClassificationResult {
    pub fn new(intents: Vec<Intent>, entities: Vec<Entity>) -> Self {
        Self { intents: intents.into(), entities: entities.into() }
    }

    /// Confidence for a label, 0.0 when the classifier did not report it
    pub fn confidence(&self, label: &str) -> f64 {
        self.intents.iter().find(|i| i.label == label).map(|i| i.confidence).unwrap_or(0.0)
    }

    /// Whether `label` was reported with at least `threshold` confidence
    pub fn has_intent(&self, label: &str, threshold: f64) -> bool {
        self.confidence(label) >= threshold
    }

    /// Pick the winning label among `candidates`.
    ///
    /// Only candidates at or above `threshold` qualify. The strictly highest
    /// confidence wins; on equal confidence the candidate declared first wins.
    /// The outcome depends only on the inputs, never on classifier ordering.
    pub fn best_intent<'a>(&self, candidates: &[&'a str], threshold: f64) -> Option<&'a str> {
        let mut best: Option<(&'a str, f64)> = None;
        for &label in candidates {
            let confidence = self.confidence(label);
            if confidence < threshold {
                continue;
            }
            match best {
                Some((_, current)) if confidence <= current => {}
                _ => best = Some((label, confidence)),
            }
        }
        best.map(|(label, _)| label)
    }

    /// First entity of `entity_type` whose accuracy meets `min_accuracy`
    pub fn entity(&self, entity_type: &str, min_accuracy: f64) -> Option<&Entity> {
        self.entities.iter().find(|e| e.entity_type == entity_type && e.accuracy >= min_accuracy)
    }
}

/// Everything the orchestrator reacts to, serialized onto one queue
#[derive(Debug, Clone, PartialEq)]
pub enum KioskEvent {
    /// Batch of faces from the detector
    FacesDetected(Vec<FaceDetection>),
    /// Partial transcript from the recogniser
    UtteranceChunk(String),
    SynthesisFinished(SpeechId),
    SynthesisCancelled(SpeechId),
    SynthesisFailed { id: SpeechId, reason: String },
    RecognitionFailed { reason: String },
    /// Classifier answer for a finalized utterance
    Classified { utterance: UtteranceId, outcome: KioskResult<ClassificationResult> },
    /// Registry answer for a completed session
    SubmissionCompleted { session_id: String, outcome: KioskResult<()> },
    /// Camera or audio permission lost
    DeviceUnavailable(Device),
    /// Intent classifier answered its first probe
    ClassifierReady,
}

impl KioskEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            KioskEvent::FacesDetected(_) => "faces_detected",
            KioskEvent::UtteranceChunk(_) => "utterance_chunk",
            KioskEvent::SynthesisFinished(_) => "synthesis_finished",
            KioskEvent::SynthesisCancelled(_) => "synthesis_cancelled",
            KioskEvent::SynthesisFailed { .. } => "synthesis_failed",
            KioskEvent::RecognitionFailed { .. } => "recognition_failed",
            KioskEvent::Classified { .. } => "classified",
            KioskEvent::SubmissionCompleted { .. } => "submission_completed",
            KioskEvent::DeviceUnavailable(_) => "device_unavailable",
            KioskEvent::ClassifierReady => "classifier_ready",
        }
    }
}
