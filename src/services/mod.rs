//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `orchestrator` - Single event loop owning all kiosk state
//! - `presence` - Face presence debouncing
//! - `turn_taking` - Speak/listen coordination and utterance finalization
//! - `dialogue` - Registration conversation state machine
//! - `intent` - Intent classifier interface and response normalization
//! - `speech` - Synthesiser and recogniser interfaces
//! - `submission` - Visitor request sink interface
//! - `effect_worker` - Async worker executing collaborator calls

pub mod dialogue;
pub mod effect_worker;
pub mod intent;
pub mod orchestrator;
pub mod presence;
pub mod speech;
pub mod submission;
pub mod turn_taking;

// Re-export commonly used types
pub use dialogue::{DialogueEffect, DialogueMachine};
pub use effect_worker::{
    announce_when_ready, create_effect_worker, Collaborators, Effect, EffectWorker,
};
pub use intent::IntentClassifier;
pub use orchestrator::Orchestrator;
pub use presence::PresenceTracker;
pub use speech::{SpeechRecognizer, SpeechSynthesizer};
pub use submission::{LoggingSink, SubmissionSink};
pub use turn_taking::{TurnMode, TurnTaking};
