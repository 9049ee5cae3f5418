//! Domain models - core kiosk types
//!
//! - `types` - faces, presence, utterances, classifications and the event enum
//! - `visitor` - visitor record, property definitions and the registry request
//! - `dialogue` - conversation stages, intent labels and prompts

pub mod dialogue;
pub mod types;
pub mod visitor;

pub use dialogue::{DialogueStage, PromptKind, Prompts};
pub use types::{ClassificationResult, FaceId, KioskEvent, SpeechId, Utterance, UtteranceId};
pub use visitor::{PropertyDefinition, VisitorRecord, VisitorRequest};
