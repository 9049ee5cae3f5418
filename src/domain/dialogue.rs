//! Conversation stages, intent labels and spoken prompts

use serde::Deserialize;

/// Intent labels produced by the kiosk's NLP model
pub mod intents {
    pub const POSITIVE: &str = "confirmation.positive";
    pub const NEGATIVE: &str = "confirmation.negative";
    pub const UNSURE: &str = "confirmation.unsure";
    pub const CHANGE_FLOOR: &str = "change.floor";
    pub const CHANGE_ROOM: &str = "change.room";
}

/// Entity carrying spoken numbers ("deux", "2e")
pub const ORDINAL_ENTITY: &str = "ordinal";
pub const INTEGER_SUBTYPE: &str = "integer";

/// Point in the conversation: the last question asked and the answer expected
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DialogueStage {
    #[default]
    Inactive,
    Greeting,
    AskFloor,
    AskRoom,
    CollectProperties { property_id: String },
    Confirm,
    ModifySelection,
}

impl DialogueStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueStage::Inactive => "inactive",
            DialogueStage::Greeting => "greeting",
            DialogueStage::AskFloor => "ask_floor",
            DialogueStage::AskRoom => "ask_room",
            DialogueStage::CollectProperties { .. } => "collect_properties",
            DialogueStage::Confirm => "confirm",
            DialogueStage::ModifySelection => "modify_selection",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, DialogueStage::Inactive)
    }
}

impl std::fmt::Display for DialogueStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogueStage::CollectProperties { property_id } => {
                write!(f, "collect_properties:{}", property_id)
            }
            other => f.write_str(other.as_str()),
        }
    }
}

/// Which prompt a speak effect carries, for logs and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Greeting,
    AskFloor,
    ClarifyFloor,
    AskRoom,
    ClarifyRoom,
    AskProperty,
    NeedProperty,
    Listening,
    Confirm,
    Modify,
    Repeat,
    ThankYou,
    Farewell,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Greeting => "greeting",
            PromptKind::AskFloor => "ask_floor",
            PromptKind::ClarifyFloor => "clarify_floor",
            PromptKind::AskRoom => "ask_room",
            PromptKind::ClarifyRoom => "clarify_room",
            PromptKind::AskProperty => "ask_property",
            PromptKind::NeedProperty => "need_property",
            PromptKind::Listening => "listening",
            PromptKind::Confirm => "confirm",
            PromptKind::Modify => "modify",
            PromptKind::Repeat => "repeat",
            PromptKind::ThankYou => "thank_you",
            PromptKind::Farewell => "farewell",
        }
    }
}

/// Prompt texts, overridable from the `[prompts]` config section.
///
/// `{label}` in `ask_property` and `need_property` is replaced with the
/// property label when the property has no prompt of its own.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub greeting: String,
    pub ask_floor: String,
    pub clarify_floor: String,
    pub ask_room: String,
    pub clarify_room: String,
    pub ask_property: String,
    pub need_property: String,
    pub listening: String,
    pub confirm: String,
    pub modify: String,
    pub repeat: String,
    pub thank_you: String,
    pub farewell: String,
    /// Labels used in the spoken summary before the confirm question
    pub floor_label: String,
    pub room_label: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            greeting: "Bonjour, vous venez pour une visite?".to_string(),
            ask_floor: "Sur quel étage allez-vous?".to_string(),
            clarify_floor: "Dites-moi le numéro de l'étage que vous visitez.".to_string(),
            ask_room: "Quelle chambre?".to_string(),
            clarify_room: "Dites-moi le numéro de la chambre que vous visitez.".to_string(),
            ask_property: "Puis-je avoir {label}?".to_string(),
            need_property: "J'ai besoin de {label}.".to_string(),
            listening: "J'écoute!".to_string(),
            confirm: "Est-ce que l'information est exacte?".to_string(),
            modify: "Quel élément voulez-vous modifier?".to_string(),
            repeat: "Pouvez-vous répéter?".to_string(),
            thank_you: "Merci, vous êtes enregistré.".to_string(),
            farewell: "Au revoir, bonne journée.".to_string(),
            floor_label: "Étage".to_string(),
            room_label: "Chambre".to_string(),
        }
    }
}

impl Prompts {
    /// Fixed text for prompts that do not depend on a property
    pub fn text(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::Greeting => &self.greeting,
            PromptKind::AskFloor => &self.ask_floor,
            PromptKind::ClarifyFloor => &self.clarify_floor,
            PromptKind::AskRoom => &self.ask_room,
            PromptKind::ClarifyRoom => &self.clarify_room,
            PromptKind::AskProperty => &self.ask_property,
            PromptKind::NeedProperty => &self.need_property,
            PromptKind::Listening => &self.listening,
            PromptKind::Confirm => &self.confirm,
            PromptKind::Modify => &self.modify,
            PromptKind::Repeat => &self.repeat,
            PromptKind::ThankYou => &self.thank_you,
            PromptKind::Farewell => &self.farewell,
        }
    }

    pub fn with_label(template: &str, label: &str) -> String {
        template.replace("{label}", label)
    }
}
