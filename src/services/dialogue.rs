//! Conversation state machine
//!
//! Pure: takes a classification for the current stage and returns the side
//! effects to perform. One handler per stage. A transition that changes stage
//! speaks the new stage's question once, a stay speaks one re-prompt.

use crate::domain::dialogue::{intents, INTEGER_SUBTYPE, ORDINAL_ENTITY};
use crate::domain::types::ClassificationResult;
use crate::domain::visitor::{PropertyAnswer, PropertyDefinition, VisitorRecord};
use crate::domain::{DialogueStage, PromptKind, Prompts};
use crate::infra::config::Config;
use smallvec::{smallvec, SmallVec};
use tracing::{debug, info};

pub const CLASSIFICATION_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub enum DialogueEffect {
    Speak { prompt: PromptKind, text: String },
    /// Hand the finished record to the submission sink
    Submit(VisitorRecord),
    /// Session is over, the kiosk should pause
    EndSession,
}

pub type DialogueEffects = SmallVec<[DialogueEffect; 3]>;

pub struct DialogueMachine {
    stage: DialogueStage,
    /// Stage to return to once a modified field is re-collected
    follow_up: Option<DialogueStage>,
    record: VisitorRecord,
    properties: Vec<PropertyDefinition>,
    prompts: Prompts,
    threshold: f64,
    require_room: bool,
}

impl DialogueMachine {
    pub fn new(
        properties: Vec<PropertyDefinition>,
        prompts: Prompts,
        threshold: f64,
        require_room: bool,
    ) -> Self {
        Self {
            stage: DialogueStage::Inactive,
            follow_up: None,
            record: VisitorRecord::new(),
            properties,
            prompts,
            threshold,
            require_room,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.properties().to_vec(),
            config.prompts().clone(),
            config.classification_threshold(),
            config.require_room(),
        )
    }

    pub fn stage(&self) -> &DialogueStage {
        &self.stage
    }

    pub fn record(&self) -> &VisitorRecord {
        &self.record
    }

    pub fn properties(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    pub fn is_active(&self) -> bool {
        self.stage.is_active()
    }

    /// Presence acquired: greet the visitor with a fresh record
    pub fn start(&mut self) -> DialogueEffects {
        if self.is_active() {
            debug!(stage = %self.stage, "dialogue_already_active");
            return DialogueEffects::new();
        }
        self.record.clear();
        self.follow_up = None;
        smallvec![self.move_to(DialogueStage::Greeting)]
    }

    /// Presence lost: drop everything silently
    pub fn reset(&mut self) {
        if self.is_active() {
            info!(stage = %self.stage, "dialogue_reset");
        }
        self.stage = DialogueStage::Inactive;
        self.follow_up = None;
        self.record.clear();
    }

    /// Classifier could not be reached: ask again without recording anything
    pub fn on_classification_unavailable(&mut self) -> DialogueEffects {
        if !self.is_active() {
            return DialogueEffects::new();
        }
        smallvec![self.repeat()]
    }

    pub fn on_classification(&mut self, result: &ClassificationResult) -> DialogueEffects {
        match self.stage.clone() {
            DialogueStage::Inactive => DialogueEffects::new(),
            DialogueStage::Greeting => self.handle_greeting(result),
            DialogueStage::AskFloor => self.handle_ask_floor(result),
            DialogueStage::AskRoom => self.handle_ask_room(result),
            DialogueStage::CollectProperties { property_id } => {
                self.handle_collect_property(&property_id, result)
            }
            DialogueStage::Confirm => self.handle_confirm(result),
            DialogueStage::ModifySelection => self.handle_modify_selection(result),
        }
    }

    /// Question for the current stage, re-issued after a speech device failure
    pub fn current_question(&self) -> Option<DialogueEffect> {
        let (prompt, text) = match &self.stage {
            DialogueStage::Inactive => return None,
            DialogueStage::Greeting => (PromptKind::Greeting, self.prompts.greeting.clone()),
            DialogueStage::AskFloor => (PromptKind::AskFloor, self.prompts.ask_floor.clone()),
            DialogueStage::AskRoom => (PromptKind::AskRoom, self.prompts.ask_room.clone()),
            DialogueStage::CollectProperties { property_id } => {
                (PromptKind::AskProperty, self.property_prompt(property_id))
            }
            DialogueStage::Confirm => (PromptKind::Confirm, self.confirm_text()),
            DialogueStage::ModifySelection => (PromptKind::Modify, self.prompts.modify.clone()),
        };
        Some(DialogueEffect::Speak { prompt, text })
    }

    fn handle_greeting(&mut self, result: &ClassificationResult) -> DialogueEffects {
        match result.best_intent(&[intents::POSITIVE, intents::NEGATIVE], self.threshold) {
            Some(intents::POSITIVE) => smallvec![self.move_to(DialogueStage::AskFloor)],
            Some(_) => {
                info!("visitor_declined");
                self.stage = DialogueStage::Inactive;
                self.record.clear();
                smallvec![self.speak(PromptKind::Farewell), DialogueEffect::EndSession]
            }
            None => smallvec![self.repeat()],
        }
    }

    fn ordinal_value(&self, result: &ClassificationResult) -> Option<String> {
        result
            .entities
            .iter()
            .find(|e| {
                e.entity_type == ORDINAL_ENTITY
                    && e.accuracy >= self.threshold
                    && e.subtype.as_deref() == Some(INTEGER_SUBTYPE)
            })
            .map(|e| e.value.clone())
    }

    fn handle_ask_floor(&mut self, result: &ClassificationResult) -> DialogueEffects {
        if let Some(floor) = self.ordinal_value(result) {
            info!(floor = %floor, "floor_recorded");
            self.record.floor = Some(floor);
            return smallvec![self.advance()];
        }
        if result.has_intent(intents::UNSURE, self.threshold) {
            return smallvec![self.speak(PromptKind::ClarifyFloor)];
        }
        smallvec![self.repeat()]
    }

    fn handle_ask_room(&mut self, result: &ClassificationResult) -> DialogueEffects {
        if let Some(room) = self.ordinal_value(result) {
            info!(room = %room, "room_recorded");
            self.record.room = Some(room);
            return smallvec![self.advance()];
        }
        if result.has_intent(intents::UNSURE, self.threshold) {
            return smallvec![self.speak(PromptKind::ClarifyRoom)];
        }
        smallvec![self.repeat()]
    }

    fn handle_collect_property(
        &mut self,
        property_id: &str,
        result: &ClassificationResult,
    ) -> DialogueEffects {
        let Some(def) = self.properties.iter().find(|p| p.id == property_id).cloned() else {
            return smallvec![self.advance()];
        };

        let answer = match &def.answer {
            PropertyAnswer::Entity { entity } => {
                result.entity(entity, self.threshold).map(|e| (e.value.clone(), e.value.clone()))
            }
            PropertyAnswer::Choice { options } => {
                let labels: SmallVec<[&str; 8]> =
                    options.iter().map(|o| o.intent.as_str()).collect();
                result.best_intent(&labels, self.threshold).and_then(|winner| {
                    options
                        .iter()
                        .find(|o| o.intent == winner)
                        .map(|o| (o.value.clone(), o.label.clone()))
                })
            }
        };

        if let Some((value, label)) = answer {
            info!(property = %def.id, value = %value, "property_recorded");
            self.record.set_property(&def.id, value, label);
            return smallvec![self.advance()];
        }

        let reply = result.best_intent(
            &[intents::NEGATIVE, intents::UNSURE, intents::POSITIVE],
            self.threshold,
        );
        match reply {
            Some(intents::POSITIVE) => smallvec![self.speak(PromptKind::Listening)],
            Some(_) => {
                let text = def.need_prompt.clone().unwrap_or_else(|| {
                    Prompts::with_label(&self.prompts.need_property, &def.label)
                });
                smallvec![DialogueEffect::Speak { prompt: PromptKind::NeedProperty, text }]
            }
            None => smallvec![self.repeat()],
        }
    }

    fn handle_confirm(&mut self, result: &ClassificationResult) -> DialogueEffects {
        let reply = result.best_intent(
            &[intents::POSITIVE, intents::NEGATIVE, intents::UNSURE],
            self.threshold,
        );
        match reply {
            Some(intents::POSITIVE) => {
                let record = std::mem::take(&mut self.record);
                self.stage = DialogueStage::Inactive;
                self.follow_up = None;
                info!(floor = ?record.floor, room = ?record.room, "visitor_confirmed");
                smallvec![
                    DialogueEffect::Submit(record),
                    self.speak(PromptKind::ThankYou),
                    DialogueEffect::EndSession
                ]
            }
            Some(_) => smallvec![self.move_to(DialogueStage::ModifySelection)],
            None => smallvec![self.repeat()],
        }
    }

    /// Change intents in declaration order with the stage each one opens
    fn change_targets(&self) -> SmallVec<[(String, DialogueStage); 8]> {
        let mut targets: SmallVec<[(String, DialogueStage); 8]> =
            smallvec![(intents::CHANGE_FLOOR.to_string(), DialogueStage::AskFloor)];
        if self.require_room {
            targets.push((intents::CHANGE_ROOM.to_string(), DialogueStage::AskRoom));
        }
        for def in &self.properties {
            if let Some(intent) = &def.change_intent {
                targets.push((
                    intent.clone(),
                    DialogueStage::CollectProperties { property_id: def.id.clone() },
                ));
            }
        }
        targets
    }

    fn handle_modify_selection(&mut self, result: &ClassificationResult) -> DialogueEffects {
        let targets = self.change_targets();
        let labels: SmallVec<[&str; 8]> = targets.iter().map(|(label, _)| label.as_str()).collect();
        let target = result
            .best_intent(&labels, self.threshold)
            .and_then(|winner| targets.iter().find(|(label, _)| label == winner))
            .map(|(_, stage)| stage.clone());

        match target {
            Some(stage) => {
                self.follow_up = Some(DialogueStage::Confirm);
                smallvec![self.move_to(stage)]
            }
            None => smallvec![self.repeat()],
        }
    }

    /// First field still missing, in collection order
    fn next_missing(&self) -> Option<DialogueStage> {
        if self.record.floor.is_none() {
            return Some(DialogueStage::AskFloor);
        }
        if self.require_room && self.record.room.is_none() {
            return Some(DialogueStage::AskRoom);
        }
        self.properties
            .iter()
            .find(|p| p.required && !self.record.has_property(&p.id))
            .map(|p| DialogueStage::CollectProperties { property_id: p.id.clone() })
    }

    fn advance(&mut self) -> DialogueEffect {
        let next = match self.next_missing() {
            Some(stage) => stage,
            None => self.follow_up.take().unwrap_or(DialogueStage::Confirm),
        };
        self.move_to(next)
    }

    fn move_to(&mut self, stage: DialogueStage) -> DialogueEffect {
        info!(from = %self.stage, to = %stage, "stage_changed");
        self.stage = stage;
        // Only Inactive has no question and move_to never targets it
        self.current_question().unwrap_or_else(|| self.repeat())
    }

    fn speak(&self, prompt: PromptKind) -> DialogueEffect {
        DialogueEffect::Speak { prompt, text: self.prompts.text(prompt).to_string() }
    }

    fn repeat(&self) -> DialogueEffect {
        self.speak(PromptKind::Repeat)
    }

    fn property_prompt(&self, property_id: &str) -> String {
        match self.properties.iter().find(|p| p.id == property_id) {
            Some(def) => def
                .prompt
                .clone()
                .unwrap_or_else(|| Prompts::with_label(&self.prompts.ask_property, &def.label)),
            None => Prompts::with_label(&self.prompts.ask_property, property_id),
        }
    }

    /// Spoken summary of the record followed by the confirm question
    fn confirm_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(floor) = &self.record.floor {
            parts.push(format!("{} {}", self.prompts.floor_label, floor));
        }
        if let Some(room) = &self.record.room {
            parts.push(format!("{} {}", self.prompts.room_label, room));
        }
        for def in &self.properties {
            if let Some(pv) = self.record.property(&def.id) {
                parts.push(format!("{} {}", def.label, pv.label));
            }
        }
        if parts.is_empty() {
            return self.prompts.confirm.clone();
        }
        format!("{}. {}", parts.join(", "), self.prompts.confirm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Entity, Intent};
    use crate::domain::visitor::{default_properties, PropertyOption};

    fn machine() -> DialogueMachine {
        DialogueMachine::new(default_properties(), Prompts::default(), CLASSIFICATION_THRESHOLD, true)
    }

    fn intents_only(scores: &[(&str, f64)]) -> ClassificationResult {
        ClassificationResult::new(
            scores
                .iter()
                .map(|(label, confidence)| Intent { label: label.to_string(), confidence: *confidence })
                .collect(),
            vec![],
        )
    }

    fn entity(entity_type: &str, value: &str, accuracy: f64, subtype: Option<&str>) -> ClassificationResult {
        ClassificationResult::new(
            vec![],
            vec![Entity {
                entity_type: entity_type.to_string(),
                value: value.to_string(),
                accuracy,
                subtype: subtype.map(str::to_string),
            }],
        )
    }

    fn ordinal(value: &str) -> ClassificationResult {
        entity("ordinal", value, 0.95, Some("integer"))
    }

    fn yes() -> ClassificationResult {
        intents_only(&[("confirmation.positive", 0.95)])
    }

    fn prompts_of(effects: &DialogueEffects) -> Vec<PromptKind> {
        effects
            .iter()
            .filter_map(|e| match e {
                DialogueEffect::Speak { prompt, .. } => Some(*prompt),
                _ => None,
            })
            .collect()
    }

    /// Drive a machine up to Confirm with floor 2, room 14, name and phone
    fn at_confirm() -> DialogueMachine {
        let mut m = machine();
        m.start();
        m.on_classification(&yes());
        m.on_classification(&ordinal("2"));
        m.on_classification(&ordinal("14"));
        m.on_classification(&entity("name", "Julie", 0.95, None));
        m.on_classification(&entity("phonenumber", "5145550000", 0.95, None));
        assert_eq!(m.stage(), &DialogueStage::Confirm);
        m
    }

    #[test]
    fn test_start_greets_once() {
        let mut m = machine();
        let effects = m.start();
        assert_eq!(prompts_of(&effects), vec![PromptKind::Greeting]);
        assert_eq!(m.stage(), &DialogueStage::Greeting);
        assert!(m.start().is_empty());
    }

    #[test]
    fn test_greeting_positive_asks_floor() {
        let mut m = machine();
        m.start();
        let effects = m.on_classification(&yes());
        assert_eq!(m.stage(), &DialogueStage::AskFloor);
        assert_eq!(
            effects.as_slice(),
            &[DialogueEffect::Speak {
                prompt: PromptKind::AskFloor,
                text: "Sur quel étage allez-vous?".to_string()
            }]
        );
    }

    #[test]
    fn test_greeting_low_confidence_repeats_once() {
        let mut m = machine();
        m.start();
        let effects = m.on_classification(&intents_only(&[
            ("confirmation.positive", 0.6),
            ("confirmation.negative", 0.3),
        ]));
        assert_eq!(m.stage(), &DialogueStage::Greeting);
        assert_eq!(prompts_of(&effects), vec![PromptKind::Repeat]);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_greeting_negative_ends_session() {
        let mut m = machine();
        m.start();
        let effects = m.on_classification(&intents_only(&[("confirmation.negative", 0.97)]));
        assert_eq!(m.stage(), &DialogueStage::Inactive);
        assert_eq!(prompts_of(&effects), vec![PromptKind::Farewell]);
        assert_eq!(effects.last(), Some(&DialogueEffect::EndSession));
    }

    #[test]
    fn test_floor_recorded_from_ordinal() {
        let mut m = machine();
        m.start();
        m.on_classification(&yes());
        let effects = m.on_classification(&ordinal("2"));
        assert_eq!(m.record().floor.as_deref(), Some("2"));
        assert_eq!(m.stage(), &DialogueStage::AskRoom);
        assert_eq!(prompts_of(&effects), vec![PromptKind::AskRoom]);
    }

    #[test]
    fn test_floor_requires_integer_subtype_and_accuracy() {
        let mut m = machine();
        m.start();
        m.on_classification(&yes());

        let effects = m.on_classification(&entity("ordinal", "2", 0.95, Some("float")));
        assert_eq!(prompts_of(&effects), vec![PromptKind::Repeat]);
        let effects = m.on_classification(&entity("ordinal", "2", 0.5, Some("integer")));
        assert_eq!(prompts_of(&effects), vec![PromptKind::Repeat]);
        assert_eq!(m.record().floor, None);
        assert_eq!(m.stage(), &DialogueStage::AskFloor);
    }

    #[test]
    fn test_unsure_floor_clarifies() {
        let mut m = machine();
        m.start();
        m.on_classification(&yes());
        let effects = m.on_classification(&intents_only(&[("confirmation.unsure", 0.92)]));
        assert_eq!(prompts_of(&effects), vec![PromptKind::ClarifyFloor]);
        assert_eq!(m.stage(), &DialogueStage::AskFloor);
    }

    #[test]
    fn test_room_skipped_when_not_required() {
        let mut m =
            DialogueMachine::new(default_properties(), Prompts::default(), CLASSIFICATION_THRESHOLD, false);
        m.start();
        m.on_classification(&yes());
        m.on_classification(&ordinal("3"));
        assert_eq!(
            m.stage(),
            &DialogueStage::CollectProperties { property_id: "name".to_string() }
        );
    }

    #[test]
    fn test_property_prompts() {
        let mut m = machine();
        m.start();
        m.on_classification(&yes());
        m.on_classification(&ordinal("2"));
        let effects = m.on_classification(&ordinal("14"));
        assert_eq!(prompts_of(&effects), vec![PromptKind::AskProperty]);

        let effects = m.on_classification(&intents_only(&[("confirmation.negative", 0.95)]));
        assert_eq!(
            effects.as_slice(),
            &[DialogueEffect::Speak {
                prompt: PromptKind::NeedProperty,
                text: "J'ai besoin d'un nom.".to_string()
            }]
        );

        let effects = m.on_classification(&yes());
        assert_eq!(prompts_of(&effects), vec![PromptKind::Listening]);

        let effects = m.on_classification(&intents_only(&[]));
        assert_eq!(prompts_of(&effects), vec![PromptKind::Repeat]);
        assert_eq!(
            m.stage(),
            &DialogueStage::CollectProperties { property_id: "name".to_string() }
        );
    }

    #[test]
    fn test_confirm_prompt_carries_summary() {
        let m = at_confirm();
        match m.current_question() {
            Some(DialogueEffect::Speak { prompt: PromptKind::Confirm, text }) => {
                assert_eq!(
                    text,
                    "Étage 2, Chambre 14, Nom Julie, Téléphone 5145550000. Est-ce que l'information est exacte?"
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_confirm_accept_submits_and_ends() {
        let mut m = at_confirm();
        let effects = m.on_classification(&yes());

        assert_eq!(effects.len(), 3);
        match &effects[0] {
            DialogueEffect::Submit(record) => {
                assert_eq!(record.floor.as_deref(), Some("2"));
                assert_eq!(record.property("phone").map(|p| p.value.as_str()), Some("5145550000"));
            }
            other => panic!("expected submit, got {:?}", other),
        }
        assert_eq!(prompts_of(&effects), vec![PromptKind::ThankYou]);
        assert_eq!(effects[2], DialogueEffect::EndSession);
        assert_eq!(m.stage(), &DialogueStage::Inactive);
        assert!(m.record().is_empty());
    }

    #[test]
    fn test_modify_flow_returns_to_confirm() {
        let mut m = at_confirm();
        let effects = m.on_classification(&intents_only(&[("confirmation.negative", 0.93)]));
        assert_eq!(prompts_of(&effects), vec![PromptKind::Modify]);
        assert_eq!(m.stage(), &DialogueStage::ModifySelection);

        let effects = m.on_classification(&intents_only(&[
            ("change.phone", 0.2),
            ("change.floor", 0.96),
        ]));
        assert_eq!(prompts_of(&effects), vec![PromptKind::AskFloor]);
        assert_eq!(m.stage(), &DialogueStage::AskFloor);

        let effects = m.on_classification(&ordinal("5"));
        assert_eq!(m.record().floor.as_deref(), Some("5"));
        assert_eq!(m.stage(), &DialogueStage::Confirm);
        assert_eq!(prompts_of(&effects), vec![PromptKind::Confirm]);
        // Other fields survive the modification
        assert_eq!(m.record().room.as_deref(), Some("14"));
    }

    #[test]
    fn test_modify_tie_goes_to_first_declared() {
        let mut m = at_confirm();
        m.on_classification(&intents_only(&[("confirmation.unsure", 0.93)]));
        m.on_classification(&intents_only(&[("change.phone", 0.95), ("change.name", 0.95)]));
        assert_eq!(
            m.stage(),
            &DialogueStage::CollectProperties { property_id: "name".to_string() }
        );
    }

    #[test]
    fn test_modify_below_threshold_repeats() {
        let mut m = at_confirm();
        m.on_classification(&intents_only(&[("confirmation.negative", 0.93)]));
        let effects = m.on_classification(&intents_only(&[("change.floor", 0.7)]));
        assert_eq!(prompts_of(&effects), vec![PromptKind::Repeat]);
        assert_eq!(m.stage(), &DialogueStage::ModifySelection);
    }

    #[test]
    fn test_choice_property() {
        let reason = PropertyDefinition {
            id: "reason".to_string(),
            label: "Motif".to_string(),
            required: true,
            answer: PropertyAnswer::Choice {
                options: vec![
                    PropertyOption {
                        value: "family".to_string(),
                        label: "Famille".to_string(),
                        intent: "reason.family".to_string(),
                    },
                    PropertyOption {
                        value: "work".to_string(),
                        label: "Travail".to_string(),
                        intent: "reason.work".to_string(),
                    },
                ],
            },
            change_intent: None,
            prompt: None,
            need_prompt: None,
        };
        let mut m = DialogueMachine::new(vec![reason], Prompts::default(), CLASSIFICATION_THRESHOLD, false);
        m.start();
        m.on_classification(&yes());
        let effects = m.on_classification(&ordinal("1"));
        assert_eq!(
            effects.as_slice(),
            &[DialogueEffect::Speak {
                prompt: PromptKind::AskProperty,
                text: "Puis-je avoir Motif?".to_string()
            }]
        );

        m.on_classification(&intents_only(&[("reason.work", 0.97), ("reason.family", 0.4)]));
        let value = m.record().property("reason").unwrap();
        assert_eq!(value.value, "work");
        assert_eq!(value.label, "Travail");
        assert_eq!(m.stage(), &DialogueStage::Confirm);
    }

    #[test]
    fn test_optional_property_not_asked() {
        let mut props = default_properties();
        props[1].required = false;
        let mut m = DialogueMachine::new(props, Prompts::default(), CLASSIFICATION_THRESHOLD, false);
        m.start();
        m.on_classification(&yes());
        m.on_classification(&ordinal("1"));
        m.on_classification(&entity("name", "Julie", 0.95, None));
        assert_eq!(m.stage(), &DialogueStage::Confirm);
    }

    #[test]
    fn test_classification_unavailable_repeats_without_recording() {
        let mut m = machine();
        assert!(m.on_classification_unavailable().is_empty());
        m.start();
        m.on_classification(&yes());
        let effects = m.on_classification_unavailable();
        assert_eq!(prompts_of(&effects), vec![PromptKind::Repeat]);
        assert_eq!(m.stage(), &DialogueStage::AskFloor);
        assert!(m.record().is_empty());
    }

    #[test]
    fn test_reset_discards_record() {
        let mut m = at_confirm();
        m.reset();
        assert_eq!(m.stage(), &DialogueStage::Inactive);
        assert!(m.record().is_empty());
        assert!(m.current_question().is_none());
        assert!(m.on_classification(&yes()).is_empty());
    }
}
