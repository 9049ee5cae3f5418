//! Event handlers for the Orchestrator
//!
//! Each handler runs to completion before the next event is read. Handlers
//! mutate state and enqueue effects; none of them awaits a collaborator.

use super::{Orchestrator, Session};
use crate::domain::types::{
    ClassificationResult, FaceDetection, PresenceEvent, SpeechId, Utterance, UtteranceId,
};
use crate::domain::visitor::VisitorRequest;
use crate::domain::PromptKind;
use crate::error::{Device, KioskError, KioskResult};
use crate::services::dialogue::{DialogueEffect, DialogueEffects};
use crate::services::effect_worker::Effect;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

impl Orchestrator {
    pub(crate) fn handle_faces(&mut self, detections: &[FaceDetection]) {
        self.presence.observe(detections);
    }

    pub(crate) fn handle_presence_event(&mut self, event: PresenceEvent, now: Instant) {
        match event {
            PresenceEvent::Acquired => {
                self.metrics.set_presence(true);
                if self.session.is_some() {
                    return;
                }
                self.start_session(now);
            }
            PresenceEvent::Lost => {
                self.metrics.set_presence(false);
                if let Some(session) = self.session.take() {
                    info!(
                        session = %session.id,
                        stage = %self.dialogue.stage(),
                        duration_ms = %now.saturating_duration_since(session.started_at).as_millis(),
                        "session_abandoned"
                    );
                    self.metrics.record_session_abandoned();
                }
                self.abort_interaction();
            }
        }
    }

    fn start_session(&mut self, now: Instant) {
        let session = Session { id: Uuid::now_v7().to_string(), started_at: now };
        info!(session = %session.id, "session_started");
        self.session = Some(session);
        self.metrics.record_session_started();

        let effects = self.dialogue.start();
        self.apply_dialogue_effects(effects, now);
    }

    /// Silence the devices and drop the record, no farewell
    fn abort_interaction(&mut self) {
        for command in self.turns.stop() {
            self.send_effect(Effect::Speech(command));
        }
        self.dialogue.reset();
        self.awaiting = None;
        self.reprompt = false;
    }

    /// Session ended by the dialogue itself: pause before greeting anyone again
    fn end_session(&mut self, now: Instant, submitted: bool) {
        if let Some(session) = self.session.take() {
            info!(
                session = %session.id,
                submitted = %submitted,
                duration_ms = %now.saturating_duration_since(session.started_at).as_millis(),
                "session_ended"
            );
            if submitted {
                self.metrics.record_session_completed();
            } else {
                self.metrics.record_session_declined();
            }
        }
        // Closing words keep playing; nothing listens afterwards
        self.paused_until = Some(now + self.config.pause());
        self.presence.clear();
        self.metrics.set_presence(false);
        self.awaiting = None;
        self.reprompt = false;
        info!(pause_ms = %self.config.pause().as_millis(), "pause_started");
    }

    pub(crate) fn handle_utterance_chunk(&mut self, text: &str, now: Instant) {
        if !self.turns.on_utterance_chunk(text, now) {
            debug!(mode = %self.turns.mode().as_str(), "utterance_chunk_ignored");
        }
    }

    pub(crate) fn handle_utterance_finalized(&mut self, utterance: Utterance) {
        self.metrics.record_utterance_finalized();
        let Some(session) = &self.session else {
            debug!(utterance = %utterance.id, "utterance_without_session");
            return;
        };
        info!(
            session = %session.id,
            utterance = %utterance.id,
            stage = %self.dialogue.stage(),
            text = %utterance.text,
            "utterance_finalized"
        );
        self.awaiting = Some(utterance.id);
        self.send_effect(Effect::Classify { utterance: utterance.id, text: utterance.text });
    }

    pub(crate) fn handle_classified(
        &mut self,
        utterance: UtteranceId,
        outcome: KioskResult<ClassificationResult>,
        now: Instant,
    ) {
        if self.awaiting != Some(utterance) {
            self.metrics.record_stale_result();
            debug!(utterance = %utterance, awaiting = ?self.awaiting, "stale_classification_ignored");
            return;
        }
        self.awaiting = None;

        let effects = match outcome {
            Ok(result) => self.dialogue.on_classification(&result),
            Err(e) => {
                warn!(utterance = %utterance, error = %e, "classification_unavailable");
                self.dialogue.on_classification_unavailable()
            }
        };
        self.apply_dialogue_effects(effects, now);
    }

    pub(crate) fn apply_dialogue_effects(&mut self, effects: DialogueEffects, now: Instant) {
        let mut submitted = false;
        for effect in effects {
            match effect {
                DialogueEffect::Speak { prompt, text } => self.speak(prompt, &text, now),
                DialogueEffect::Submit(record) => {
                    let Some(session) = &self.session else {
                        warn!("submit_without_session");
                        continue;
                    };
                    let request = VisitorRequest::from_record(
                        &session.id,
                        &record,
                        self.dialogue.properties(),
                        chrono::Utc::now(),
                    );
                    submitted = true;
                    self.send_effect(Effect::Submit(request));
                }
                DialogueEffect::EndSession => self.end_session(now, submitted),
            }
        }
    }

    fn speak(&mut self, prompt: PromptKind, text: &str, now: Instant) {
        let commands = match self.turns.speak(text, now) {
            Ok(commands) => commands,
            Err(e) => {
                // Still talking: cut the old prompt short
                debug!(error = %e, "speech_interrupted");
                for command in self.turns.stop() {
                    self.send_effect(Effect::Speech(command));
                }
                match self.turns.speak(text, now) {
                    Ok(commands) => commands,
                    Err(e) => {
                        warn!(error = %e, prompt = %prompt.as_str(), "speak_rejected");
                        return;
                    }
                }
            }
        };

        info!(prompt = %prompt.as_str(), stage = %self.dialogue.stage(), "prompt_spoken");
        for command in commands {
            self.send_effect(Effect::Speech(command));
        }
    }

    pub(crate) fn handle_synthesis_finished(&mut self, id: SpeechId) {
        let listen = self.session.is_some() && self.paused_until.is_none();
        if let Some(command) = self.turns.on_synthesis_finished(id, listen) {
            debug!(speech_id = %id, "listening_started");
            self.send_effect(Effect::Speech(command));
        }
    }

    pub(crate) fn handle_synthesis_interrupted(&mut self, id: SpeechId, reason: Option<&str>) {
        if !self.turns.on_synthesis_interrupted(id) {
            return;
        }
        match reason {
            Some(reason) => warn!(speech_id = %id, reason = %reason, "synthesis_failed"),
            None => info!(speech_id = %id, "synthesis_cancelled"),
        }
        if self.session.is_some() {
            self.reprompt = true;
        }
    }

    pub(crate) fn handle_recognition_failed(&mut self, reason: &str) {
        if !self.turns.on_recognition_failed() {
            debug!(reason = %reason, "recognition_failure_ignored");
            return;
        }
        warn!(reason = %reason, "recognition_failed");
        if self.session.is_some() {
            self.reprompt = true;
        }
    }

    pub(crate) fn handle_device_unavailable(&mut self, device: Device) {
        let err = KioskError::PermissionDenied(device);
        warn!(device = %device, error = %err, "permission_denied");
        if let Some(session) = self.session.take() {
            info!(session = %session.id, device = %device, "session_stopped_device_unavailable");
            self.metrics.record_session_abandoned();
        }
        self.abort_interaction();
        self.presence.clear();
        self.metrics.set_presence(false);
    }

    pub(crate) fn handle_classifier_ready(&mut self) {
        if !self.ready {
            self.ready = true;
            info!("visitors_engaged");
        }
    }

    pub(crate) fn handle_submission_completed(&mut self, session_id: &str, outcome: KioskResult<()>) {
        match outcome {
            Ok(()) => {
                info!(session = %session_id, "visitor_submitted");
                self.metrics.record_submission(true);
            }
            Err(e) => {
                error!(session = %session_id, error = %e, "visitor_submission_failed");
                self.metrics.record_submission(false);
            }
        }
    }
}
