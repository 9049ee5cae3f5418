//! Visitor interaction orchestration
//!
//! The Orchestrator is the single owner of kiosk state. It coordinates:
//! - Presence debouncing (who is standing in front of the camera)
//! - Turn-taking between the synthesiser and the recogniser
//! - The registration dialogue
//! - Session lifecycle and the post-session pause
//!
//! Detector batches, speech notifications and collaborator completions all
//! arrive on one queue. The periodic tick is the only source of time-based
//! transitions: presence aging, silence finalization, pause expiry, giving
//! up on a prompt whose finish never arrived, and re-prompts after a device
//! failure.

mod handlers;

use crate::domain::types::{KioskEvent, UtteranceId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::dialogue::DialogueMachine;
use crate::services::effect_worker::Effect;
use crate::services::presence::PresenceTracker;
use crate::services::turn_taking::{TurnMode, TurnTaking};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// One presence session
#[derive(Debug, Clone)]
pub struct Session {
    /// UUIDv7, also sent to the registry
    pub id: String,
    pub started_at: Instant,
}

pub struct Orchestrator {
    pub(crate) presence: PresenceTracker,
    pub(crate) turns: TurnTaking,
    pub(crate) dialogue: DialogueMachine,
    pub(crate) config: Config,
    /// Collaborator calls, executed by the effect worker
    pub(crate) effect_tx: mpsc::Sender<Effect>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) session: Option<Session>,
    /// Set after a session ends on its own, suppresses listening and new sessions
    pub(crate) paused_until: Option<Instant>,
    /// Utterance whose classification is in flight
    pub(crate) awaiting: Option<UtteranceId>,
    /// Re-issue the stage question on the next idle tick
    pub(crate) reprompt: bool,
    /// Cleared until the classifier answers; presence is not evaluated meanwhile
    pub(crate) ready: bool,
    last_drop_warn: Option<std::time::Instant>,
}

impl Orchestrator {
    pub fn new(config: Config, effect_tx: mpsc::Sender<Effect>, metrics: Arc<Metrics>) -> Self {
        Self {
            presence: PresenceTracker::new(config.debounce()),
            turns: TurnTaking::new(config.silence_timeout(), config.speaking_timeout()),
            dialogue: DialogueMachine::from_config(&config),
            config,
            effect_tx,
            metrics,
            session: None,
            paused_until: None,
            awaiting: None,
            reprompt: false,
            ready: true,
            last_drop_warn: None,
        }
    }

    /// Do not engage visitors before `KioskEvent::ClassifierReady` arrives
    pub fn hold_until_ready(&mut self) {
        self.ready = false;
    }

    /// Consume events until the channel closes or shutdown is signalled
    pub async fn run(
        &mut self,
        mut event_rx: mpsc::Receiver<KioskEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick_interval = interval(self.config.tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut metrics_interval =
            interval(Duration::from_secs(self.config.metrics_interval_secs().max(1)));
        // First tick completes immediately
        metrics_interval.tick().await;

        info!(
            tick_ms = %self.config.tick_interval().as_millis(),
            threshold = %self.config.classification_threshold(),
            properties = %self.dialogue.properties().len(),
            "orchestrator_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.shutdown();
                        break;
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e, Instant::now()),
                        None => break,
                    }
                }
                _ = tick_interval.tick() => {
                    self.tick(Instant::now());
                }
                _ = metrics_interval.tick() => {
                    self.metrics.report().log();
                }
            }
        }

        info!("orchestrator_stopped");
    }

    /// Process a single event, dispatching to the appropriate handler
    pub fn process_event(&mut self, event: KioskEvent, now: Instant) {
        let process_start = std::time::Instant::now();
        debug!(event = %event.as_str(), "event_received");

        match event {
            KioskEvent::FacesDetected(detections) => self.handle_faces(&detections),
            KioskEvent::UtteranceChunk(text) => self.handle_utterance_chunk(&text, now),
            KioskEvent::SynthesisFinished(id) => self.handle_synthesis_finished(id),
            KioskEvent::SynthesisCancelled(id) => self.handle_synthesis_interrupted(id, None),
            KioskEvent::SynthesisFailed { id, reason } => {
                self.handle_synthesis_interrupted(id, Some(&reason))
            }
            KioskEvent::RecognitionFailed { reason } => self.handle_recognition_failed(&reason),
            KioskEvent::Classified { utterance, outcome } => {
                self.handle_classified(utterance, outcome, now)
            }
            KioskEvent::SubmissionCompleted { session_id, outcome } => {
                self.handle_submission_completed(&session_id, outcome)
            }
            KioskEvent::DeviceUnavailable(device) => self.handle_device_unavailable(device),
            KioskEvent::ClassifierReady => self.handle_classifier_ready(),
        }

        self.metrics.set_stage(self.dialogue.stage().as_str());
        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    /// Clock tick: pause expiry, presence aging, silence finalization, speech
    /// watchdog, re-prompt
    pub fn tick(&mut self, now: Instant) {
        if let Some(until) = self.paused_until {
            if now < until {
                return;
            }
            self.paused_until = None;
            info!("pause_ended");
        }

        if !self.ready {
            return;
        }

        if let Some(event) = self.presence.tick(now) {
            self.handle_presence_event(event, now);
        }

        if let Some((utterance, command)) = self.turns.tick(now) {
            self.send_effect(Effect::Speech(command));
            self.handle_utterance_finalized(utterance);
        }

        if let Some(command) = self.turns.expire_speech(now) {
            warn!(command = ?command, "synthesis_finish_missing");
            self.metrics.record_speech_timeout();
            self.send_effect(Effect::Speech(command));
            if self.session.is_some() {
                self.reprompt = true;
            }
        }

        if self.reprompt
            && self.session.is_some()
            && self.awaiting.is_none()
            && self.turns.mode() == TurnMode::Idle
        {
            self.reprompt = false;
            if let Some(question) = self.dialogue.current_question() {
                self.metrics.record_reprompt();
                self.apply_dialogue_effects(std::iter::once(question).collect(), now);
            }
        }

        self.metrics.set_stage(self.dialogue.stage().as_str());
    }

    /// Stop speech devices before exit
    fn shutdown(&mut self) {
        for command in self.turns.stop() {
            self.send_effect(Effect::Speech(command));
        }
        if let Some(session) = self.session.take() {
            info!(session = %session.id, "session_closed_on_shutdown");
        }
        self.dialogue.reset();
    }

    /// Enqueue a collaborator call without blocking the loop
    pub(crate) fn send_effect(&mut self, effect: Effect) {
        let kind = effect.as_str();
        match self.effect_tx.try_send(effect) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.record_effect_dropped();
                let should_warn = self
                    .last_drop_warn
                    .map_or(true, |t| t.elapsed() > std::time::Duration::from_secs(1));
                if should_warn {
                    warn!(effect = %kind, "effect_dropped_queue_full");
                    self.last_drop_warn = Some(std::time::Instant::now());
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!(effect = %kind, "effect_channel_closed");
            }
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_until.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn dialogue(&self) -> &DialogueMachine {
        &self.dialogue
    }

    pub fn turn_mode(&self) -> TurnMode {
        self.turns.mode()
    }
}
