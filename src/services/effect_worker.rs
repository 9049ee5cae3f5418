//! Effect worker - runs collaborator calls off the orchestrator loop
//!
//! The orchestrator never awaits a device or a remote service. It enqueues an
//! `Effect` with `try_send` and moves on; completions come back as
//! `KioskEvent`s on the orchestrator queue. Speech commands run inline so the
//! devices see them in order. Classification and submission run on their own
//! tasks because they can take seconds.

use crate::domain::types::{KioskEvent, UtteranceId};
use crate::domain::visitor::VisitorRequest;
use crate::infra::metrics::Metrics;
use crate::services::intent::IntentClassifier;
use crate::services::speech::{SpeechRecognizer, SpeechSynthesizer};
use crate::services::submission::SubmissionSink;
use crate::services::turn_taking::SpeechCommand;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A collaborator call requested by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Speech(SpeechCommand),
    Classify { utterance: UtteranceId, text: String },
    Submit(VisitorRequest),
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Speech(SpeechCommand::Synthesize { .. }) => "synthesize",
            Effect::Speech(SpeechCommand::CancelSynthesis { .. }) => "cancel_synthesis",
            Effect::Speech(SpeechCommand::StartRecognition) => "start_recognition",
            Effect::Speech(SpeechCommand::StopRecognition) => "stop_recognition",
            Effect::Classify { .. } => "classify",
            Effect::Submit(_) => "submit",
        }
    }
}

/// External collaborators the kiosk talks to
#[derive(Clone)]
pub struct Collaborators {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub sink: Arc<dyn SubmissionSink>,
}

pub struct EffectWorker {
    collaborators: Collaborators,
    effect_rx: mpsc::Receiver<Effect>,
    /// Orchestrator queue, for completions
    event_tx: mpsc::Sender<KioskEvent>,
    locale: Arc<str>,
    metrics: Arc<Metrics>,
}

impl EffectWorker {
    pub fn new(
        collaborators: Collaborators,
        effect_rx: mpsc::Receiver<Effect>,
        event_tx: mpsc::Sender<KioskEvent>,
        locale: &str,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { collaborators, effect_rx, event_tx, locale: Arc::from(locale), metrics }
    }

    /// Run the worker until the effect channel closes
    pub async fn run(mut self) {
        info!(
            classifier = %self.collaborators.classifier.name(),
            sink = %self.collaborators.sink.name(),
            "effect_worker_started"
        );

        while let Some(effect) = self.effect_rx.recv().await {
            debug!(effect = %effect.as_str(), "effect_received");
            self.execute(effect).await;
        }

        info!("effect_worker_stopped");
    }

    async fn execute(&self, effect: Effect) {
        match effect {
            Effect::Speech(command) => self.execute_speech(command).await,
            Effect::Classify { utterance, text } => self.spawn_classify(utterance, text),
            Effect::Submit(request) => self.spawn_submit(request),
        }
    }

    async fn execute_speech(&self, command: SpeechCommand) {
        match command {
            SpeechCommand::Synthesize { id, text } => {
                if let Err(e) = self.collaborators.synthesizer.speak(id, &text).await {
                    warn!(speech_id = %id, error = %e, "synthesis_request_failed");
                    self.report(KioskEvent::SynthesisFailed { id, reason: e.to_string() }).await;
                }
            }
            SpeechCommand::CancelSynthesis { id } => {
                if let Err(e) = self.collaborators.synthesizer.cancel(id).await {
                    warn!(speech_id = %id, error = %e, "synthesis_cancel_failed");
                }
            }
            SpeechCommand::StartRecognition => {
                if let Err(e) = self.collaborators.recognizer.start(&self.locale).await {
                    warn!(error = %e, "recognition_start_failed");
                    self.report(KioskEvent::RecognitionFailed { reason: e.to_string() }).await;
                }
            }
            SpeechCommand::StopRecognition => {
                if let Err(e) = self.collaborators.recognizer.stop().await {
                    warn!(error = %e, "recognition_stop_failed");
                }
            }
        }
    }

    fn spawn_classify(&self, utterance: UtteranceId, text: String) {
        let classifier = self.collaborators.classifier.clone();
        let event_tx = self.event_tx.clone();
        let locale = self.locale.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let start = Instant::now();
            let outcome = classifier.classify(&locale, &text).await;
            let latency_ms = start.elapsed().as_millis() as u64;
            metrics.record_classification(latency_ms, outcome.is_ok());

            match &outcome {
                Ok(result) => debug!(
                    utterance = %utterance,
                    latency_ms = %latency_ms,
                    top_intent = ?result.intents.first().map(|i| i.label.as_str()),
                    "classification_done"
                ),
                Err(e) => warn!(
                    utterance = %utterance,
                    latency_ms = %latency_ms,
                    error = %e,
                    "classification_failed"
                ),
            }

            if event_tx.send(KioskEvent::Classified { utterance, outcome }).await.is_err() {
                debug!("event_channel_closed");
            }
        });
    }

    fn spawn_submit(&self, request: VisitorRequest) {
        let sink = self.collaborators.sink.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let outcome = sink.submit(&request).await;
            let event =
                KioskEvent::SubmissionCompleted { session_id: request.session_id.clone(), outcome };
            if event_tx.send(event).await.is_err() {
                debug!("event_channel_closed");
            }
        });
    }

    async fn report(&self, event: KioskEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("event_channel_closed");
        }
    }
}

/// Create an effect channel and worker
///
/// Returns the sender (for the orchestrator) and the worker (to be spawned)
pub fn create_effect_worker(
    collaborators: Collaborators,
    event_tx: mpsc::Sender<KioskEvent>,
    locale: &str,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<Effect>, EffectWorker) {
    let (effect_tx, effect_rx) = mpsc::channel(buffer_size);
    let worker = EffectWorker::new(collaborators, effect_rx, event_tx, locale, metrics);
    (effect_tx, worker)
}

/// Probe the classifier until it answers, then tell the orchestrator
pub async fn announce_when_ready(
    classifier: Arc<dyn IntentClassifier>,
    locale: String,
    event_tx: mpsc::Sender<KioskEvent>,
    retry: Duration,
) {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match classifier.ready(&locale).await {
            Ok(()) => {
                info!(classifier = %classifier.name(), attempts = %attempts, "classifier_ready");
                if event_tx.send(KioskEvent::ClassifierReady).await.is_err() {
                    debug!("event_channel_closed");
                }
                return;
            }
            Err(e) => {
                // First failure and then every tenth, the service may take minutes to load
                if attempts == 1 || attempts % 10 == 0 {
                    warn!(
                        classifier = %classifier.name(),
                        attempts = %attempts,
                        error = %e,
                        "classifier_not_ready"
                    );
                }
                tokio::time::sleep(retry).await;
            }
        }
    }
}
