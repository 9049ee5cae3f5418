//! End-to-end visitor sessions against scripted collaborators
//!
//! Runs the orchestrator loop, effect worker and a simulated camera on a
//! paused clock. The fake speech devices answer immediately: synthesis
//! finishes as soon as it is requested and each recognition start yields the
//! next scripted answer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{Duration, Instant};
use visitor_kiosk::domain::types::{
    ClassificationResult, Entity, FaceDetection, FaceId, Intent, KioskEvent, SpeechId,
};
use visitor_kiosk::domain::VisitorRequest;
use visitor_kiosk::error::KioskResult;
use visitor_kiosk::infra::{Config, Metrics};
use visitor_kiosk::services::{
    create_effect_worker, Collaborators, IntentClassifier, Orchestrator, SpeechRecognizer,
    SpeechSynthesizer, SubmissionSink,
};

struct FakeSpeech {
    event_tx: mpsc::Sender<KioskEvent>,
    answers: Mutex<VecDeque<&'static str>>,
    spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn speak(&self, id: SpeechId, text: &str) -> KioskResult<()> {
        self.spoken.lock().push(text.to_string());
        let _ = self.event_tx.send(KioskEvent::SynthesisFinished(id)).await;
        Ok(())
    }

    async fn cancel(&self, id: SpeechId) -> KioskResult<()> {
        let _ = self.event_tx.send(KioskEvent::SynthesisCancelled(id)).await;
        Ok(())
    }
}

#[async_trait]
impl SpeechRecognizer for FakeSpeech {
    async fn start(&self, _locale: &str) -> KioskResult<()> {
        let answer = self.answers.lock().pop_front();
        if let Some(text) = answer {
            let _ = self.event_tx.send(KioskEvent::UtteranceChunk(text.to_string())).await;
        }
        Ok(())
    }

    async fn stop(&self) -> KioskResult<()> {
        Ok(())
    }
}

struct ScriptedClassifier;

fn entity(entity_type: &str, value: &str, subtype: Option<&str>) -> ClassificationResult {
    ClassificationResult::new(
        vec![],
        vec![Entity {
            entity_type: entity_type.to_string(),
            value: value.to_string(),
            accuracy: 0.95,
            subtype: subtype.map(str::to_string),
        }],
    )
}

#[async_trait]
impl IntentClassifier for ScriptedClassifier {
    async fn classify(&self, _locale: &str, text: &str) -> KioskResult<ClassificationResult> {
        let result = match text {
            "oui" => ClassificationResult::new(
                vec![Intent { label: "confirmation.positive".to_string(), confidence: 0.95 }],
                vec![],
            ),
            "deux" => entity("ordinal", "2", Some("integer")),
            "quatorze" => entity("ordinal", "14", Some("integer")),
            "Julie" => entity("name", "Julie", None),
            "514 555 0000" => entity("phonenumber", "5145550000", None),
            _ => ClassificationResult::default(),
        };
        Ok(result)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingSink {
    requests: Mutex<Vec<VisitorRequest>>,
    submitted: Notify,
}

#[async_trait]
impl SubmissionSink for RecordingSink {
    async fn submit(&self, request: &VisitorRequest) -> KioskResult<()> {
        self.requests.lock().push(request.clone());
        self.submitted.notify_one();
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct Kiosk {
    speech: Arc<FakeSpeech>,
    sink: Arc<RecordingSink>,
    metrics: Arc<Metrics>,
    camera_off: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Kiosk {
    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        self.handle.await.unwrap();
    }
}

fn start_kiosk(answers: &[&'static str]) -> Kiosk {
    let config = Config::default();
    let metrics = Arc::new(Metrics::new());
    let (event_tx, event_rx) = mpsc::channel(1000);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let speech = Arc::new(FakeSpeech {
        event_tx: event_tx.clone(),
        answers: Mutex::new(answers.iter().copied().collect()),
        spoken: Mutex::new(Vec::new()),
    });
    let sink = Arc::new(RecordingSink::default());
    let collaborators = Collaborators {
        synthesizer: speech.clone(),
        recognizer: speech.clone(),
        classifier: Arc::new(ScriptedClassifier),
        sink: sink.clone(),
    };

    let (effect_tx, worker) =
        create_effect_worker(collaborators, event_tx.clone(), config.locale(), metrics.clone(), 64);
    tokio::spawn(worker.run());

    // Camera: face 1 every 200 ms until switched off
    let camera_off = Arc::new(AtomicBool::new(false));
    let camera_flag = camera_off.clone();
    tokio::spawn(async move {
        while !camera_flag.load(Ordering::Relaxed) {
            let detection = FaceDetection { face_id: FaceId(1), timestamp: Instant::now() };
            if event_tx.send(KioskEvent::FacesDetected(vec![detection])).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let mut orchestrator = Orchestrator::new(config, effect_tx, metrics.clone());
    let handle = tokio::spawn(async move {
        orchestrator.run(event_rx, shutdown_rx).await;
    });

    Kiosk { speech, sink, metrics, camera_off, shutdown_tx, handle }
}

#[tokio::test(start_paused = true)]
async fn test_visitor_registers_end_to_end() {
    let kiosk = start_kiosk(&["oui", "deux", "quatorze", "Julie", "514 555 0000", "oui"]);

    tokio::time::timeout(Duration::from_secs(60), kiosk.sink.submitted.notified())
        .await
        .expect("visitor was never submitted");

    let requests = kiosk.sink.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.request_for.floor.as_deref(), Some("2"));
    assert_eq!(request.request_for.room.as_deref(), Some("14"));
    let values: Vec<&str> = request.options.iter().map(|o| o.value.as_str()).collect();
    assert_eq!(values, vec!["Julie", "5145550000"]);

    let spoken = kiosk.speech.spoken.lock().clone();
    assert_eq!(spoken.first().map(String::as_str), Some("Bonjour, vous venez pour une visite?"));
    assert!(spoken.contains(&"Sur quel étage allez-vous?".to_string()));
    assert!(spoken.contains(
        &"Étage 2, Chambre 14, Nom Julie, Téléphone 5145550000. Est-ce que l'information est exacte?"
            .to_string()
    ));
    assert_eq!(kiosk.metrics.sessions_completed(), 1);

    kiosk.camera_off.store(true, Ordering::Relaxed);
    kiosk.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_visitor_walks_away() {
    let kiosk = start_kiosk(&["oui"]);

    // Greeted at 1 s, answers, gets the floor question
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(kiosk.metrics.sessions_started(), 1);
    kiosk.camera_off.store(true, Ordering::Relaxed);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(kiosk.metrics.sessions_abandoned(), 1);
    assert!(kiosk.sink.requests.lock().is_empty());

    let spoken = kiosk.speech.spoken.lock().clone();
    assert_eq!(
        spoken,
        vec!["Bonjour, vous venez pour une visite?".to_string(), "Sur quel étage allez-vous?".to_string()]
    );

    kiosk.stop().await;
}
