//! MQTT client for the camera and speech front-end notifications
//!
//! Subscribes to the kiosk topics under the configured prefix:
//! - `{prefix}/faces` - face detector batches
//! - `{prefix}/tts/events` - synthesiser notifications
//! - `{prefix}/stt/results` - partial transcripts
//! - `{prefix}/stt/error` - recogniser errors
//! - `{prefix}/device` - camera/microphone permission status

use crate::domain::types::{FaceDetection, FaceId, KioskEvent, SpeechId};
use crate::error::Device;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const FACES_TOPIC: &str = "faces";
pub const TTS_EVENTS_TOPIC: &str = "tts/events";
pub const STT_RESULTS_TOPIC: &str = "stt/results";
pub const STT_ERROR_TOPIC: &str = "stt/error";
pub const DEVICE_TOPIC: &str = "device";

const SUBSCRIPTIONS: [&str; 5] =
    [FACES_TOPIC, TTS_EVENTS_TOPIC, STT_RESULTS_TOPIC, STT_ERROR_TOPIC, DEVICE_TOPIC];

/// Face batches repeat several times a second, so losing one is harmless.
/// Speech and device notifications each drive a state change.
fn subscription_qos(suffix: &str) -> QoS {
    if suffix == FACES_TOPIC {
        QoS::AtMostOnce
    } else {
        QoS::AtLeastOnce
    }
}

/// Only face batches may be dropped when the orchestrator queue is full
fn is_droppable(event: &KioskEvent) -> bool {
    matches!(event, KioskEvent::FacesDetected(_))
}

#[derive(Debug, Deserialize)]
struct FaceBatch {
    #[serde(default)]
    faces: Vec<FaceEntry>,
}

#[derive(Debug, Deserialize)]
struct FaceEntry {
    #[serde(alias = "faceID", alias = "faceId")]
    face_id: i64,
}

#[derive(Debug, Deserialize)]
struct SynthesisNotification {
    id: u64,
    event: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    value: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecognitionError {
    #[serde(default, alias = "message")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceStatus {
    device: String,
    status: String,
}

/// Start the MQTT client and forward parsed events to the orchestrator queue
///
/// Face batches are sent via try_send to avoid blocking the MQTT eventloop;
/// dropped batches are counted in metrics and logged (rate-limited). Speech
/// and device notifications wait for room on the queue instead.
pub async fn start_mqtt_client(
    config: &Config,
    event_tx: mpsc::Sender<KioskEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingest", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    for suffix in SUBSCRIPTIONS {
        client.subscribe(config.topic(suffix), subscription_qos(suffix)).await?;
    }

    let prefix = format!("{}/", config.topic_prefix());
    info!(prefix = %config.topic_prefix(), host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_subscribed");

    let mut last_drop_warn = std::time::Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let received_at = Instant::now();
                        let Some(suffix) = publish.topic.strip_prefix(&prefix) else {
                            continue;
                        };
                        let payload = match std::str::from_utf8(&publish.payload) {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "mqtt_payload_not_utf8");
                                continue;
                            }
                        };

                        let Some(event) = parse_message(suffix, payload, received_at) else {
                            continue;
                        };
                        debug!(topic = %publish.topic, event = %event.as_str(), "mqtt_event");

                        if !is_droppable(&event) {
                            if event_tx.send(event).await.is_err() {
                                warn!("event_channel_closed");
                                return Ok(());
                            }
                            continue;
                        }

                        match event_tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                metrics.record_event_dropped();
                                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                    warn!("mqtt_event_dropped: channel full");
                                    last_drop_warn = std::time::Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("event_channel_closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Turn one MQTT message into an orchestrator event
///
/// `topic` is the topic with the kiosk prefix stripped. Returns None for
/// unknown topics, malformed payloads and notifications that carry no state
/// change (empty face batches, synthesis start).
pub fn parse_message(topic: &str, payload: &str, received_at: Instant) -> Option<KioskEvent> {
    let parsed = match topic {
        FACES_TOPIC => serde_json::from_str::<FaceBatch>(payload).map(|batch| {
            if batch.faces.is_empty() {
                return None;
            }
            let detections = batch
                .faces
                .into_iter()
                .map(|f| FaceDetection { face_id: FaceId(f.face_id), timestamp: received_at })
                .collect();
            Some(KioskEvent::FacesDetected(detections))
        }),
        TTS_EVENTS_TOPIC => {
            serde_json::from_str::<SynthesisNotification>(payload).map(parse_synthesis_notification)
        }
        STT_RESULTS_TOPIC => serde_json::from_str::<RecognitionResult>(payload).map(|result| {
            result
                .value
                .into_iter()
                .next()
                .filter(|text| !text.trim().is_empty())
                .map(KioskEvent::UtteranceChunk)
        }),
        STT_ERROR_TOPIC => {
            let reason = serde_json::from_str::<RecognitionError>(payload)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| payload.trim().to_string());
            return Some(KioskEvent::RecognitionFailed { reason });
        }
        DEVICE_TOPIC => serde_json::from_str::<DeviceStatus>(payload).map(parse_device_status),
        other => {
            debug!(topic = %other, "mqtt_topic_ignored");
            return None;
        }
    };

    match parsed {
        Ok(event) => event,
        Err(e) => {
            debug!(topic = %topic, error = %e, "mqtt_payload_invalid");
            None
        }
    }
}

fn parse_synthesis_notification(n: SynthesisNotification) -> Option<KioskEvent> {
    let id = SpeechId(n.id);
    match n.event.as_str() {
        "finish" | "end" => Some(KioskEvent::SynthesisFinished(id)),
        "cancel" => Some(KioskEvent::SynthesisCancelled(id)),
        "error" => Some(KioskEvent::SynthesisFailed {
            id,
            reason: n.reason.unwrap_or_else(|| "unknown".to_string()),
        }),
        _ => None,
    }
}

fn parse_device_status(status: DeviceStatus) -> Option<KioskEvent> {
    if status.status != "denied" {
        return None;
    }
    match status.device.parse::<Device>() {
        Ok(device) => Some(KioskEvent::DeviceUnavailable(device)),
        Err(e) => {
            warn!(error = %e, "device_status_unknown");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(topic: &str, payload: &str) -> Option<KioskEvent> {
        parse_message(topic, payload, Instant::now())
    }

    #[test]
    fn test_parse_face_batch() {
        let at = Instant::now();
        let event = parse_message("faces", r#"{"faces":[{"face_id":1},{"faceID":2}]}"#, at);
        match event {
            Some(KioskEvent::FacesDetected(detections)) => {
                assert_eq!(detections.len(), 2);
                assert_eq!(detections[0].face_id, FaceId(1));
                assert_eq!(detections[1].face_id, FaceId(2));
                assert_eq!(detections[1].timestamp, at);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_face_batch_ignored() {
        assert_eq!(parse("faces", r#"{"faces":[]}"#), None);
        assert_eq!(parse("faces", "{}"), None);
    }

    #[test]
    fn test_parse_synthesis_events() {
        assert_eq!(
            parse("tts/events", r#"{"id":3,"event":"finish"}"#),
            Some(KioskEvent::SynthesisFinished(SpeechId(3)))
        );
        assert_eq!(
            parse("tts/events", r#"{"id":3,"event":"cancel"}"#),
            Some(KioskEvent::SynthesisCancelled(SpeechId(3)))
        );
        assert_eq!(
            parse("tts/events", r#"{"id":4,"event":"error","reason":"busy"}"#),
            Some(KioskEvent::SynthesisFailed { id: SpeechId(4), reason: "busy".to_string() })
        );
        assert_eq!(parse("tts/events", r#"{"id":4,"event":"start"}"#), None);
    }

    #[test]
    fn test_parse_partial_transcript() {
        assert_eq!(
            parse("stt/results", r#"{"value":["deuxième étage","deux étages"]}"#),
            Some(KioskEvent::UtteranceChunk("deuxième étage".to_string()))
        );
        assert_eq!(parse("stt/results", r#"{"value":[]}"#), None);
        assert_eq!(parse("stt/results", r#"{"value":["  "]}"#), None);
    }

    #[test]
    fn test_parse_recognition_error() {
        assert_eq!(
            parse("stt/error", r#"{"error":"no match"}"#),
            Some(KioskEvent::RecognitionFailed { reason: "no match".to_string() })
        );
        assert_eq!(
            parse("stt/error", "network"),
            Some(KioskEvent::RecognitionFailed { reason: "network".to_string() })
        );
    }

    #[test]
    fn test_parse_device_status() {
        assert_eq!(
            parse("device", r#"{"device":"camera","status":"denied"}"#),
            Some(KioskEvent::DeviceUnavailable(Device::Camera))
        );
        assert_eq!(
            parse("device", r#"{"device":"audio","status":"denied"}"#),
            Some(KioskEvent::DeviceUnavailable(Device::Microphone))
        );
        assert_eq!(parse("device", r#"{"device":"camera","status":"granted"}"#), None);
        assert_eq!(parse("device", r#"{"device":"toaster","status":"denied"}"#), None);
    }

    #[test]
    fn test_invalid_payloads_ignored() {
        assert_eq!(parse("faces", "not json"), None);
        assert_eq!(parse("tts/events", r#"{"event":"finish"}"#), None);
        assert_eq!(parse("tts/speak", r#"{"id":1}"#), None);
    }

    #[test]
    fn test_only_faces_are_best_effort() {
        assert_eq!(subscription_qos(FACES_TOPIC), QoS::AtMostOnce);
        for suffix in [TTS_EVENTS_TOPIC, STT_RESULTS_TOPIC, STT_ERROR_TOPIC, DEVICE_TOPIC] {
            assert_eq!(subscription_qos(suffix), QoS::AtLeastOnce, "{}", suffix);
        }

        let faces = parse("faces", r#"{"faces":[{"face_id":1}]}"#).unwrap();
        assert!(is_droppable(&faces));
        let finished = parse("tts/events", r#"{"id":4,"event":"finish"}"#).unwrap();
        assert!(!is_droppable(&finished));
        let chunk = parse("stt/results", r#"{"value":["oui"]}"#).unwrap();
        assert!(!is_droppable(&chunk));
    }
}
