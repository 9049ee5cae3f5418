//! MQTT bridge to the speech front-end
//!
//! The synthesiser and recogniser run next to the screen and listen on:
//! - `{prefix}/tts/speak` - `{"id":3,"text":"...","locale":"fr-CA"}` (QoS 1)
//! - `{prefix}/tts/cancel` - `{"id":3}` (QoS 1)
//! - `{prefix}/stt/start` - `{"locale":"fr-CA"}` (QoS 1)
//! - `{prefix}/stt/stop` - `{}` (QoS 1)
//!
//! Completions come back on the topics read by `io::mqtt`.

use crate::domain::types::SpeechId;
use crate::error::{KioskError, KioskResult};
use crate::infra::config::Config;
use crate::services::speech::{SpeechRecognizer, SpeechSynthesizer};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct SpeakCommand<'a> {
    id: u64,
    text: &'a str,
    locale: &'a str,
}

#[derive(Debug, Serialize)]
struct CancelCommand {
    id: u64,
}

#[derive(Debug, Serialize)]
struct StartCommand<'a> {
    locale: &'a str,
}

pub struct MqttSpeechBridge {
    client: AsyncClient,
    locale: String,
    speak_topic: String,
    cancel_topic: String,
    start_topic: String,
    stop_topic: String,
}

impl MqttSpeechBridge {
    /// Connect to the broker at the configured MQTT host/port
    ///
    /// Spawns the eventloop; must be called inside a tokio runtime.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("{}-speech-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("speech_bridge_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("speech_bridge_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "speech_bridge_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self::with_client(client, config)
    }

    fn with_client(client: AsyncClient, config: &Config) -> Self {
        Self {
            client,
            locale: config.locale().to_string(),
            speak_topic: config.topic("tts/speak"),
            cancel_topic: config.topic("tts/cancel"),
            start_topic: config.topic("stt/start"),
            stop_topic: config.topic("stt/stop"),
        }
    }

    async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<(), String> {
        let json = serde_json::to_vec(payload).map_err(|e| e.to_string())?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, json)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SpeechSynthesizer for MqttSpeechBridge {
    async fn speak(&self, id: SpeechId, text: &str) -> KioskResult<()> {
        let command = SpeakCommand { id: id.0, text, locale: &self.locale };
        self.publish(&self.speak_topic, &command).await.map_err(KioskError::SynthesisFailure)?;
        debug!(speech_id = %id, "speak_published");
        Ok(())
    }

    async fn cancel(&self, id: SpeechId) -> KioskResult<()> {
        self.publish(&self.cancel_topic, &CancelCommand { id: id.0 })
            .await
            .map_err(KioskError::SynthesisFailure)
    }
}

#[async_trait]
impl SpeechRecognizer for MqttSpeechBridge {
    async fn start(&self, locale: &str) -> KioskResult<()> {
        self.publish(&self.start_topic, &StartCommand { locale })
            .await
            .map_err(KioskError::RecognitionStartFailure)
    }

    async fn stop(&self) -> KioskResult<()> {
        self.publish(&self.stop_topic, &serde_json::json!({}))
            .await
            .map_err(KioskError::RecognitionStopFailure)
    }
}
