//! Visitor kiosk - spoken registration at a building entrance
//!
//! Greets a visitor standing in front of the camera, asks for their
//! destination and contact details, confirms them and sends the request to
//! the visitor registry.
//!
//! Module structure:
//! - `domain/` - Core types (events, visitor record, dialogue stages)
//! - `io/` - External interfaces (MQTT, speech bridge, NLU, registry)
//! - `services/` - Orchestrator, presence, turn-taking, dialogue
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use visitor_kiosk::infra::{Config, Metrics};
use visitor_kiosk::io::{HttpIntentClassifier, HttpRegistryClient, MqttSpeechBridge};
use visitor_kiosk::services::{
    announce_when_ready, create_effect_worker, Collaborators, IntentClassifier, LoggingSink,
    Orchestrator, SubmissionSink,
};

/// Visitor kiosk orchestrator
#[derive(Parser, Debug)]
#[command(name = "visitor-kiosk", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/kiosk.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "visitor-kiosk starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_config_path);
    let config = Config::load_from_path(&config_path);

    visitor_kiosk::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        locale = %config.locale(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        topic_prefix = %config.topic_prefix(),
        nlu_url = %config.nlu_url(),
        registry = %config.registry_url().is_some(),
        threshold = %config.classification_threshold(),
        properties = %config.properties().len(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Bounded for backpressure
    let (event_tx, event_rx) = mpsc::channel(1000);

    let bridge = Arc::new(MqttSpeechBridge::new(&config));
    let classifier: Arc<dyn IntentClassifier> = Arc::new(
        HttpIntentClassifier::new(&config).context("Failed to build intent classifier client")?,
    );
    let sink: Arc<dyn SubmissionSink> = match config.registry_url() {
        Some(url) => Arc::new(
            HttpRegistryClient::new(url, &config).context("Failed to build registry client")?,
        ),
        None => Arc::new(LoggingSink),
    };
    let collaborators = Collaborators {
        synthesizer: bridge.clone(),
        recognizer: bridge,
        classifier: classifier.clone(),
        sink,
    };

    let (effect_tx, effect_worker) =
        create_effect_worker(collaborators, event_tx.clone(), config.locale(), metrics.clone(), 256);
    tokio::spawn(effect_worker.run());

    let mut orchestrator = Orchestrator::new(config.clone(), effect_tx, metrics.clone());
    if config.nlu_wait_ready() {
        orchestrator.hold_until_ready();
        tokio::spawn(announce_when_ready(
            classifier,
            config.locale().to_string(),
            event_tx.clone(),
            config.nlu_ready_retry(),
        ));
    }

    // MQTT ingest
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = visitor_kiosk::io::mqtt::start_mqtt_client(
            &mqtt_config,
            event_tx,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = visitor_kiosk::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(event_rx, shutdown_rx).await;

    info!("visitor-kiosk shutdown complete");
    Ok(())
}
