//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for detector and speech front-end notifications
//! - `speech_bridge` - MQTT publisher driving the synthesiser and recogniser
//! - `nlu` - HTTP intent classifier
//! - `registry` - HTTP visitor registry client
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod mqtt;
pub mod nlu;
pub mod prometheus;
pub mod registry;
pub mod speech_bridge;

// Re-export commonly used types
pub use nlu::HttpIntentClassifier;
pub use registry::HttpRegistryClient;
pub use speech_bridge::MqttSpeechBridge;
