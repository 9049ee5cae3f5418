//! Speech device interfaces
//!
//! Both devices answer asynchronously: synthesis completion and recognition
//! results come back as `KioskEvent`s on the orchestrator queue, not as
//! return values. A returned error only means the request never reached the
//! device.

use crate::domain::types::SpeechId;
use crate::error::KioskResult;
use async_trait::async_trait;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking `text`. Completion is reported with the same `id`.
    async fn speak(&self, id: SpeechId, text: &str) -> KioskResult<()>;

    async fn cancel(&self, id: SpeechId) -> KioskResult<()>;
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(&self, locale: &str) -> KioskResult<()>;

    async fn stop(&self) -> KioskResult<()>;
}
