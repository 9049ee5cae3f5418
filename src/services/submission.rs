//! Hand-off of confirmed visitor requests

use crate::domain::visitor::VisitorRequest;
use crate::error::{KioskError, KioskResult};
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, request: &VisitorRequest) -> KioskResult<()>;

    fn name(&self) -> &str;
}

/// Sink used when no registry is configured: the request only goes to the log
pub struct LoggingSink;

#[async_trait]
impl SubmissionSink for LoggingSink {
    async fn submit(&self, request: &VisitorRequest) -> KioskResult<()> {
        let body = request.to_json().map_err(|e| KioskError::SubmissionFailure(e.to_string()))?;
        info!(session = %request.session_id, body = %body, "visitor_request_logged");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
