//! Error taxonomy for the visitor kiosk
//!
//! Every variant is recoverable: the orchestrator answers each of them with a
//! re-prompt or by falling back to an idle/inactive state.

use thiserror::Error;

/// Hardware the kiosk depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Camera,
    Microphone,
    Speaker,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Camera => "camera",
            Device::Microphone => "microphone",
            Device::Speaker => "speaker",
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camera" => Ok(Device::Camera),
            "microphone" | "audio" => Ok(Device::Microphone),
            "speaker" => Ok(Device::Speaker),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KioskError {
    #[error("permission denied for {0}")]
    PermissionDenied(Device),

    #[error("intent classifier unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("speech recognition failed to start: {0}")]
    RecognitionStartFailure(String),

    #[error("speech recognition failed to stop: {0}")]
    RecognitionStopFailure(String),

    #[error("speech synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("visitor submission failed: {0}")]
    SubmissionFailure(String),

    #[error("cannot {action} while {mode}")]
    InvalidTurn { action: &'static str, mode: &'static str },
}

pub type KioskResult<T> = Result<T, KioskError>;
