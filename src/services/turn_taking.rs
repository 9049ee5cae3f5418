//! Speak/listen turn-taking
//!
//! The kiosk never talks over the visitor: the recogniser only runs once the
//! synthesiser reports it finished, and an utterance is only handed on after
//! the visitor has been silent for a full timeout. All transitions return the
//! device commands to issue; the coordinator itself performs no IO.

use crate::domain::types::{SpeechId, Utterance, UtteranceId};
use crate::error::{KioskError, KioskResult};
use smallvec::SmallVec;
use tokio::time::{Duration, Instant};
use tracing::debug;

pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Longest a prompt may play before its finish notification is presumed lost
pub const SPEAKING_TIMEOUT: Duration = Duration::from_millis(15_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Idle,
    Speaking,
    Listening,
}

impl TurnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnMode::Idle => "idle",
            TurnMode::Speaking => "speaking",
            TurnMode::Listening => "listening",
        }
    }
}

/// Command for the speech devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechCommand {
    Synthesize { id: SpeechId, text: String },
    CancelSynthesis { id: SpeechId },
    StartRecognition,
    StopRecognition,
}

pub type SpeechCommands = SmallVec<[SpeechCommand; 2]>;

#[derive(Debug)]
struct PendingUtterance {
    text: String,
    last_spoke: Instant,
}

pub struct TurnTaking {
    mode: TurnMode,
    /// Synthesis request we are waiting on
    current_speech: Option<SpeechId>,
    speaking_since: Option<Instant>,
    next_speech_id: u64,
    next_utterance_id: u64,
    pending: Option<PendingUtterance>,
    silence_timeout: Duration,
    speaking_timeout: Duration,
}

impl Default for TurnTaking {
    fn default() -> Self {
        Self::new(SILENCE_TIMEOUT, SPEAKING_TIMEOUT)
    }
}

impl TurnTaking {
    pub fn new(silence_timeout: Duration, speaking_timeout: Duration) -> Self {
        Self {
            mode: TurnMode::Idle,
            current_speech: None,
            speaking_since: None,
            next_speech_id: 1,
            next_utterance_id: 1,
            pending: None,
            silence_timeout,
            speaking_timeout,
        }
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    pub fn current_speech(&self) -> Option<SpeechId> {
        self.current_speech
    }

    pub fn has_pending_utterance(&self) -> bool {
        self.pending.is_some()
    }

    /// Start speaking. Interrupts listening, refuses to talk over ourselves.
    pub fn speak(&mut self, text: &str, now: Instant) -> KioskResult<SpeechCommands> {
        let mut commands = SpeechCommands::new();
        match self.mode {
            TurnMode::Speaking => {
                return Err(KioskError::InvalidTurn { action: "speak", mode: self.mode.as_str() });
            }
            TurnMode::Listening => {
                self.pending = None;
                commands.push(SpeechCommand::StopRecognition);
            }
            TurnMode::Idle => {}
        }

        let id = SpeechId(self.next_speech_id);
        self.next_speech_id += 1;
        self.current_speech = Some(id);
        self.speaking_since = Some(now);
        self.mode = TurnMode::Speaking;
        commands.push(SpeechCommand::Synthesize { id, text: text.to_string() });
        Ok(commands)
    }

    fn is_current(&self, id: SpeechId) -> bool {
        self.mode == TurnMode::Speaking && self.current_speech == Some(id)
    }

    /// Synthesis completed. Starts listening only when `listen` is set
    /// (a session is running and the kiosk is not paused).
    pub fn on_synthesis_finished(&mut self, id: SpeechId, listen: bool) -> Option<SpeechCommand> {
        if !self.is_current(id) {
            debug!(speech_id = %id, "stale_synthesis_ignored");
            return None;
        }
        self.current_speech = None;
        self.speaking_since = None;
        if listen {
            self.mode = TurnMode::Listening;
            Some(SpeechCommand::StartRecognition)
        } else {
            self.mode = TurnMode::Idle;
            None
        }
    }

    /// Synthesis cancelled or failed. Returns true when it was the live request.
    pub fn on_synthesis_interrupted(&mut self, id: SpeechId) -> bool {
        if !self.is_current(id) {
            return false;
        }
        self.current_speech = None;
        self.speaking_since = None;
        self.mode = TurnMode::Idle;
        true
    }

    /// Give up on a prompt whose finish never arrived. Cancels it and goes
    /// idle so the caller can ask the question again.
    pub fn expire_speech(&mut self, now: Instant) -> Option<SpeechCommand> {
        if self.mode != TurnMode::Speaking {
            return None;
        }
        let since = self.speaking_since?;
        if now.saturating_duration_since(since) < self.speaking_timeout {
            return None;
        }
        let id = self.current_speech.take()?;
        self.speaking_since = None;
        self.mode = TurnMode::Idle;
        Some(SpeechCommand::CancelSynthesis { id })
    }

    /// Recogniser error. Returns true when we were listening.
    pub fn on_recognition_failed(&mut self) -> bool {
        if self.mode != TurnMode::Listening {
            return false;
        }
        self.pending = None;
        self.mode = TurnMode::Idle;
        true
    }

    /// Partial transcript. The recogniser resends the whole phrase each time,
    /// so the latest chunk replaces the pending text.
    pub fn on_utterance_chunk(&mut self, text: &str, now: Instant) -> bool {
        if self.mode != TurnMode::Listening {
            return false;
        }
        self.pending = Some(PendingUtterance { text: text.to_string(), last_spoke: now });
        true
    }

    /// Finalize the pending utterance once the visitor has been silent long enough
    pub fn tick(&mut self, now: Instant) -> Option<(Utterance, SpeechCommand)> {
        if self.mode != TurnMode::Listening {
            return None;
        }
        let silent_for = now.saturating_duration_since(self.pending.as_ref()?.last_spoke);
        if silent_for < self.silence_timeout {
            return None;
        }

        let pending = self.pending.take()?;
        let id = UtteranceId(self.next_utterance_id);
        self.next_utterance_id += 1;
        self.mode = TurnMode::Idle;
        let utterance = Utterance { id, text: pending.text, captured_at: pending.last_spoke };
        Some((utterance, SpeechCommand::StopRecognition))
    }

    /// Abort whatever is in progress
    pub fn stop(&mut self) -> SpeechCommands {
        let mut commands = SpeechCommands::new();
        match self.mode {
            TurnMode::Speaking => {
                if let Some(id) = self.current_speech.take() {
                    commands.push(SpeechCommand::CancelSynthesis { id });
                }
            }
            TurnMode::Listening => commands.push(SpeechCommand::StopRecognition),
            TurnMode::Idle => {}
        }
        self.pending = None;
        self.current_speech = None;
        self.speaking_since = None;
        self.mode = TurnMode::Idle;
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn speech_id(commands: &SpeechCommands) -> SpeechId {
        match commands.last() {
            Some(SpeechCommand::Synthesize { id, .. }) => *id,
            other => panic!("expected synthesize, got {:?}", other),
        }
    }

    #[test]
    fn test_speak_then_listen() {
        let mut turns = TurnTaking::default();
        let commands = turns.speak("Bonjour", Instant::now()).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(turns.mode(), TurnMode::Speaking);

        let id = speech_id(&commands);
        assert_eq!(turns.on_synthesis_finished(id, true), Some(SpeechCommand::StartRecognition));
        assert_eq!(turns.mode(), TurnMode::Listening);
    }

    #[test]
    fn test_speak_rejected_while_speaking() {
        let mut turns = TurnTaking::default();
        turns.speak("Bonjour", Instant::now()).unwrap();
        let err = turns.speak("Encore", Instant::now()).unwrap_err();
        assert_eq!(err, KioskError::InvalidTurn { action: "speak", mode: "speaking" });
    }

    #[test]
    fn test_speak_while_listening_stops_recognition_first() {
        let mut turns = TurnTaking::default();
        let id = speech_id(&turns.speak("Bonjour", Instant::now()).unwrap());
        turns.on_synthesis_finished(id, true);

        let commands = turns.speak("Pouvez-vous répéter?", Instant::now()).unwrap();
        assert_eq!(commands[0], SpeechCommand::StopRecognition);
        assert!(matches!(commands[1], SpeechCommand::Synthesize { .. }));
    }

    #[test]
    fn test_finish_without_session_goes_idle() {
        let mut turns = TurnTaking::default();
        let id = speech_id(&turns.speak("Merci", Instant::now()).unwrap());
        assert_eq!(turns.on_synthesis_finished(id, false), None);
        assert_eq!(turns.mode(), TurnMode::Idle);
    }

    #[test]
    fn test_stale_finish_ignored() {
        let mut turns = TurnTaking::default();
        let first = speech_id(&turns.speak("Un", Instant::now()).unwrap());
        turns.stop();
        let second = speech_id(&turns.speak("Deux", Instant::now()).unwrap());
        assert_ne!(first, second);

        assert_eq!(turns.on_synthesis_finished(first, true), None);
        assert_eq!(turns.mode(), TurnMode::Speaking);
        assert!(!turns.on_synthesis_interrupted(first));
    }

    #[test]
    fn test_chunks_ignored_unless_listening() {
        let mut turns = TurnTaking::default();
        let now = Instant::now();
        assert!(!turns.on_utterance_chunk("oui", now));
        turns.speak("Bonjour", Instant::now()).unwrap();
        assert!(!turns.on_utterance_chunk("oui", now));
        assert!(!turns.has_pending_utterance());
    }

    #[test]
    fn test_silence_finalizes_once() {
        let mut turns = TurnTaking::default();
        let t0 = Instant::now();
        let id = speech_id(&turns.speak("Bonjour", Instant::now()).unwrap());
        turns.on_synthesis_finished(id, true);

        turns.on_utterance_chunk("ou", t0);
        turns.on_utterance_chunk("oui", t0 + ms(300));
        assert!(turns.tick(t0 + ms(1200)).is_none());

        let (utterance, command) = turns.tick(t0 + ms(1300)).unwrap();
        assert_eq!(utterance.text, "oui");
        assert_eq!(command, SpeechCommand::StopRecognition);
        assert_eq!(turns.mode(), TurnMode::Idle);
        assert!(turns.tick(t0 + ms(5000)).is_none());
    }

    #[test]
    fn test_no_finalize_without_chunk() {
        let mut turns = TurnTaking::default();
        let id = speech_id(&turns.speak("Bonjour", Instant::now()).unwrap());
        turns.on_synthesis_finished(id, true);
        assert!(turns.tick(Instant::now() + ms(10_000)).is_none());
        assert_eq!(turns.mode(), TurnMode::Listening);
    }

    #[test]
    fn test_utterance_ids_increase() {
        let mut turns = TurnTaking::default();
        let t0 = Instant::now();
        let mut ids = Vec::new();
        for round in 0..2u64 {
            let id = speech_id(&turns.speak("Question", Instant::now()).unwrap());
            turns.on_synthesis_finished(id, true);
            turns.on_utterance_chunk("réponse", t0 + ms(round * 5000));
            let (utterance, _) = turns.tick(t0 + ms(round * 5000 + 1000)).unwrap();
            ids.push(utterance.id);
        }
        assert!(ids[0].0 < ids[1].0);
    }

    #[test]
    fn test_stop_from_each_mode() {
        let mut turns = TurnTaking::default();
        assert!(turns.stop().is_empty());

        let id = speech_id(&turns.speak("Bonjour", Instant::now()).unwrap());
        assert_eq!(turns.stop().as_slice(), &[SpeechCommand::CancelSynthesis { id }]);
        assert_eq!(turns.current_speech(), None);

        let id = speech_id(&turns.speak("Bonjour", Instant::now()).unwrap());
        turns.on_synthesis_finished(id, true);
        turns.on_utterance_chunk("oui", Instant::now());
        assert_eq!(turns.stop().as_slice(), &[SpeechCommand::StopRecognition]);
        assert!(!turns.has_pending_utterance());
        assert_eq!(turns.mode(), TurnMode::Idle);
    }

    #[test]
    fn test_recognition_failure_resets() {
        let mut turns = TurnTaking::default();
        assert!(!turns.on_recognition_failed());
        let id = speech_id(&turns.speak("Bonjour", Instant::now()).unwrap());
        turns.on_synthesis_finished(id, true);
        assert!(turns.on_recognition_failed());
        assert_eq!(turns.mode(), TurnMode::Idle);
    }

    #[test]
    fn test_lost_finish_expires_speech() {
        let mut turns = TurnTaking::default();
        let t0 = Instant::now();
        let id = speech_id(&turns.speak("Bonjour", t0).unwrap());

        assert_eq!(turns.expire_speech(t0 + ms(14_999)), None);
        assert_eq!(turns.mode(), TurnMode::Speaking);

        assert_eq!(turns.expire_speech(t0 + ms(15_000)), Some(SpeechCommand::CancelSynthesis { id }));
        assert_eq!(turns.mode(), TurnMode::Idle);
        assert_eq!(turns.current_speech(), None);
        // Late finish for the expired prompt is stale
        assert_eq!(turns.on_synthesis_finished(id, true), None);
        assert_eq!(turns.expire_speech(t0 + ms(30_000)), None);
    }

    #[test]
    fn test_finished_speech_never_expires() {
        let mut turns = TurnTaking::new(SILENCE_TIMEOUT, ms(2000));
        let t0 = Instant::now();
        let id = speech_id(&turns.speak("Bonjour", t0).unwrap());
        turns.on_synthesis_finished(id, true);
        assert_eq!(turns.expire_speech(t0 + ms(10_000)), None);
        assert_eq!(turns.mode(), TurnMode::Listening);
    }
}
