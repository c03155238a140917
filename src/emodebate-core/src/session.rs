//! Session record and its JSON log.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DebateError;
use crate::response::DebateResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    RoundsComplete,
    AllPersonasUnavailable,
    Interrupted,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminationReason::RoundsComplete => "rounds_complete",
            TerminationReason::AllPersonasUnavailable => "all_personas_unavailable",
            TerminationReason::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// One debate run. Responses are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: Uuid,
    pub topic: String,
    pub rounds: u32,
    completed_rounds: u32,
    responses: Vec<DebateResponse>,
    status: SessionStatus,
    termination_reason: Option<TerminationReason>,
    pub started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl DebateSession {
    pub fn new(topic: impl Into<String>, rounds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            rounds,
            completed_rounds: 0,
            responses: Vec::new(),
            status: SessionStatus::Pending,
            termination_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == SessionStatus::Pending {
            self.status = SessionStatus::Running;
        }
    }

    pub fn record(&mut self, response: DebateResponse) {
        self.responses.push(response);
    }

    /// Mark `round` (1-based) complete. Never moves backwards.
    pub fn complete_round(&mut self, round: u32) {
        self.completed_rounds = self.completed_rounds.max(round);
    }

    /// Set the terminal status. Only the first call takes effect.
    pub fn finalize(&mut self, status: SessionStatus, reason: TerminationReason) {
        if self.is_finished() {
            return;
        }
        self.status = status;
        self.termination_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn responses(&self) -> &[DebateResponse] {
        &self.responses
    }

    pub fn completed_rounds(&self) -> u32 {
        self.completed_rounds
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn degraded_turns(&self) -> usize {
        self.responses.iter().filter(|r| r.is_degraded()).count()
    }

    pub fn to_json(&self) -> Result<String, DebateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DebateError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the log as `debate_<timestamp>_<id>.json` under `dir`.
    pub fn save_to_dir(&self, dir: &Path) -> Result<PathBuf, DebateError> {
        fs::create_dir_all(dir)?;
        let id = self.id.simple().to_string();
        let path = dir.join(format!(
            "debate_{}_{}.json",
            self.started_at.format("%Y%m%d_%H%M%S"),
            &id[..8]
        ));
        fs::write(&path, self.to_json()?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::heuristic_emotions;
    use crate::persona::PersonaSlot;
    use crate::response::{Artifact, ResponseComposer, Speaker, TranscriptReason, Turn};
    use std::time::Duration;

    fn response(round: u32) -> DebateResponse {
        let text = "I worry we are moving too fast.";
        let speaker = Speaker {
            slot: PersonaSlot::A,
            name: "Truth Seeker".into(),
            voice_id: "am_adam".into(),
        };
        ResponseComposer::new()
            .compose(
                Turn::generated(speaker, round, text.into(), Duration::from_millis(840)),
                heuristic_emotions(text),
                Vec::new(),
            )
            .with_artifact(Artifact::Transcript {
                path: format!("round{:02}_truth_seeker.txt", round).into(),
                reason: TranscriptReason::Disabled,
            })
    }

    #[test]
    fn test_finalize_only_once() {
        let mut session = DebateSession::new("AI ethics", 2);
        session.start();
        assert_eq!(session.status(), SessionStatus::Running);

        session.finalize(SessionStatus::Done, TerminationReason::Interrupted);
        session.finalize(SessionStatus::Failed, TerminationReason::AllPersonasUnavailable);
        assert_eq!(session.status(), SessionStatus::Done);
        assert_eq!(session.termination_reason(), Some(TerminationReason::Interrupted));
    }

    #[test]
    fn test_completed_rounds_monotonic() {
        let mut session = DebateSession::new("AI ethics", 3);
        session.complete_round(2);
        session.complete_round(1);
        assert_eq!(session.completed_rounds(), 2);
    }

    #[test]
    fn test_json_round_trip() {
        let mut session = DebateSession::new("AI ethics", 1);
        session.start();
        session.record(response(1));
        session.complete_round(1);
        session.finalize(SessionStatus::Done, TerminationReason::RoundsComplete);

        let json = session.to_json().unwrap();
        assert!(json.contains("\"termination_reason\": \"rounds_complete\""));
        let restored = DebateSession::from_json(&json).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_save_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let session = DebateSession::new("AI ethics", 0);
        let path = session.save_to_dir(dir.path()).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("debate_"));
        assert!(name.ends_with(".json"));
        let restored = DebateSession::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(restored.id, session.id);
    }
}
