//! Per-turn records.
//!
//! A `DebateResponse` is composed once per turn from the generated turn and
//! its emotion vector. The synthesis artifact is attached by value before the
//! response is recorded; recorded responses are only handed out by reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::emotion::EmotionVector;
use crate::persona::{Persona, PersonaSlot, slugify};

/// Who spoke a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub slot: PersonaSlot,
    pub name: String,
    pub voice_id: String,
}

impl Speaker {
    pub fn of(persona: &Persona) -> Self {
        Self {
            slot: persona.slot,
            name: persona.name.clone(),
            voice_id: persona.voice_id.clone(),
        }
    }

    /// Path segment used for artifacts and telemetry.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// One persona's single reply within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    /// 1-based round index.
    pub round: u32,
    pub text: String,
    pub latency_ms: u64,
    /// Set when the text is a canned fallback line.
    pub degraded: bool,
}

impl Turn {
    pub fn generated(speaker: Speaker, round: u32, text: String, latency: Duration) -> Self {
        Self {
            speaker,
            round,
            text,
            latency_ms: latency.as_millis() as u64,
            degraded: false,
        }
    }

    pub fn fallback(speaker: Speaker, round: u32, text: String, latency: Duration) -> Self {
        Self {
            degraded: true,
            ..Self::generated(speaker, round, text, latency)
        }
    }
}

/// Pipeline stage a degradation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Generation,
    Enrichment,
    Synthesis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub stage: PipelineStage,
    pub detail: String,
}

/// Why a transcript was written instead of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptReason {
    /// Synthesis switched off by configuration.
    Disabled,
    /// Every backend in the chain was unavailable or failed.
    BackendsExhausted,
}

/// Per-turn output of the speech synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Audio { path: PathBuf, backend: String },
    Transcript { path: PathBuf, reason: TranscriptReason },
}

impl Artifact {
    pub fn path(&self) -> &PathBuf {
        match self {
            Artifact::Audio { path, .. } | Artifact::Transcript { path, .. } => path,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Artifact::Audio { .. })
    }
}

/// One turn with its emotion vector, artifact and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateResponse {
    pub turn: Turn,
    pub emotions: EmotionVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}

impl DebateResponse {
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        if let Artifact::Transcript {
            reason: TranscriptReason::BackendsExhausted,
            ..
        } = &artifact
        {
            self.degradations.push(Degradation {
                stage: PipelineStage::Synthesis,
                detail: "all speech backends failed".to_string(),
            });
        }
        self.artifact = Some(artifact);
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.turn.degraded || !self.degradations.is_empty()
    }

    pub fn degraded_at(&self, stage: PipelineStage) -> bool {
        self.degradations.iter().any(|d| d.stage == stage)
    }
}

/// Merges a turn, its emotion vector and metadata into a `DebateResponse`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseComposer;

impl ResponseComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        turn: Turn,
        emotions: EmotionVector,
        degradations: Vec<Degradation>,
    ) -> DebateResponse {
        self.compose_at(turn, emotions, degradations, Utc::now())
    }

    pub fn compose_at(
        &self,
        turn: Turn,
        emotions: EmotionVector,
        mut degradations: Vec<Degradation>,
        timestamp: DateTime<Utc>,
    ) -> DebateResponse {
        degradations.sort_by_key(|d| d.stage as u8);
        DebateResponse {
            turn,
            emotions,
            artifact: None,
            timestamp,
            degradations,
        }
    }
}
