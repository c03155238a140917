//! Emotional Debate Core Library
//!
//! Provides the debate orchestration loop, persona agents, emotion
//! enrichment, speech synthesis and OSC telemetry.

pub mod agent;
pub mod config;
pub mod emotion;
pub mod enricher;
pub mod error;
pub mod orchestrator;
pub mod persona;
pub mod response;
pub mod session;
pub mod telemetry;
pub mod tts;

pub use agent::{OpenAiCompatibleGenerator, PersonaAgent, SamplingParams, TextGenerator};
pub use config::{Config, default_config};
pub use emotion::{EmotionSource, EmotionVector, heuristic_emotions};
pub use enricher::{EmotionClassifier, EmotionEnricher, HttpEmotionClassifier};
pub use error::DebateError;
pub use orchestrator::{DebateCallback, DebateConfig, DebateEvent, DebateOrchestrator};
pub use persona::{Persona, PersonaSlot};
pub use response::{Artifact, DebateResponse, PipelineStage, TranscriptReason};
pub use session::{DebateSession, SessionStatus, TerminationReason};
pub use telemetry::{TelemetrySink, TelemetryStreamer};
pub use tts::{SpeechBackend, SpeechSynthesizer};
