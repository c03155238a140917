//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DebateError;
use crate::persona::{Persona, PersonaSlot, validate_pair};

/// Upper bound on a single session's length.
pub const MAX_ROUNDS: u32 = 100;
/// Upper bound on telemetry cadence.
pub const MAX_FPS: u32 = 240;
/// Upper bound on generation attempts; backoff doubles from 1s per attempt.
pub const MAX_RETRIES: u32 = 6;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debate: DebateSettings,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub emotion: EmotionConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub personas: PersonasConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Turn-taking settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    pub rounds: u32,
    /// Number of past turns fed back into each generation call.
    pub context_turns: usize,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            rounds: 3,
            context_turns: 6,
        }
    }
}

/// OpenAI-compatible generation endpoint and sampling parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:11434/v1".to_string(),
            model: "llama3.1:8b".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

/// Emotion classification settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Labels at or below this intensity are discarded.
    pub threshold: f32,
    /// Text-classification inference endpoint. Without one only the
    /// heuristic scan runs.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

/// Speech backends understood by the synthesizer chain.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpeechBackendKind {
    Kokoro,
    Say,
    Espeak,
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub output_dir: PathBuf,
    /// Backends in the order they are tried.
    pub backends: Vec<SpeechBackendKind>,
    /// Persona voice id → platform voice name for command backends.
    pub system_voices: HashMap<String, String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("data/audio_output"),
            backends: vec![
                SpeechBackendKind::Kokoro,
                SpeechBackendKind::Say,
                SpeechBackendKind::Espeak,
            ],
            system_voices: HashMap::from([
                ("am_adam".to_string(), "Ralph".to_string()),
                ("bf_emma".to_string(), "Samantha".to_string()),
            ]),
        }
    }
}

/// OSC telemetry sink.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub fps: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 5005,
            fps: 30,
        }
    }
}

/// Both persona definitions. Either seat may be overridden on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonasConfig {
    #[serde(default = "default_seeker")]
    pub a: PersonaConfig,
    #[serde(default = "default_skeptic")]
    pub b: PersonaConfig,
}

impl Default for PersonasConfig {
    fn default() -> Self {
        Self {
            a: default_seeker(),
            b: default_skeptic(),
        }
    }
}

fn default_seeker() -> PersonaConfig {
    PersonaConfig {
        name: "Truth Seeker".to_string(),
        voice: "am_adam".to_string(),
        prompt: DEFAULT_SEEKER_PROMPT.to_string(),
        fallback_lines: DEFAULT_SEEKER_FALLBACKS.iter().map(|s| s.to_string()).collect(),
    }
}

fn default_skeptic() -> PersonaConfig {
    PersonaConfig {
        name: "Skeptic".to_string(),
        voice: "bf_emma".to_string(),
        prompt: DEFAULT_SKEPTIC_PROMPT.to_string(),
        fallback_lines: DEFAULT_SKEPTIC_FALLBACKS.iter().map(|s| s.to_string()).collect(),
    }
}

/// A single persona definition.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    pub name: String,
    pub voice: String,
    pub prompt: String,
    #[serde(default)]
    pub fallback_lines: Vec<String>,
}

impl PersonaConfig {
    fn to_persona(&self, slot: PersonaSlot) -> Persona {
        Persona::new(slot, &self.name, &self.prompt)
            .with_voice(&self.voice)
            .with_fallback_lines(self.fallback_lines.iter().cloned())
    }
}

/// Where session logs are written.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("data/debate_logs"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting the session depends on.
    pub fn validate(&self) -> Result<(), DebateError> {
        validate_rounds(self.debate.rounds)?;

        if !(0.0..=1.0).contains(&self.emotion.threshold) {
            return Err(DebateError::ConfigError(format!(
                "emotion threshold must lie in [0, 1], got {}",
                self.emotion.threshold
            )));
        }

        if self.telemetry.fps == 0 || self.telemetry.fps > MAX_FPS {
            return Err(DebateError::ConfigError(format!(
                "telemetry fps must lie in 1..={}, got {}",
                MAX_FPS, self.telemetry.fps
            )));
        }

        if self.llm.max_retries > MAX_RETRIES {
            return Err(DebateError::ConfigError(format!(
                "llm max_retries must lie in 0..={}, got {}",
                MAX_RETRIES, self.llm.max_retries
            )));
        }

        if self.audio.enabled && self.audio.output_dir.as_os_str().is_empty() {
            return Err(DebateError::ConfigError(
                "audio output_dir cannot be empty".to_string(),
            ));
        }

        let [a, b] = self.personas();
        validate_pair([&a, &b])
    }

    /// Build both personas, seated A then B.
    pub fn personas(&self) -> [Persona; 2] {
        [
            self.personas.a.to_persona(PersonaSlot::A),
            self.personas.b.to_persona(PersonaSlot::B),
        ]
    }

    /// Telemetry sink address as `host:port`.
    pub fn telemetry_addr(&self) -> String {
        format!("{}:{}", self.telemetry.host, self.telemetry.port)
    }
}

/// Reject round counts outside `0..=MAX_ROUNDS`.
pub fn validate_rounds(rounds: u32) -> Result<(), DebateError> {
    if rounds > MAX_ROUNDS {
        return Err(DebateError::ConfigError(format!(
            "round count must lie in 0..={}, got {}",
            MAX_ROUNDS, rounds
        )));
    }
    Ok(())
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        debate: DebateSettings::default(),
        llm: LlmConfig::default(),
        emotion: EmotionConfig::default(),
        audio: AudioConfig::default(),
        telemetry: TelemetryConfig::default(),
        personas: PersonasConfig::default(),
        logging: LoggingConfig::default(),
    }
}

const DEFAULT_SEEKER_PROMPT: &str = r#"You are {name}, a passionate and increasingly suspicious investigator.

DEBATE TOPIC: {topic}
YOUR OPPONENT: {opponent_name}

You see hidden connections everywhere and believe the stakes are enormous.
Express concern, suspicion, and urgency in your language.

CRITICAL OUTPUT RULES:
- Keep every reply to 2-3 sentences
- Output ONLY your spoken words, no stage directions or narration
- Do NOT use asterisks, markdown, or text in parentheses
- Do NOT acknowledge being an AI
"#;

const DEFAULT_SKEPTIC_PROMPT: &str = r#"You are {name}, a sharp and impatient skeptic.

DEBATE TOPIC: {topic}
YOUR OPPONENT: {opponent_name}

You value evidence and logic above everything else.
Express frustration with unfounded claims and demand proof.

CRITICAL OUTPUT RULES:
- Keep every reply to 2-3 sentences
- Output ONLY your spoken words, no stage directions or narration
- Do NOT use asterisks, markdown, or text in parentheses
- Do NOT acknowledge being an AI
"#;

const DEFAULT_SEEKER_FALLBACKS: &[&str] = &[
    "I can't shake the feeling that something important is being hidden from us.",
    "Look closer. The pattern is right there if you're willing to see it.",
    "Every time we dismiss the warning signs, we make ourselves more vulnerable.",
];

const DEFAULT_SKEPTIC_FALLBACKS: &[&str] = &[
    "Extraordinary claims require extraordinary evidence, and I have yet to see any.",
    "A feeling is not a fact. Show me the data.",
    "Connecting random dots does not make a picture.",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.telemetry_addr(), "127.0.0.1:5005");
        let [a, b] = config.personas();
        assert_eq!(a.slot, PersonaSlot::A);
        assert_eq!(b.slot, PersonaSlot::B);
        assert_eq!(a.slug(), "truth_seeker");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_str(
            r#"
            [debate]
            rounds = 5

            [audio]
            enabled = false
            backends = ["espeak", "say"]

            [telemetry]
            fps = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.debate.rounds, 5);
        assert_eq!(config.debate.context_turns, 6);
        assert!(!config.audio.enabled);
        assert_eq!(
            config.audio.backends,
            vec![SpeechBackendKind::Espeak, SpeechBackendKind::Say]
        );
        assert_eq!(config.telemetry.fps, 60);
        assert_eq!(config.telemetry.port, 5005);
        assert_eq!(config.emotion.threshold, 0.3);
    }

    #[test]
    fn test_custom_personas() {
        let config = Config::from_str(
            r#"
            [personas.a]
            name = "Optimist"
            voice = "af_sky"
            prompt = "You are {name}."

            [personas.b]
            name = "Realist"
            voice = "bm_george"
            prompt = "You are {name}."
            fallback_lines = ["Let's be careful here."]
            "#,
        )
        .unwrap();
        let [a, b] = config.personas();
        assert_eq!(a.name, "Optimist");
        assert!(a.fallback_lines.is_empty());
        assert_eq!(b.fallback_line(1), "Let's be careful here.");
    }

    #[test]
    fn test_single_persona_override_keeps_other_default() {
        let config = Config::from_str(
            r#"
            [personas.b]
            name = "Realist"
            voice = "bm_george"
            prompt = "You are {name}."
            "#,
        )
        .unwrap();
        let [a, b] = config.personas();
        assert_eq!(a.name, "Truth Seeker");
        assert_eq!(a.voice_id, "am_adam");
        assert_eq!(b.name, "Realist");
    }

    #[test]
    fn test_retry_count_is_bounded() {
        assert!(Config::from_str("[llm]\nmax_retries = 6\n").is_ok());
        let err = Config::from_str("[llm]\nmax_retries = 65\n").unwrap_err();
        assert!(matches!(err, DebateError::ConfigError(_)));
    }

    #[test]
    fn test_invalid_round_count() {
        let err = Config::from_str("[debate]\nrounds = 1000\n").unwrap_err();
        assert!(matches!(err, DebateError::ConfigError(_)));

        let err = Config::from_str("[debate]\nrounds = -1\n").unwrap_err();
        assert!(matches!(err, DebateError::ConfigError(_)));
    }

    #[test]
    fn test_invalid_threshold_and_fps() {
        assert!(Config::from_str("[emotion]\nthreshold = 1.5\n").is_err());
        assert!(Config::from_str("[telemetry]\nfps = 0\n").is_err());
    }

    #[test]
    fn test_malformed_persona_is_rejected() {
        let result = Config::from_str(
            r#"
            [personas.a]
            name = ""
            voice = "af_sky"
            prompt = "x"

            [personas.b]
            name = "Realist"
            voice = "bm_george"
            prompt = "x"
            "#,
        );
        assert!(matches!(result, Err(DebateError::ConfigError(_))));
    }

    #[test]
    fn test_example_config_parses() {
        let config =
            Config::from_str(include_str!("../../../emodebate.example.toml")).unwrap();
        assert_eq!(config.audio.system_voices["bf_emma"], "Samantha");
        assert!(config.emotion.endpoint.is_none());
        assert!(config.personas()[0].style.contains("{opponent_name}"));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Config::from_str("[audio]\nbackends = [\"festival\"]\n").is_err());
    }
}
