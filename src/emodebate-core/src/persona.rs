//! Persona definitions.
//!
//! Represents the two fixed debating characters with their prompt template
//! and voice assignment.

use serde::{Deserialize, Serialize};

use crate::error::DebateError;

/// Seat a persona occupies in the debate. A always speaks first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PersonaSlot {
    A,
    B,
}

impl PersonaSlot {
    /// Speaking order within a round.
    pub const ORDER: [PersonaSlot; 2] = [PersonaSlot::A, PersonaSlot::B];

    pub fn index(self) -> usize {
        match self {
            PersonaSlot::A => 0,
            PersonaSlot::B => 1,
        }
    }

    pub fn opponent(self) -> PersonaSlot {
        match self {
            PersonaSlot::A => PersonaSlot::B,
            PersonaSlot::B => PersonaSlot::A,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PersonaSlot::A => "A",
            PersonaSlot::B => "B",
        }
    }
}

/// A debating character. Immutable once the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub slot: PersonaSlot,
    /// Display name, also the source of the telemetry path segment.
    pub name: String,
    /// System prompt template with `{name}`, `{topic}` and `{opponent_name}` placeholders.
    pub style: String,
    /// Voice identifier handed to speech backends.
    pub voice_id: String,
    /// Lines spoken when the generation backend is unavailable.
    pub fallback_lines: Vec<String>,
}

impl Persona {
    /// Create a new persona with the given seat, name and prompt template.
    pub fn new(slot: PersonaSlot, name: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            slot,
            name: name.into(),
            style: style.into(),
            voice_id: String::new(),
            fallback_lines: Vec::new(),
        }
    }

    /// Set the voice ID for TTS.
    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_fallback_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Path segment used in telemetry addresses, e.g. `truth_seeker`.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Render the system prompt for this persona.
    pub fn system_prompt(&self, topic: &str, opponent_name: &str) -> String {
        self.style
            .replace("{name}", &self.name)
            .replace("{topic}", topic)
            .replace("{opponent_name}", opponent_name)
    }

    /// Canned line for `round` (1-based), rotating through the configured lines.
    pub fn fallback_line(&self, round: u32) -> String {
        if self.fallback_lines.is_empty() {
            return format!("{} pauses to gather their thoughts.", self.name);
        }
        let idx = (round.saturating_sub(1) as usize) % self.fallback_lines.len();
        self.fallback_lines[idx].clone()
    }

    /// Reject malformed persona definitions.
    pub fn validate(&self) -> Result<(), DebateError> {
        if self.name.trim().is_empty() {
            return Err(DebateError::ConfigError(format!(
                "persona {} has an empty name",
                self.slot.display_name()
            )));
        }
        if self.style.trim().is_empty() {
            return Err(DebateError::ConfigError(format!(
                "persona '{}' has an empty prompt template",
                self.name
            )));
        }
        if self.voice_id.trim().is_empty() {
            return Err(DebateError::ConfigError(format!(
                "persona '{}' has no voice assigned",
                self.name
            )));
        }
        Ok(())
    }
}

/// Lower-case `name` with every non-alphanumeric character replaced by `_`.
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Validate the persona pair as a whole: both valid, seated A then B, distinct names.
pub fn validate_pair(personas: [&Persona; 2]) -> Result<(), DebateError> {
    for (persona, slot) in personas.iter().zip(PersonaSlot::ORDER) {
        persona.validate()?;
        if persona.slot != slot {
            return Err(DebateError::ConfigError(format!(
                "persona '{}' is seated as {} but configured for {}",
                persona.name,
                slot.display_name(),
                persona.slot.display_name()
            )));
        }
    }

    let [a, b] = personas;
    if a.name.trim().eq_ignore_ascii_case(b.name.trim()) || a.slug() == b.slug() {
        return Err(DebateError::ConfigError(format!(
            "personas must have distinct names (both are '{}')",
            a.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeker() -> Persona {
        Persona::new(
            PersonaSlot::A,
            "Truth Seeker",
            "You are {name}, debating {topic} against {opponent_name}.",
        )
        .with_voice("am_adam")
    }

    #[test]
    fn test_slug() {
        assert_eq!(seeker().slug(), "truth_seeker");
        let odd = Persona::new(PersonaSlot::B, "  Dr. Skeptic ", "x");
        assert_eq!(odd.slug(), "dr__skeptic");
    }

    #[test]
    fn test_system_prompt_placeholders() {
        let prompt = seeker().system_prompt("AI ethics", "Skeptic");
        assert_eq!(
            prompt,
            "You are Truth Seeker, debating AI ethics against Skeptic."
        );
    }

    #[test]
    fn test_fallback_line_rotates() {
        let p = seeker().with_fallback_lines(["first", "second"]);
        assert_eq!(p.fallback_line(1), "first");
        assert_eq!(p.fallback_line(2), "second");
        assert_eq!(p.fallback_line(3), "first");
        assert!(seeker().fallback_line(1).contains("Truth Seeker"));
    }

    #[test]
    fn test_validate_rejects_missing_voice() {
        let p = Persona::new(PersonaSlot::A, "Truth Seeker", "prompt");
        assert!(matches!(p.validate(), Err(DebateError::ConfigError(_))));
    }

    #[test]
    fn test_validate_pair_rejects_duplicate_names() {
        let a = seeker();
        let mut b = seeker();
        b.slot = PersonaSlot::B;
        assert!(validate_pair([&a, &b]).is_err());

        b.name = "Skeptic".to_string();
        assert!(validate_pair([&a, &b]).is_ok());
    }

    #[test]
    fn test_validate_pair_rejects_wrong_seats() {
        let a = seeker();
        let b = Persona::new(PersonaSlot::A, "Skeptic", "prompt").with_voice("af_sky");
        assert!(validate_pair([&a, &b]).is_err());
    }
}
