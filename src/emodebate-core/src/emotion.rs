//! Emotion vectors and the fixed label lexicon.
//!
//! Every vector carries its scored labels plus three derived values:
//! the primary (arg-max) label, valence and arousal. The derived values are
//! recomputed whenever the label set changes, so they can never drift from
//! the scores they summarize.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;

/// Label used when a vector has no scores.
pub const NEUTRAL: &str = "neutral";

/// The fixed label set (GoEmotions) with its (valence, arousal) coordinates.
///
/// Valence lies in [-1, 1], arousal in [0, 1].
pub const EMOTION_LEXICON: [(&str, f32, f32); 28] = [
    ("admiration", 0.60, 0.40),
    ("amusement", 0.70, 0.60),
    ("anger", -0.70, 0.85),
    ("annoyance", -0.50, 0.60),
    ("approval", 0.50, 0.30),
    ("caring", 0.60, 0.35),
    ("confusion", -0.20, 0.50),
    ("curiosity", 0.30, 0.55),
    ("desire", 0.40, 0.65),
    ("disappointment", -0.60, 0.30),
    ("disapproval", -0.50, 0.45),
    ("disgust", -0.75, 0.60),
    ("embarrassment", -0.45, 0.55),
    ("excitement", 0.70, 0.90),
    ("fear", -0.70, 0.85),
    ("gratitude", 0.75, 0.35),
    ("grief", -0.85, 0.40),
    ("joy", 0.85, 0.70),
    ("love", 0.85, 0.55),
    ("nervousness", -0.45, 0.75),
    ("optimism", 0.60, 0.50),
    ("pride", 0.65, 0.55),
    ("realization", 0.15, 0.45),
    ("relief", 0.50, 0.20),
    ("remorse", -0.60, 0.35),
    ("sadness", -0.75, 0.20),
    ("surprise", 0.10, 0.85),
    (NEUTRAL, 0.00, 0.10),
];

/// Position of `label` in the fixed label set.
pub fn label_index(label: &str) -> Option<usize> {
    EMOTION_LEXICON.iter().position(|(name, _, _)| *name == label)
}

/// Whether `label` belongs to the fixed label set.
pub fn is_known_label(label: &str) -> bool {
    label_index(label).is_some()
}

fn coordinates(label: &str) -> Option<(f32, f32)> {
    label_index(label).map(|i| (EMOTION_LEXICON[i].1, EMOTION_LEXICON[i].2))
}

/// Which path produced a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionSource {
    /// Keyword scan run at generation time.
    Heuristic,
    /// Scores from a classification backend.
    Classified,
}

/// One scored label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub label: String,
    pub intensity: f32,
}

/// Scored emotion labels plus derived primary label, valence and arousal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredVector", into = "StoredVector")]
pub struct EmotionVector {
    scores: Vec<EmotionScore>,
    primary_label: String,
    valence: f32,
    arousal: f32,
    source: EmotionSource,
}

impl EmotionVector {
    /// Build a vector from raw (label, score) pairs.
    ///
    /// Scores are clamped into [0, 1] (NaN becomes 0), duplicate labels keep
    /// their highest score, and the result is ordered by descending intensity.
    pub fn new<I, S>(scores: I, source: EmotionSource) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        let mut merged: Vec<EmotionScore> = Vec::new();
        for (label, score) in scores {
            let label = label.into();
            let intensity = clamp_unit(score);
            match merged.iter_mut().find(|s| s.label == label) {
                Some(existing) => existing.intensity = existing.intensity.max(intensity),
                None => merged.push(EmotionScore { label, intensity }),
            }
        }

        let mut vector = Self {
            scores: merged,
            primary_label: NEUTRAL.to_string(),
            valence: 0.0,
            arousal: 0.0,
            source,
        };
        vector.recompute();
        vector
    }

    /// A vector with no scored labels.
    pub fn neutral(source: EmotionSource) -> Self {
        Self::new(Vec::<(String, f32)>::new(), source)
    }

    pub fn scores(&self) -> &[EmotionScore] {
        &self.scores
    }

    pub fn primary_label(&self) -> &str {
        &self.primary_label
    }

    pub fn valence(&self) -> f32 {
        self.valence
    }

    pub fn arousal(&self) -> f32 {
        self.arousal
    }

    pub fn source(&self) -> EmotionSource {
        self.source
    }

    pub fn intensity(&self, label: &str) -> Option<f32> {
        self.scores
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.intensity)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Drop labels at or below `threshold` and keep at most `top_k`.
    pub fn prune(&mut self, threshold: f32, top_k: usize) {
        self.scores.retain(|s| s.intensity > threshold);
        self.scores.truncate(top_k);
        self.recompute();
    }

    /// The `n` strongest labels, strongest first.
    pub fn top(&self, n: usize) -> &[EmotionScore] {
        &self.scores[..n.min(self.scores.len())]
    }

    fn recompute(&mut self) {
        self.scores.sort_by(by_intensity_then_label);

        self.primary_label = self
            .scores
            .first()
            .map(|s| s.label.clone())
            .unwrap_or_else(|| NEUTRAL.to_string());

        let mut weight = 0.0f32;
        let mut valence = 0.0f32;
        let mut arousal = 0.0f32;
        for score in &self.scores {
            if let Some((v, a)) = coordinates(&score.label) {
                weight += score.intensity;
                valence += v * score.intensity;
                arousal += a * score.intensity;
            }
        }

        if weight > 0.0 {
            self.valence = (valence / weight).clamp(-1.0, 1.0);
            self.arousal = (arousal / weight).clamp(0.0, 1.0);
        } else {
            self.valence = 0.0;
            self.arousal = 0.0;
        }
    }
}

fn by_intensity_then_label(a: &EmotionScore, b: &EmotionScore) -> Ordering {
    b.intensity
        .partial_cmp(&a.intensity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.label.cmp(&b.label))
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Serialized form. Derived fields are written for readers of the session
/// log but recomputed on load.
#[derive(Serialize, Deserialize)]
struct StoredVector {
    scores: Vec<EmotionScore>,
    primary_label: String,
    valence: f32,
    arousal: f32,
    source: EmotionSource,
}

impl From<StoredVector> for EmotionVector {
    fn from(stored: StoredVector) -> Self {
        EmotionVector::new(
            stored.scores.into_iter().map(|s| (s.label, s.intensity)),
            stored.source,
        )
    }
}

impl From<EmotionVector> for StoredVector {
    fn from(vector: EmotionVector) -> Self {
        StoredVector {
            scores: vector.scores,
            primary_label: vector.primary_label,
            valence: vector.valence,
            arousal: vector.arousal,
            source: vector.source,
        }
    }
}

/// Keyword cues for the heuristic scan.
///
/// Cues match whole words. A trailing `*` makes a cue a word prefix, so
/// `terrif*` covers "terrifying" and "terrified".
const KEYWORD_CUES: &[(&str, &[&str])] = &[
    ("anger", &["outrage*", "furious", "angry", "unacceptable", "infuriating"]),
    ("annoyance", &["ridiculous", "nonsense", "absurd", "tired of", "enough"]),
    ("fear", &["afraid", "danger*", "threat*", "terrif*", "scared", "frighten*", "catastroph*"]),
    ("nervousness", &["worried", "worry", "uneasy", "risk*", "anxious"]),
    ("curiosity", &["why", "how", "wonder", "wondering", "what if", "question*"]),
    ("confusion", &["confus*", "unclear", "doesn't make sense", "puzzl*"]),
    ("disapproval", &["wrong", "disagree", "flawed", "no evidence", "unfounded"]),
    ("approval", &["agree", "exactly", "right", "fair point", "valid"]),
    ("optimism", &["hope*", "future", "opportunit*", "better", "progress"]),
    ("joy", &["happy", "delight*", "wonderful", "glad", "great"]),
    ("excitement", &["exciting", "amazing", "incredible", "thrill*"]),
    ("sadness", &["sad", "tragic", "loss", "unfortunately", "grim"]),
    ("surprise", &["surpris*", "unexpected", "astonish*", "shocking"]),
    ("caring", &["care", "protect*", "safety", "wellbeing", "responsib*"]),
    ("realization", &["realiz*", "turns out", "in fact", "now i see"]),
];

/// One word-boundary regex per label, built from `KEYWORD_CUES`.
static CUE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    KEYWORD_CUES
        .iter()
        .filter_map(|(label, cues)| {
            let alternatives: Vec<String> = cues
                .iter()
                .map(|cue| match cue.strip_suffix('*') {
                    Some(stem) => format!(r"{}\w*", regex::escape(stem)),
                    None => regex::escape(cue),
                })
                .collect();
            let pattern = format!(r"\b(?:{})\b", alternatives.join("|"));
            Regex::new(&pattern).ok().map(|re| (*label, re))
        })
        .collect()
});

/// Deterministic keyword scan used before real classification runs.
///
/// Each matched cue adds 0.25 to its label, capped at 1.0. Text with no
/// matches yields `neutral` at 0.5.
pub fn heuristic_emotions(text: &str) -> EmotionVector {
    let lowered = text.to_lowercase();
    let mut scores: Vec<(&str, f32)> = Vec::new();

    for (label, re) in CUE_PATTERNS.iter() {
        let hits = re.find_iter(&lowered).count();
        if hits > 0 {
            scores.push((*label, (hits as f32 * 0.25).min(1.0)));
        }
    }

    if scores.is_empty() {
        scores.push((NEUTRAL, 0.5));
    }

    EmotionVector::new(scores, EmotionSource::Heuristic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_label_is_argmax() {
        let v = EmotionVector::new(
            vec![("joy", 0.2), ("anger", 0.9), ("fear", 0.4)],
            EmotionSource::Classified,
        );
        assert_eq!(v.primary_label(), "anger");
        assert_eq!(v.scores()[0].label, "anger");
        assert_eq!(v.scores()[2].label, "joy");
    }

    #[test]
    fn test_intensities_are_clamped() {
        let v = EmotionVector::new(
            vec![("joy", 1.7), ("fear", -0.3), ("anger", f32::NAN)],
            EmotionSource::Classified,
        );
        for score in v.scores() {
            assert!((0.0..=1.0).contains(&score.intensity));
        }
        assert_eq!(v.intensity("joy"), Some(1.0));
        assert_eq!(v.intensity("fear"), Some(0.0));
        assert_eq!(v.intensity("anger"), Some(0.0));
    }

    #[test]
    fn test_duplicate_labels_keep_highest() {
        let v = EmotionVector::new(vec![("joy", 0.3), ("joy", 0.6)], EmotionSource::Classified);
        assert_eq!(v.scores().len(), 1);
        assert_eq!(v.intensity("joy"), Some(0.6));
    }

    #[test]
    fn test_valence_arousal_from_lexicon() {
        let v = EmotionVector::new(vec![("joy", 1.0)], EmotionSource::Classified);
        assert!((v.valence() - 0.85).abs() < 1e-6);
        assert!((v.arousal() - 0.70).abs() < 1e-6);

        let mixed = EmotionVector::new(vec![("joy", 0.5), ("sadness", 0.5)], EmotionSource::Classified);
        assert!((mixed.valence() - 0.05).abs() < 1e-6);
        assert!((mixed.arousal() - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_prune_recomputes_derived_fields() {
        let mut v = EmotionVector::new(
            vec![("anger", 0.9), ("joy", 0.2), ("fear", 0.5)],
            EmotionSource::Classified,
        );
        v.prune(0.3, 5);
        assert_eq!(v.scores().len(), 2);
        assert!(v.intensity("joy").is_none());

        v.prune(0.95, 5);
        assert!(v.is_empty());
        assert_eq!(v.primary_label(), NEUTRAL);
        assert_eq!(v.valence(), 0.0);
        assert_eq!(v.arousal(), 0.0);
    }

    #[test]
    fn test_tied_intensities_order_by_label() {
        let v = EmotionVector::new(vec![("fear", 0.5), ("anger", 0.5)], EmotionSource::Classified);
        assert_eq!(v.primary_label(), "anger");
    }

    #[test]
    fn test_heuristic_is_deterministic() {
        let text = "This is ridiculous and there is no evidence! Why would anyone believe it?";
        let a = heuristic_emotions(text);
        let b = heuristic_emotions(text);
        assert_eq!(a, b);
        assert_eq!(a.source(), EmotionSource::Heuristic);
        assert!(a.intensity("annoyance").is_some());
        assert!(a.intensity("disapproval").is_some());
    }

    #[test]
    fn test_heuristic_without_cues_is_neutral() {
        let v = heuristic_emotions("The committee met on Tuesday.");
        assert_eq!(v.primary_label(), NEUTRAL);
        assert_eq!(v.intensity(NEUTRAL), Some(0.5));
    }

    #[test]
    fn test_heuristic_matches_whole_words() {
        let scared = heuristic_emotions("I am scared.");
        assert_eq!(scared.primary_label(), "fear");
        assert!(scared.intensity("caring").is_none());

        let show = heuristic_emotions("Show me the data.");
        assert_eq!(show.primary_label(), NEUTRAL);

        let frightening = heuristic_emotions("This is frightening.");
        assert_eq!(frightening.primary_label(), "fear");
        assert!(frightening.intensity("approval").is_none());

        let disagree = heuristic_emotions("I disagree.");
        assert!(disagree.intensity("approval").is_none());
        assert_eq!(disagree.primary_label(), "disapproval");
    }

    #[test]
    fn test_heuristic_prefix_cues_cover_word_forms() {
        let v = heuristic_emotions("A terrifying, catastrophic threat.");
        assert_eq!(v.primary_label(), "fear");
        assert_eq!(v.intensity("fear"), Some(0.75));
        assert!(heuristic_emotions("Risky and risks").intensity("nervousness").is_some());
    }

    #[test]
    fn test_label_index() {
        assert_eq!(label_index("admiration"), Some(0));
        assert_eq!(label_index(NEUTRAL), Some(27));
        assert_eq!(label_index("boredom"), None);
    }

    #[test]
    fn test_serde_recomputes_derived_fields() {
        let v = EmotionVector::new(vec![("fear", 0.8), ("curiosity", 0.4)], EmotionSource::Classified);
        let json = serde_json::to_string(&v).unwrap();
        let back: EmotionVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
