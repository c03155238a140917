//! Speech synthesis with an ordered backend fallback chain.
//!
//! The synthesizer tries each backend in order and writes the first
//! successful rendering as a WAV file. When synthesis is disabled or every
//! backend fails it writes a plain-text transcript instead, which is a normal
//! outcome rather than an error.

use kokoro_tiny::TtsEngine;
use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, SpeechBackendKind};
use crate::error::DebateError;
use crate::response::{Artifact, DebateResponse, TranscriptReason};

const CAPABILITY: &str = "speech synthesis";

/// Kokoro renders at 24 kHz.
pub const KOKORO_SAMPLE_RATE: u32 = 24_000;

/// Mono PCM samples in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// One speech backend in the fallback chain.
pub trait SpeechBackend {
    fn name(&self) -> &str;

    /// Cheap check consulted before every invocation.
    fn is_available(&self) -> bool;

    fn synthesize(&mut self, text: &str, voice_id: &str) -> Result<SpeechAudio, DebateError>;
}

/// Local neural TTS through kokoro-tiny.
pub struct KokoroBackend {
    engine: TtsEngine,
    available_voices: Vec<String>,
}

impl KokoroBackend {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new() -> Result<Self, DebateError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| DebateError::unavailable(CAPABILITY, format!("kokoro init failed: {}", e)))?;

        let available_voices = engine.voices();

        Ok(Self {
            engine,
            available_voices,
        })
    }

    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), DebateError> {
        if voice_id.is_empty() || !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(DebateError::unavailable(
                CAPABILITY,
                format!("kokoro has no voice '{}'", voice_id),
            ));
        }
        Ok(())
    }
}

impl SpeechBackend for KokoroBackend {
    fn name(&self) -> &str {
        "kokoro"
    }

    fn is_available(&self) -> bool {
        !self.available_voices.is_empty()
    }

    /// Synthesize text in chunks to handle long text.
    /// Kokoro-tiny has a strict limit on text length, so we split into small chunks.
    fn synthesize(&mut self, text: &str, voice_id: &str) -> Result<SpeechAudio, DebateError> {
        self.validate_voice(voice_id)?;

        let mut samples = Vec::new();

        for chunk in split_into_chunks(text, 200) {
            let rendered = self
                .engine
                .synthesize(&chunk, Some(voice_id))
                .map_err(|e| DebateError::unavailable(CAPABILITY, format!("kokoro: {}", e)))?;

            samples.extend(rendered);

            // 0.3 s pause between chunks to prevent cutoff
            samples.extend(std::iter::repeat_n(0.0, 7_200));
        }

        // 0.5 s trailing padding
        samples.extend(std::iter::repeat_n(0.0, 12_000));

        Ok(SpeechAudio {
            samples,
            sample_rate: KOKORO_SAMPLE_RATE,
        })
    }
}

/// Platform speech commands that can write a WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPreset {
    /// macOS `say`.
    Say,
    /// `espeak-ng`.
    Espeak,
}

impl CommandPreset {
    fn program(self) -> &'static str {
        match self {
            CommandPreset::Say => "say",
            CommandPreset::Espeak => "espeak-ng",
        }
    }

    fn probe_args(self) -> &'static [&'static str] {
        match self {
            CommandPreset::Say => &["-v", "?"],
            CommandPreset::Espeak => &["--version"],
        }
    }

    fn render_args(self, text: &str, voice: Option<&str>, out: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(voice) = voice {
            args.push("-v".to_string());
            args.push(voice.to_string());
        }
        match self {
            CommandPreset::Say => {
                args.push("--file-format=WAVE".to_string());
                args.push("--data-format=LEI16@22050".to_string());
                args.push("-o".to_string());
            }
            CommandPreset::Espeak => args.push("-w".to_string()),
        }
        args.push(out.display().to_string());
        args.push(text.to_string());
        args
    }
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Intermediate file removed when dropped.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn new(dir: &Path, program: &str) -> Self {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        ScratchFile(dir.join(format!(
            ".{}-{}-{}.wav",
            program,
            std::process::id(),
            n
        )))
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Speech backend that shells out to a platform TTS command.
pub struct CommandBackend {
    preset: CommandPreset,
    scratch_dir: PathBuf,
    voices: HashMap<String, String>,
    probed: Cell<Option<bool>>,
}

impl CommandBackend {
    pub fn new(preset: CommandPreset, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            preset,
            scratch_dir: scratch_dir.into(),
            voices: HashMap::new(),
            probed: Cell::new(None),
        }
    }

    /// Map persona voice ids to platform voice names.
    pub fn with_voices(mut self, voices: HashMap<String, String>) -> Self {
        self.voices = voices;
        self
    }

    fn probe(&self) -> bool {
        Command::new(self.preset.program())
            .args(self.preset.probe_args())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl SpeechBackend for CommandBackend {
    fn name(&self) -> &str {
        self.preset.program()
    }

    fn is_available(&self) -> bool {
        if let Some(known) = self.probed.get() {
            return known;
        }
        let available = self.probe();
        debug!(backend = self.name(), available, "probed speech command");
        self.probed.set(Some(available));
        available
    }

    fn synthesize(&mut self, text: &str, voice_id: &str) -> Result<SpeechAudio, DebateError> {
        fs::create_dir_all(&self.scratch_dir)?;
        let scratch = ScratchFile::new(&self.scratch_dir, self.preset.program());
        let voice = self.voices.get(voice_id).map(String::as_str);

        let output = Command::new(self.preset.program())
            .args(self.preset.render_args(text, voice, &scratch.0))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                self.probed.set(Some(false));
                DebateError::unavailable(CAPABILITY, format!("{}: {}", self.name(), e))
            })?;

        if !output.status.success() {
            return Err(DebateError::unavailable(
                CAPABILITY,
                format!(
                    "{} exited with {}: {}",
                    self.name(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        read_wav(&scratch.0)
    }
}

/// Read a mono or interleaved WAV file, keeping the first channel.
pub fn read_wav(path: &Path) -> Result<SpeechAudio, DebateError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(SpeechAudio {
        samples: interleaved.into_iter().step_by(channels).collect(),
        sample_rate: spec.sample_rate,
    })
}

/// Write mono 16-bit PCM.
pub fn write_wav(path: &Path, audio: &SpeechAudio) -> Result<(), DebateError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in &audio.samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Ordered fallback chain over speech backends.
pub struct SpeechSynthesizer {
    backends: Vec<Box<dyn SpeechBackend>>,
    enabled: bool,
    output_dir: PathBuf,
}

impl SpeechSynthesizer {
    pub fn new(backends: Vec<Box<dyn SpeechBackend>>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            backends,
            enabled: true,
            output_dir: output_dir.into(),
        }
    }

    /// Synthesizer that only ever writes transcripts.
    pub fn disabled(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            backends: Vec::new(),
            enabled: false,
            output_dir: output_dir.into(),
        }
    }

    /// Build the chain described by `config`, skipping backends that fail to start.
    pub async fn from_config(config: &AudioConfig) -> Self {
        if !config.enabled {
            return Self::disabled(&config.output_dir);
        }

        let mut backends: Vec<Box<dyn SpeechBackend>> = Vec::new();
        for kind in &config.backends {
            match kind {
                SpeechBackendKind::Kokoro => match KokoroBackend::new().await {
                    Ok(kokoro) => backends.push(Box::new(kokoro)),
                    Err(e) => warn!(error = %e, "kokoro backend unavailable"),
                },
                SpeechBackendKind::Say => backends.push(Box::new(
                    CommandBackend::new(CommandPreset::Say, &config.output_dir)
                        .with_voices(config.system_voices.clone()),
                )),
                SpeechBackendKind::Espeak => backends.push(Box::new(
                    CommandBackend::new(CommandPreset::Espeak, &config.output_dir)
                        .with_voices(config.system_voices.clone()),
                )),
            }
        }

        Self::new(backends, &config.output_dir)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render `response` with the first backend that succeeds, or write a transcript.
    ///
    /// Fails only when the artifact itself cannot be written.
    pub fn synthesize(&mut self, response: &DebateResponse) -> Result<Artifact, DebateError> {
        fs::create_dir_all(&self.output_dir)?;
        let stem = artifact_stem(response);

        if !self.enabled {
            return self.write_transcript(response, &stem, TranscriptReason::Disabled);
        }

        let text = &response.turn.text;
        let voice = &response.turn.speaker.voice_id;

        for backend in self.backends.iter_mut() {
            if !backend.is_available() {
                debug!(backend = backend.name(), "skipping unavailable speech backend");
                continue;
            }

            match backend.synthesize(text, voice) {
                Ok(audio) if !audio.samples.is_empty() => {
                    let path = self.output_dir.join(format!("{}.wav", stem));
                    match write_wav(&path, &audio) {
                        Ok(()) => {
                            info!(backend = backend.name(), path = %path.display(), "speech saved");
                            return Ok(Artifact::Audio {
                                path,
                                backend: backend.name().to_string(),
                            });
                        }
                        Err(e) => {
                            warn!(backend = backend.name(), error = %e, "failed to write audio");
                        }
                    }
                }
                Ok(_) => warn!(backend = backend.name(), "speech backend returned no audio"),
                Err(e) => warn!(backend = backend.name(), error = %e, "speech backend failed"),
            }
        }

        self.write_transcript(response, &stem, TranscriptReason::BackendsExhausted)
    }

    fn write_transcript(
        &self,
        response: &DebateResponse,
        stem: &str,
        reason: TranscriptReason,
    ) -> Result<Artifact, DebateError> {
        let path = self.output_dir.join(format!("{}.txt", stem));
        fs::write(&path, transcript_text(response, reason))?;
        debug!(path = %path.display(), ?reason, "transcript saved");
        Ok(Artifact::Transcript { path, reason })
    }
}

/// Artifact name for a response, e.g. `round02_skeptic_20261019_143012_084211`.
///
/// The response timestamp keeps sessions sharing an output directory apart
/// while the name stays stable for a given response.
pub fn artifact_stem(response: &DebateResponse) -> String {
    format!(
        "round{:02}_{}_{}",
        response.turn.round,
        response.turn.speaker.slug(),
        response.timestamp.format("%Y%m%d_%H%M%S_%6f")
    )
}

fn transcript_text(response: &DebateResponse, reason: TranscriptReason) -> String {
    let emotions = &response.emotions;
    format!(
        "Speaker: {}\nRound: {}\nText: {}\nPrimary Emotion: {}\nValence: {:.2}\nArousal: {:.2}\nReason: {}\nTimestamp: {}\n",
        response.turn.speaker.name,
        response.turn.round,
        response.turn.text,
        emotions.primary_label(),
        emotions.valence(),
        emotions.arousal(),
        match reason {
            TranscriptReason::Disabled => "speech synthesis disabled",
            TranscriptReason::BackendsExhausted => "all speech backends failed",
        },
        response.timestamp.to_rfc3339(),
    )
}

/// Split text into chunks that are safe for TTS synthesis.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.trim().is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk.clear();
            }

            // A single over-long sentence is split at commas
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars
                        && !current_chunk.trim().is_empty()
                    {
                        chunks.push(current_chunk.trim().to_string());
                        current_chunk.clear();
                    }
                    current_chunk.push_str(part);
                    current_chunk.push(' ');
                }
                continue;
            }
        }

        current_chunk.push_str(sentence);
        current_chunk.push(' ');
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}
