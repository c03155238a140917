//! Emotional Debate CLI
//!
//! Runs a two-persona debate against a local or remote LLM, speaking each
//! turn aloud and streaming its emotions to an OSC receiver.

use std::env;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use emodebate_core::agent::OpenAiCompatibleGenerator;
use emodebate_core::{
    Artifact, Config, DebateConfig, DebateEvent, DebateOrchestrator, EmotionEnricher,
    PersonaAgent, SamplingParams, SessionStatus, SpeechSynthesizer, TelemetryStreamer,
    TextGenerator, TranscriptReason, default_config,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "emodebate",
    version,
    about = "Emotional AI debate - two personas argue, speak and stream their feelings",
    long_about = "Runs a debate between two AI personas using any OpenAI-compatible API, \
                  scores each turn's emotions, synthesizes speech and streams telemetry over OSC."
)]
struct Cli {
    /// The topic to debate
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// Number of debate rounds (one turn per persona each)
    #[arg(short, long, value_name = "ROUNDS")]
    rounds: Option<u32>,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model name passed to the chat endpoint
    #[arg(short, long, value_name = "MODEL")]
    model: Option<String>,

    /// Force speech synthesis on
    #[arg(long, overrides_with = "no_audio")]
    audio: bool,

    /// Write text transcripts instead of audio
    #[arg(long)]
    no_audio: bool,

    /// Do not stream OSC telemetry
    #[arg(long)]
    no_telemetry: bool,

    /// OSC receiver host
    #[arg(long, value_name = "HOST")]
    osc_host: Option<String>,

    /// OSC receiver port
    #[arg(long, value_name = "PORT")]
    osc_port: Option<u16>,

    /// Telemetry frames per second
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// Directory for audio and transcript artifacts
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(rounds) = self.rounds {
            config.debate.rounds = rounds;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if self.no_audio {
            config.audio.enabled = false;
        } else if self.audio {
            config.audio.enabled = true;
        }
        if let Some(dir) = &self.output_dir {
            config.audio.output_dir = dir.clone();
        }
        if self.no_telemetry {
            config.telemetry.enabled = false;
        }
        if let Some(host) = &self.osc_host {
            config.telemetry.host = host.clone();
        }
        if let Some(port) = self.osc_port {
            config.telemetry.port = port;
        }
        if let Some(fps) = self.fps {
            config.telemetry.fps = fps;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    cli.apply(&mut config);

    if let Ok(api_base) = env::var("OPENAI_API_BASE").or_else(|_| env::var("OPENAI_BASE_URL")) {
        config.llm.api_base = api_base;
    }
    config.validate()?;

    // Local servers such as Ollama ignore the key.
    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| "ollama".to_string());

    let generator: Arc<dyn TextGenerator> =
        Arc::new(OpenAiCompatibleGenerator::new(&config.llm, &api_key)?);
    let sampling = SamplingParams {
        temperature: config.llm.temperature,
        max_tokens: config.llm.max_tokens,
    };
    let [seeker, skeptic] = config.personas();
    let agents = [
        PersonaAgent::new(seeker, generator.clone()).with_sampling(sampling),
        PersonaAgent::new(skeptic, generator).with_sampling(sampling),
    ];

    let enricher = EmotionEnricher::from_config(&config.emotion, env::var("EMOTION_API_KEY").ok())?;
    if config.emotion.endpoint.is_none() {
        warn!("no emotion endpoint configured, using keyword heuristics");
    }

    let synthesizer = SpeechSynthesizer::from_config(&config.audio).await;
    let telemetry = match TelemetryStreamer::connect(&config.telemetry).await {
        Ok(streamer) => streamer,
        Err(e) => {
            warn!(error = %e, "telemetry disabled");
            TelemetryStreamer::disabled()
        }
    };

    print_header(&cli.topic, &config, &synthesizer, &telemetry);

    let debate = DebateConfig::new(&cli.topic, config.debate.rounds)
        .with_context_turns(config.debate.context_turns);
    let orchestrator = DebateOrchestrator::new(debate, agents, enricher, synthesizer, telemetry)?
        .with_callback(create_console_callback());

    let session = orchestrator
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    let log_path = session.save_to_dir(&config.logging.log_dir)?;
    info!(path = %log_path.display(), "session log saved");

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    let reason = session
        .termination_reason()
        .map(|r| r.to_string())
        .unwrap_or_default();
    match session.status() {
        SessionStatus::Failed => println!(
            "{}",
            format!("  Debate failed ({}).", reason).bright_red().bold()
        ),
        _ => println!(
            "{}",
            format!(
                "  Debate concluded after {} of {} rounds ({}).",
                session.completed_rounds(),
                session.rounds,
                reason
            )
            .bright_green()
            .bold()
        ),
    }
    println!("  {} {}", "Log:".bold(), log_path.display().to_string().dimmed());
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    if session.status() == SessionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_header(
    topic: &str,
    config: &Config,
    synthesizer: &SpeechSynthesizer,
    telemetry: &TelemetryStreamer,
) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Emotional Debate".bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), topic.bright_white());
    println!(
        "{} {} ({} rounds)",
        "Model:".bold(),
        config.llm.model.dimmed(),
        config.debate.rounds
    );
    println!("{}", "Personas:".bold());
    for persona in config.personas() {
        println!(
            "  {}. {} - voice {}",
            persona.slot.display_name(),
            persona.name.bright_cyan(),
            persona.voice_id.dimmed()
        );
    }

    let speech = if synthesizer.is_enabled() {
        synthesizer.backend_names().join(" → ")
    } else {
        "off (transcripts only)".to_string()
    };
    println!("{} {}", "Speech:".bold(), speech.dimmed());

    let osc = if telemetry.is_enabled() {
        format!("{} @ {} fps", config.telemetry_addr(), config.telemetry.fps)
    } else {
        "off".to_string()
    };
    println!("{} {}", "OSC:".bold(), osc.dimmed());
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

/// Create a callback that prints debate events to the console.
fn create_console_callback() -> Box<dyn Fn(DebateEvent) + Send + Sync> {
    Box::new(move |event| match event {
        DebateEvent::RoundStart { round, total } => {
            println!();
            println!(
                "{}",
                format!("  ── Round {} of {} ──", round, total)
                    .bright_magenta()
                    .bold()
            );
            println!();
        }
        DebateEvent::SpeakerStart { name, slot, .. } => {
            println!(
                "{} {} {}",
                "▶".bright_cyan(),
                name.bright_cyan().bold(),
                format!("({})", slot.display_name()).yellow()
            );
        }
        DebateEvent::TurnComplete(response) => {
            // Word wrap and indent the content
            let wrapped = textwrap(&response.turn.text, 66);
            for line in wrapped.lines() {
                if response.turn.degraded {
                    println!("  {}", line.dimmed());
                } else {
                    println!("  {}", line);
                }
            }

            let top: Vec<String> = response
                .emotions
                .top(3)
                .iter()
                .map(|s| format!("{} {:.2}", s.label, s.intensity))
                .collect();
            println!(
                "  {} {}  {} {:+.2}  {} {:.2}",
                "emotions:".dimmed(),
                top.join(", ").yellow(),
                "valence".dimmed(),
                response.emotions.valence(),
                "arousal".dimmed(),
                response.emotions.arousal()
            );

            match &response.artifact {
                Some(Artifact::Audio { path, backend }) => println!(
                    "  {} {} {}",
                    "audio:".dimmed(),
                    path.display(),
                    format!("[{}]", backend).dimmed()
                ),
                Some(Artifact::Transcript { path, reason }) => {
                    let label = match reason {
                        TranscriptReason::Disabled => "transcript:".dimmed(),
                        TranscriptReason::BackendsExhausted => "transcript (no speech):".yellow(),
                    };
                    println!("  {} {}", label, path.display());
                }
                None => {}
            }

            for degradation in &response.degradations {
                println!(
                    "  {} {:?}: {}",
                    "degraded".yellow(),
                    degradation.stage,
                    degradation.detail.dimmed()
                );
            }
            println!();
        }
        DebateEvent::SessionEnd { .. } => {
            // Handled in main
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_respects_width() {
        let wrapped = textwrap("one two three four five six seven eight nine ten", 12);
        assert!(wrapped.lines().all(|l| l.len() <= 12));
        assert_eq!(wrapped.split_whitespace().count(), 10);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "emodebate",
            "AI ethics",
            "--rounds",
            "2",
            "--no-audio",
            "--osc-port",
            "9000",
            "--fps",
            "60",
        ]);
        let mut config = default_config();
        cli.apply(&mut config);

        assert_eq!(config.debate.rounds, 2);
        assert!(!config.audio.enabled);
        assert!(config.telemetry.enabled);
        assert_eq!(config.telemetry.port, 9000);
        assert_eq!(config.telemetry.fps, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_audio_flags_keep_config_by_default() {
        let cli = Cli::parse_from(["emodebate", "AI ethics"]);
        let mut config = default_config();
        config.audio.enabled = false;
        cli.apply(&mut config);
        assert!(!config.audio.enabled);
    }
}
