//! Debate orchestration logic.
//!
//! Drives the round-robin turn sequence. Each turn runs generation,
//! enrichment, composition, synthesis and streaming in order, then is logged
//! to the session and folded into the rolling context for the next speaker.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use tracing::{debug, error, info, warn};

use crate::agent::{ContextEntry, PersonaAgent, TurnCue};
use crate::config::validate_rounds;
use crate::emotion::heuristic_emotions;
use crate::enricher::EmotionEnricher;
use crate::error::DebateError;
use crate::persona::{PersonaSlot, validate_pair};
use crate::response::{
    Degradation, DebateResponse, PipelineStage, ResponseComposer, Speaker, Turn,
};
use crate::session::{DebateSession, SessionStatus, TerminationReason};
use crate::telemetry::TelemetryStreamer;
use crate::tts::SpeechSynthesizer;

/// Rolling context size used when none is configured.
pub const DEFAULT_CONTEXT_TURNS: usize = 6;

/// Consecutive failed turns after which a persona that has spoken before is
/// treated as unavailable.
pub const UNAVAILABLE_AFTER_FAILURES: u32 = 2;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateState {
    Init,
    AwaitingTurn,
    Enriching,
    Synthesizing,
    Streaming,
    Logging,
    Done,
    Failed,
}

impl DebateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DebateState::Done | DebateState::Failed)
    }
}

impl fmt::Display for DebateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DebateState::Init => "init",
            DebateState::AwaitingTurn => "awaiting_turn",
            DebateState::Enriching => "enriching",
            DebateState::Synthesizing => "synthesizing",
            DebateState::Streaming => "streaming",
            DebateState::Logging => "logging",
            DebateState::Done => "done",
            DebateState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Legal transitions:
///
/// ```text
/// Init → AwaitingTurn | Done
/// AwaitingTurn → Enriching
/// Enriching → Synthesizing
/// Synthesizing → Streaming
/// Streaming → Logging
/// Logging → AwaitingTurn | Done
/// ```
///
/// Any non-terminal state may also move to `Failed`, or to `Done` on interrupt.
fn is_legal_transition(from: DebateState, to: DebateState) -> bool {
    use DebateState::*;

    if to.is_terminal() && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, AwaitingTurn)
            | (AwaitingTurn, Enriching)
            | (Enriching, Synthesizing)
            | (Synthesizing, Streaming)
            | (Streaming, Logging)
            | (Logging, AwaitingTurn)
    )
}

#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: DebateState,
    pub to: DebateState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state and rejects transitions outside the table.
#[derive(Debug)]
pub struct DebateStateMachine {
    current: DebateState,
    history: Vec<DebateState>,
}

impl DebateStateMachine {
    pub fn new() -> Self {
        Self {
            current: DebateState::Init,
            history: vec![DebateState::Init],
        }
    }

    pub fn current(&self) -> DebateState {
        self.current
    }

    /// Every state entered so far, starting with `Init`.
    pub fn history(&self) -> &[DebateState] {
        &self.history
    }

    pub fn advance(&mut self, to: DebateState) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        debug!(from = %self.current, to = %to, "State transition");
        self.current = to;
        self.history.push(to);
        Ok(())
    }
}

impl Default for DebateStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for running a debate.
#[derive(Debug, Clone)]
pub struct DebateConfig {
    /// The topic being debated.
    pub topic: String,
    /// Number of rounds; each round is one turn per persona.
    pub rounds: u32,
    /// Most recent turns fed back to the generator.
    pub context_turns: usize,
}

impl DebateConfig {
    pub fn new(topic: impl Into<String>, rounds: u32) -> Self {
        Self {
            topic: topic.into(),
            rounds,
            context_turns: DEFAULT_CONTEXT_TURNS,
        }
    }

    pub fn with_context_turns(mut self, context_turns: usize) -> Self {
        self.context_turns = context_turns;
        self
    }
}

/// Callback for debate events.
pub type DebateCallback = Box<dyn Fn(DebateEvent) + Send + Sync>;

/// Events emitted during a debate.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// A new round is starting.
    RoundStart { round: u32, total: u32 },
    /// A persona is about to speak.
    SpeakerStart { round: u32, slot: PersonaSlot, name: String },
    /// A turn went through the whole pipeline and was logged.
    TurnComplete(Box<DebateResponse>),
    /// The session reached a terminal status.
    SessionEnd {
        status: SessionStatus,
        reason: TerminationReason,
    },
}

enum TurnOutcome {
    Recorded,
    /// No persona is able to produce text.
    Abandoned,
}

/// Generation track record for one persona slot.
#[derive(Debug, Default, Clone, Copy)]
struct GenerationHealth {
    ever_succeeded: bool,
    failure_streak: u32,
}

impl GenerationHealth {
    fn succeeded(&mut self) {
        self.ever_succeeded = true;
        self.failure_streak = 0;
    }

    fn failed(&mut self) {
        self.failure_streak += 1;
    }

    /// A persona that never produced text is unavailable after one failure;
    /// one that has spoken before gets `UNAVAILABLE_AFTER_FAILURES` attempts.
    fn is_unavailable(&self) -> bool {
        if self.ever_succeeded {
            self.failure_streak >= UNAVAILABLE_AFTER_FAILURES
        } else {
            self.failure_streak > 0
        }
    }
}

/// Orchestrates the debate between the two persona agents.
pub struct DebateOrchestrator {
    config: DebateConfig,
    agents: [PersonaAgent; 2],
    enricher: EmotionEnricher,
    composer: ResponseComposer,
    synthesizer: SpeechSynthesizer,
    telemetry: TelemetryStreamer,
    state: DebateStateMachine,
    session: DebateSession,
    context: VecDeque<ContextEntry>,
    health: [GenerationHealth; 2],
    callback: Option<DebateCallback>,
}

impl DebateOrchestrator {
    /// Create a new orchestrator. Fails with `ConfigError` on an invalid
    /// round count or persona pair.
    pub fn new(
        config: DebateConfig,
        agents: [PersonaAgent; 2],
        enricher: EmotionEnricher,
        synthesizer: SpeechSynthesizer,
        telemetry: TelemetryStreamer,
    ) -> Result<Self, DebateError> {
        validate_rounds(config.rounds)?;
        validate_pair([agents[0].persona(), agents[1].persona()])?;

        let session = DebateSession::new(config.topic.clone(), config.rounds);
        Ok(Self {
            context: VecDeque::with_capacity(config.context_turns + 1),
            config,
            agents,
            enricher,
            composer: ResponseComposer::new(),
            synthesizer,
            telemetry,
            state: DebateStateMachine::new(),
            session,
            health: [GenerationHealth::default(); 2],
            callback: None,
        })
    }

    /// Set a callback for debate events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn session(&self) -> &DebateSession {
        &self.session
    }

    /// Run the full debate without an external shutdown signal.
    pub async fn run(self) -> DebateSession {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run the debate, abandoning the in-flight turn when `shutdown` resolves.
    pub async fn run_until<F>(mut self, shutdown: F) -> DebateSession
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let total = self.config.rounds;
        self.session.start();
        info!(
            session = %self.session.id,
            topic = %self.config.topic,
            rounds = total,
            "debate started"
        );

        let (status, reason) = 'rounds: {
            for round in 1..=total {
                self.emit_event(DebateEvent::RoundStart { round, total });

                for slot in PersonaSlot::ORDER {
                    let outcome = tokio::select! {
                        biased;
                        _ = &mut shutdown => None,
                        outcome = self.take_turn(round, slot) => Some(outcome),
                    };

                    match outcome {
                        None => {
                            warn!(round, persona = slot.display_name(), "debate interrupted");
                            break 'rounds (SessionStatus::Done, TerminationReason::Interrupted);
                        }
                        Some(TurnOutcome::Abandoned) => {
                            error!(round, "all personas unavailable, abandoning debate");
                            break 'rounds (
                                SessionStatus::Failed,
                                TerminationReason::AllPersonasUnavailable,
                            );
                        }
                        Some(TurnOutcome::Recorded) => {}
                    }
                }

                self.session.complete_round(round);
            }
            (SessionStatus::Done, TerminationReason::RoundsComplete)
        };

        self.finish(status, reason)
    }

    /// Run one turn through the whole pipeline.
    async fn take_turn(&mut self, round: u32, slot: PersonaSlot) -> TurnOutcome {
        self.enter(DebateState::AwaitingTurn);

        let idx = slot.index();
        let persona = self.agents[idx].persona().clone();
        self.emit_event(DebateEvent::SpeakerStart {
            round,
            slot,
            name: persona.name.clone(),
        });

        let opponent = self.agents[slot.opponent().index()].persona().name.clone();
        let cue = TurnCue {
            topic: &self.config.topic,
            opponent: &opponent,
            round,
            total_rounds: self.config.rounds,
        };
        let context = self.context.make_contiguous();

        let mut degradations = Vec::new();
        let speaker = Speaker::of(&persona);
        let (turn, heuristic) = match self.agents[idx].generate(&cue, context).await {
            Ok(generation) => {
                self.health[idx].succeeded();
                (
                    Turn::generated(speaker, round, generation.text, generation.latency),
                    generation.heuristic,
                )
            }
            Err(e) => {
                self.health[idx].failed();
                if self.health.iter().all(GenerationHealth::is_unavailable) {
                    error!(persona = %persona.name, error = %e, "generation unavailable for every persona");
                    return TurnOutcome::Abandoned;
                }

                warn!(persona = %persona.name, round, error = %e, "generation unavailable, using fallback line");
                degradations.push(Degradation {
                    stage: PipelineStage::Generation,
                    detail: e.to_string(),
                });
                let text = persona.fallback_line(round);
                let heuristic = heuristic_emotions(&text);
                (
                    Turn::fallback(speaker, round, text, std::time::Duration::ZERO),
                    heuristic,
                )
            }
        };

        self.enter(DebateState::Enriching);
        let enrichment = self.enricher.enrich(&turn.text, &heuristic).await;
        if let Some(detail) = enrichment.failure {
            degradations.push(Degradation {
                stage: PipelineStage::Enrichment,
                detail,
            });
        }
        let mut response = self.composer.compose(turn, enrichment.vector, degradations);

        self.enter(DebateState::Synthesizing);
        match self.synthesizer.synthesize(&response) {
            Ok(artifact) => response = response.with_artifact(artifact),
            Err(e) => {
                warn!(persona = %persona.name, round, error = %e, "no artifact recorded for turn");
                response.degradations.push(Degradation {
                    stage: PipelineStage::Synthesis,
                    detail: e.to_string(),
                });
            }
        }

        self.enter(DebateState::Streaming);
        self.telemetry.stream(&response.emotions, &persona).await;

        self.enter(DebateState::Logging);
        self.remember(ContextEntry {
            speaker: persona.name.clone(),
            text: response.turn.text.clone(),
        });
        debug!(
            persona = %persona.name,
            round,
            primary = response.emotions.primary_label(),
            degraded = response.is_degraded(),
            "turn logged"
        );
        self.emit_event(DebateEvent::TurnComplete(Box::new(response.clone())));
        self.session.record(response);

        TurnOutcome::Recorded
    }

    fn remember(&mut self, entry: ContextEntry) {
        self.context.push_back(entry);
        while self.context.len() > self.config.context_turns {
            self.context.pop_front();
        }
    }

    fn enter(&mut self, to: DebateState) {
        if let Err(e) = self.state.advance(to) {
            error!(error = %e, "orchestrator state out of sequence");
        }
    }

    fn finish(mut self, status: SessionStatus, reason: TerminationReason) -> DebateSession {
        self.enter(match status {
            SessionStatus::Failed => DebateState::Failed,
            _ => DebateState::Done,
        });
        self.session.finalize(status, reason);

        let stats = self.telemetry.stats();
        info!(
            session = %self.session.id,
            %reason,
            turns = self.session.responses().len(),
            degraded = self.session.degraded_turns(),
            frames_sent = stats.frames_sent,
            frames_dropped = stats.frames_dropped,
            "debate finished"
        );
        self.emit_event(DebateEvent::SessionEnd { status, reason });
        self.session
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: DebateEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}
