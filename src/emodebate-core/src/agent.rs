//! Persona agents and text generation backends.
//!
//! A `PersonaAgent` binds one persona to a `TextGenerator`, turns the rolling
//! debate context into a chat request, and returns the sanitized reply along
//! with a heuristic emotion guess.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{LlmConfig, MAX_RETRIES};
use crate::emotion::{EmotionVector, heuristic_emotions};
use crate::error::DebateError;
use crate::persona::Persona;

const CAPABILITY: &str = "text generation";

/// Replies shorter than this after sanitizing count as empty.
const MIN_REPLY_CHARS: usize = 10;

/// Who said a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 150,
        }
    }
}

/// A provider-neutral chat request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
}

/// A text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Produce a reply, or fail with `CapabilityUnavailable`.
    async fn generate(&self, request: GenerationRequest) -> Result<String, DebateError>;
}

/// `TextGenerator` for any OpenAI-compatible chat endpoint (OpenAI, Ollama, vLLM, ...).
pub struct OpenAiCompatibleGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    max_retries: u32,
}

impl OpenAiCompatibleGenerator {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self, DebateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(30)))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_base);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http_client),
            model: config.model.clone(),
            max_retries: config.max_retries.clamp(1, MAX_RETRIES),
        })
    }

    fn to_openai_messages(messages: Vec<ChatMessage>) -> Vec<ChatCompletionRequestMessage> {
        messages
            .into_iter()
            .map(|m| match m.role {
                ChatRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage {
                        content: m.content.into(),
                        name: None,
                    },
                ),
                ChatRole::User => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: m.content.into(),
                        name: None,
                    })
                }
                ChatRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage {
                        content: Some(m.content.into()),
                        name: None,
                        tool_calls: None,
                        refusal: None,
                        audio: None,
                        function_call: None,
                    },
                ),
            })
            .collect()
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, DebateError> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(request.sampling.temperature)
            .max_completion_tokens(request.sampling.max_tokens)
            .messages(Self::to_openai_messages(request.messages))
            .build()?;

        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = Duration::from_secs(1 << (attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match self.client.chat().create(chat_request.clone()).await {
                Ok(response) => {
                    return Ok(response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default());
                }
                Err(e) => {
                    warn!(model = %self.model, attempt = attempt + 1, error = %e, "generation request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(DebateError::unavailable(
            CAPABILITY,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        ))
    }
}

/// One past turn in the rolling context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub speaker: String,
    pub text: String,
}

/// Per-turn information the agent needs besides the context.
#[derive(Debug, Clone, Copy)]
pub struct TurnCue<'a> {
    pub topic: &'a str,
    pub opponent: &'a str,
    pub round: u32,
    pub total_rounds: u32,
}

/// The raw result of a generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub heuristic: EmotionVector,
    pub latency: Duration,
}

/// A persona bound to its text generation backend.
pub struct PersonaAgent {
    persona: Persona,
    generator: Arc<dyn TextGenerator>,
    sampling: SamplingParams,
    empty_reply_retries: u32,
}

impl PersonaAgent {
    pub fn new(persona: Persona, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            persona,
            generator,
            sampling: SamplingParams::default(),
            empty_reply_retries: 2,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Generate this persona's next line.
    pub async fn generate(
        &self,
        cue: &TurnCue<'_>,
        context: &[ContextEntry],
    ) -> Result<Generation, DebateError> {
        let started = Instant::now();
        let request = GenerationRequest {
            messages: self.build_messages(cue, context),
            sampling: self.sampling,
        };

        for attempt in 0..=self.empty_reply_retries {
            let raw = self.generator.generate(request.clone()).await?;
            let text = sanitize_response(&raw);

            if text.len() > MIN_REPLY_CHARS {
                debug!(
                    persona = %self.persona.name,
                    backend = self.generator.name(),
                    chars = text.len(),
                    "generated reply"
                );
                return Ok(Generation {
                    heuristic: heuristic_emotions(&text),
                    text,
                    latency: started.elapsed(),
                });
            }

            warn!(
                persona = %self.persona.name,
                attempt = attempt + 1,
                "empty reply from generator"
            );
        }

        Err(DebateError::unavailable(
            CAPABILITY,
            format!(
                "{} returned an empty reply after {} attempts",
                self.generator.name(),
                self.empty_reply_retries + 1
            ),
        ))
    }

    /// System prompt, context mapped to chat roles, then the round cue.
    fn build_messages(&self, cue: &TurnCue<'_>, context: &[ContextEntry]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(ChatMessage::new(
            ChatRole::System,
            self.persona.system_prompt(cue.topic, cue.opponent),
        ));

        for entry in context {
            if entry.speaker == self.persona.name {
                messages.push(ChatMessage::new(ChatRole::Assistant, entry.text.clone()));
            } else {
                messages.push(ChatMessage::new(
                    ChatRole::User,
                    format!("[{} said]: {}", entry.speaker, entry.text),
                ));
            }
        }

        let instruction = match context.last() {
            None => format!(
                "[Round {} of {}] Open the debate on: {}",
                cue.round, cue.total_rounds, cue.topic
            ),
            Some(last) if last.speaker != self.persona.name => format!(
                "[Round {} of {}] Respond to {}.",
                cue.round, cue.total_rounds, last.speaker
            ),
            Some(_) => format!(
                "[Round {} of {}] Continue your argument.",
                cue.round, cue.total_rounds
            ),
        };
        messages.push(ChatMessage::new(ChatRole::User, instruction));
        messages
    }
}

/// Sanitize AI response by stripping reasoning tokens and XML-like tags.
///
/// Removes patterns like <thinking>...</thinking>, <reflection>...</reflection>, etc.
pub fn sanitize_response(response: &str) -> String {
    let tags_to_strip = [
        "thinking",
        "think",
        "reflection",
        "reasoning",
        "thought",
        "scratchpad",
        "analysis",
    ];

    let mut result = response.to_string();

    for tag in &tags_to_strip {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    // Stage directions open the reply or a sentence; inline asides are content.
    if let Ok(stage_re) = regex::Regex::new(r"(^|[.!?])\s*\([^)]*\)") {
        result = stage_re.replace_all(&result, "$1 ").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}
