//! Answer synthesis: prompt assembly and the chat-completion boundary.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

/// System prompt framing the model as an internal support veteran.
pub const SYSTEM_PROMPT: &str = "You are a senior member of the support team, dedicated to \
providing comprehensive and accurate assistance. Primarily base your answers on the information \
provided, using external sources to fill in the gaps.";

/// Degraded user-facing reply when answer generation fails.
pub const FALLBACK_ANSWER: &str = "Error in processing the request. Please check the logs.";

/// Most documents ever included in one prompt.
pub const MAX_CONTEXT_DOCS: usize = 7;

/// Failure talking to the completion model (transport, quota, bad payload).
#[derive(Debug)]
pub struct GenerationError {
    message: String,
}

impl GenerationError {
    /// Wraps a failure description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "answer generation failed: {}", self.message)
    }
}

impl std::error::Error for GenerationError {}

/// Trait implemented by concrete chat-completion providers.
pub trait AnswerModel: Send + Sync {
    /// Produces a completion for the given system and user prompts.
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError>;
}

/// Renders the retrieval-grounded user prompt.
///
/// Contexts are numbered `Document 1..n` and capped at [`MAX_CONTEXT_DOCS`];
/// extra entries are silently dropped.
pub fn build_prompt(question: &str, contexts: &[String]) -> String {
    let rendered: Vec<String> = contexts
        .iter()
        .take(MAX_CONTEXT_DOCS)
        .enumerate()
        .map(|(idx, text)| format!("Document {}: {}", idx + 1, text))
        .collect();
    format!(
        "Relevant internal documentation:\n\n{}\n\nBased on the internal documentation, answer \
         the question: {}",
        rendered.join("\n\n"),
        question
    )
}

/// Blocking chat-completions client for OpenAI-compatible endpoints.
///
/// Construct it off the async runtime; async callers bridge through
/// `tokio::task::spawn_blocking`.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    /// Builds a new chat client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing chat API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing chat model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid chat API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build chat HTTP client")?;
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            temperature,
        })
    }
}

impl AnswerModel for OpenAiChat {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|err| GenerationError::new(format!("chat request failed: {err}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::new(format!(
                "chat endpoint returned {status}: {text}"
            )));
        }
        let parsed: ChatResponse = resp
            .json()
            .map_err(|err| GenerationError::new(format!("unparsable chat response: {err}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::new("chat response contained no choices"))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}
