use std::pin::Pin;

use anyhow::{anyhow, Result};
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Environment variable holding the API credential. Checked once at startup.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Behavioral rules for the guide persona. Sent as the system instruction on
/// every request; the model must answer with questions, never with answers.
const SYSTEM_INSTRUCTION: &str = "\
You are a Socratic spiritual guide named 'The Alchemist'. Your sole purpose \
is to help the user reach their own inner truth through profound, open-ended \
questions.

Core directives:
1. NEVER PROVIDE ANSWERS. No advice, opinions, explanations, affirmations, or \
direct answers. You provoke introspection; you do not inform.
2. ONLY ASK QUESTIONS. Your entire response must be a single, well-formed \
question. No preambles, no closings.
3. GUIDE DEEPER. Base each new question on the user's previous statement, \
using their own words and concepts to challenge their underlying assumptions.
4. FOCUS ON THE SELF. Point the user back to their own experience, their \
sense of self, and the nature of their own consciousness.
5. EMBODY WISDOM. Keep a calm, patient, minimalist tone; gentle yet powerful.

Example: if the user says 'I'm feeling very anxious about the future', you \
might respond: 'What is it about the unknown that the mind labels as \
anxiety?' You are a mirror, reflecting the user's own mind back to them.";

/// Ordered reply fragments. Single-consumer, forward-only; ends when the
/// provider closes the response or at the first error.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Serialize, Deserialize, Clone)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Clone)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn user_turn(text: &str) -> Content {
    Content {
        role: Some("user".to_string()),
        parts: vec![Part { text: text.to_string() }],
    }
}

fn model_turn(text: &str) -> Content {
    Content {
        role: Some("model".to_string()),
        parts: vec![Part { text: text.to_string() }],
    }
}

/// Extract the text payload from one SSE line of a streamGenerateContent
/// response. Non-data lines, keep-alives, and empty chunks yield None.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }

    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let text: String = chunk
        .candidates
        .first()?
        .content
        .as_ref()?
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Open a dialogue with empty history. Created once per run; the session
    /// carries the full turn history for every subsequent send.
    pub fn start_chat(self) -> ChatSession {
        ChatSession {
            client: self,
            history: Vec::new(),
        }
    }
}

pub struct ChatSession {
    client: GeminiClient,
    history: Vec<Content>,
}

impl ChatSession {
    /// Record the user turn and start streaming the model's reply. The HTTP
    /// request runs on a background task; fragments arrive in order through
    /// the returned stream. Any failure surfaces as a single Err item.
    pub fn send_and_stream(&mut self, text: &str) -> ReplyStream {
        self.history.push(user_turn(text));

        let request = GenerateRequest {
            contents: self.history.clone(),
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
        };
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.client.base_url.trim_end_matches('/'),
            self.client.model,
            self.client.api_key,
        );
        let client = self.client.client.clone();

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let response = match client.post(&url).json(&request).send().await {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(Err(anyhow!("Gemini API error {}: {}", status, body)))
                    .await;
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        // SSE events are newline-delimited; a chunk may hold
                        // several complete lines or a partial one.
                        while let Some(newline) = buffer.find('\n') {
                            let line: String = buffer.drain(..=newline).collect();
                            if let Some(text) = parse_sse_line(line.trim_end()) {
                                if tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
            if let Some(text) = parse_sse_line(buffer.trim_end()) {
                let _ = tx.send(Ok(text)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Append the completed reply so later turns carry the full dialogue.
    pub fn record_reply(&mut self, text: &str) {
        self.history.push(model_turn(text));
    }

    /// Drop the pending user turn after a failed exchange so a manual retry
    /// starts from a clean history.
    pub fn discard_last_turn(&mut self) {
        if self
            .history
            .last()
            .is_some_and(|turn| turn.role.as_deref() == Some("user"))
        {
            self.history.pop();
        }
    }
}
