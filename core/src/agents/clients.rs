//! Remote completion clients.
//!
//! Every backend is reached through [`RemoteClient`], which composes a
//! per-family [`WireFormat`] (request mapping and response extraction) with a
//! shared HTTP call wrapper. The wrapper is the only place transport and
//! backend errors are observed; all of them leave this module as a single
//! [`GenerationFailed`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use super::config::ProviderSelection;
use super::providers::{GenerationParameters, ProviderKind, PRIMING_MESSAGE};
use crate::conversation::{Conversation, Message, Role};

/// Normalised failure of a provider call. `message` is safe to log; `cause`
/// carries the backend-specific detail.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GenerationFailed {
    pub message: String,
    #[source]
    pub cause: anyhow::Error,
}

impl GenerationFailed {
    pub fn new(message: impl Into<String>, cause: anyhow::Error) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Generate the assistant reply for `conversation`, whose last message is
    /// the current user turn. Implementations must not modify it.
    async fn generate(
        &self,
        conversation: &Conversation,
        params: &GenerationParameters,
    ) -> Result<String, GenerationFailed>;
}

/// Builds a client for a resolved selection. Swappable so the orchestrator can
/// be driven without network access.
pub trait ProviderFactory: Send + Sync {
    fn client_for(&self, selection: ProviderSelection) -> Arc<dyn ProviderClient>;
}

/// Request ready to be sent by the shared call wrapper.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub bearer: Option<String>,
    pub body: Value,
}

pub trait WireFormat: Send + Sync {
    fn prepare(
        &self,
        selection: &ProviderSelection,
        transcript: &[Message],
        params: &GenerationParameters,
    ) -> PreparedRequest;

    /// Pull the generated text out of a successful response body.
    fn extract(&self, body: &Value) -> Option<String>;
}

/// Persona, priming turn, then the conversation in order. Stray system turns
/// in the conversation are dropped so the persona appears exactly once.
pub fn compose_transcript(persona: &str, conversation: &Conversation) -> Vec<Message> {
    let mut transcript = Vec::with_capacity(conversation.len() + 2);
    transcript.push(Message::system(persona));
    transcript.push(Message::assistant(PRIMING_MESSAGE));
    transcript.extend(
        conversation
            .iter()
            .filter(|m| m.role() != Role::System)
            .cloned(),
    );
    transcript
}

pub struct RemoteClient<W> {
    http: Client,
    selection: ProviderSelection,
    wire: W,
}

pub type GroqClient = RemoteClient<GroqWire>;
pub type GeminiClient = RemoteClient<GeminiWire>;
pub type AnthropicClient = RemoteClient<AnthropicWire>;

impl<W: WireFormat> RemoteClient<W> {
    pub fn new(http: Client, selection: ProviderSelection, wire: W) -> Self {
        Self {
            http,
            selection,
            wire,
        }
    }

    async fn send(&self, request: PreparedRequest) -> Result<Value> {
        let mut builder = self.http.post(&request.url).json(&request.body);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        let response = builder.send().await.context("transport failure")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("backend returned {status}: {detail}");
        }
        response
            .json::<Value>()
            .await
            .context("response body was not JSON")
    }
}

#[async_trait]
impl<W: WireFormat> ProviderClient for RemoteClient<W> {
    fn kind(&self) -> ProviderKind {
        self.selection.kind()
    }

    async fn generate(
        &self,
        conversation: &Conversation,
        params: &GenerationParameters,
    ) -> Result<String, GenerationFailed> {
        let display = self.selection.seed.display;
        let transcript = compose_transcript(&self.selection.seed.persona(), conversation);
        let request = self.wire.prepare(&self.selection, &transcript, params);
        let body = self
            .send(request)
            .await
            .map_err(|err| GenerationFailed::new(format!("{display} request failed"), err))?;
        match self.wire.extract(&body) {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(GenerationFailed::new(
                format!("{display} returned no usable content"),
                anyhow!("empty completion: {body}"),
            )),
        }
    }
}

/// OpenAI-compatible chat completions.
pub struct GroqWire;

impl WireFormat for GroqWire {
    fn prepare(
        &self,
        selection: &ProviderSelection,
        transcript: &[Message],
        params: &GenerationParameters,
    ) -> PreparedRequest {
        let messages: Vec<Value> = transcript
            .iter()
            .map(|m| json!({ "role": m.role().as_str(), "content": m.content() }))
            .collect();
        let stop = if params.stop.is_empty() {
            Value::Null
        } else {
            json!(params.stop)
        };
        PreparedRequest {
            url: format!("{}/chat/completions", selection.base_url.trim_end_matches('/')),
            headers: Vec::new(),
            bearer: Some(selection.config.api_key.clone()),
            body: json!({
                "model": selection.config.model,
                "messages": messages,
                "temperature": params.temperature,
                "max_tokens": params.max_output_tokens,
                "top_p": params.top_p,
                "stream": false,
                "stop": stop,
            }),
        }
    }

    fn extract(&self, body: &Value) -> Option<String> {
        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(|val| val.as_str())
            .map(str::to_string)
    }
}

const GEMINI_SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini `generateContent`. Gemini has no system role inside `contents`, so
/// the persona travels as the opening user turn.
pub struct GeminiWire;

impl WireFormat for GeminiWire {
    fn prepare(
        &self,
        selection: &ProviderSelection,
        transcript: &[Message],
        params: &GenerationParameters,
    ) -> PreparedRequest {
        let contents: Vec<Value> = transcript
            .iter()
            .map(|m| {
                let role = match m.role() {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content() }] })
            })
            .collect();
        let safety: Vec<Value> = GEMINI_SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_ONLY_HIGH" }))
            .collect();
        PreparedRequest {
            url: format!(
                "{}/models/{}:generateContent",
                selection.base_url.trim_end_matches('/'),
                selection.config.model
            ),
            headers: vec![("x-goog-api-key", selection.config.api_key.clone())],
            bearer: None,
            body: json!({
                "contents": contents,
                "safetySettings": safety,
                "generationConfig": {
                    "temperature": params.temperature,
                    "maxOutputTokens": params.max_output_tokens,
                    "topP": params.top_p,
                    "stopSequences": params.stop,
                }
            }),
        }
    }

    fn extract(&self, body: &Value) -> Option<String> {
        let parts = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|cand| cand.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.as_array())?;
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();
        Some(text)
    }
}

/// Anthropic Messages API. System text goes in the dedicated `system` field and
/// `messages` must open with a user turn, so assistant turns ahead of the first
/// user turn are folded into the system prompt.
pub struct AnthropicWire;

impl WireFormat for AnthropicWire {
    fn prepare(
        &self,
        selection: &ProviderSelection,
        transcript: &[Message],
        params: &GenerationParameters,
    ) -> PreparedRequest {
        let mut system_prompt = String::new();
        let mut messages = Vec::new();
        for msg in transcript {
            let leading = messages.is_empty();
            match msg.role() {
                Role::System => push_paragraph(&mut system_prompt, msg.content()),
                Role::Assistant if leading => push_paragraph(&mut system_prompt, msg.content()),
                role => messages.push(json!({
                    "role": role.as_str(),
                    "content": [{ "type": "text", "text": msg.content() }],
                })),
            }
        }

        let mut body = json!({
            "model": selection.config.model,
            "max_tokens": params.max_output_tokens,
            "system": system_prompt,
            "messages": messages,
            "temperature": params.temperature,
            "top_p": params.top_p,
        });
        if !params.stop.is_empty() {
            body["stop_sequences"] = json!(params.stop);
        }

        PreparedRequest {
            url: format!("{}/v1/messages", selection.base_url.trim_end_matches('/')),
            headers: vec![
                ("x-api-key", selection.config.api_key.clone()),
                ("anthropic-version", "2023-06-01".to_string()),
            ],
            bearer: None,
            body,
        }
    }

    fn extract(&self, body: &Value) -> Option<String> {
        let blocks = body.get("content").and_then(|c| c.as_array())?;
        let text: String = blocks
            .iter()
            .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect();
        Some(text)
    }
}

fn push_paragraph(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(text);
}

/// Default factory: one pooled HTTP client shared by every remote client.
pub struct HttpProviderFactory {
    http: Client,
}

impl HttpProviderFactory {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(45))
            .user_agent("Ola-Core/0.1")
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self { http })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn client_for(&self, selection: ProviderSelection) -> Arc<dyn ProviderClient> {
        let http = self.http.clone();
        match selection.kind() {
            ProviderKind::Groq => Arc::new(GroqClient::new(http, selection, GroqWire)),
            ProviderKind::Gemini => Arc::new(GeminiClient::new(http, selection, GeminiWire)),
            ProviderKind::Anthropic => {
                Arc::new(AnthropicClient::new(http, selection, AnthropicWire))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::config::ProviderConfig;

    fn selection(kind: ProviderKind, base_url: &str) -> ProviderSelection {
        ProviderSelection {
            seed: kind.seed(),
            config: ProviderConfig {
                api_key: "secret".into(),
                model: "test-model".into(),
            },
            base_url: base_url.to_string(),
        }
    }

    fn conversation() -> Conversation {
        Conversation::from(vec![
            Message::user("what is a lifetime?"),
            Message::assistant("a region of code"),
            Message::user("fix this bug"),
        ])
    }

    #[test]
    fn transcript_orders_persona_priming_history_then_user() {
        let transcript = compose_transcript("persona", &conversation());
        let roles: Vec<Role> = transcript.iter().map(Message::role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::Assistant, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(transcript[1].content(), PRIMING_MESSAGE);
        assert_eq!(transcript.last().map(Message::content), Some("fix this bug"));
    }

    #[test]
    fn transcript_keeps_a_single_system_turn() {
        let mut convo = conversation();
        convo.push(Message::system("smuggled"));
        let transcript = compose_transcript("persona", &convo);
        let systems = transcript.iter().filter(|m| m.role() == Role::System).count();
        assert_eq!(systems, 1);
    }

    #[test]
    fn groq_request_uses_chat_completions_shape() {
        let sel = selection(ProviderKind::Groq, "https://api.groq.com/openai/v1/");
        let transcript = compose_transcript("persona", &conversation());
        let req = GroqWire.prepare(&sel, &transcript, &sel.seed.params);
        assert_eq!(req.url, "https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(req.bearer.as_deref(), Some("secret"));
        assert_eq!(req.body["messages"].as_array().unwrap().len(), 5);
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert_eq!(req.body["stop"], Value::Null);
        assert_eq!(req.body["stream"], false);
    }

    #[test]
    fn gemini_maps_roles_and_safety_settings() {
        let sel = selection(ProviderKind::Gemini, "https://example.test/v1beta");
        let transcript = compose_transcript("persona", &conversation());
        let req = GeminiWire.prepare(&sel, &transcript, &sel.seed.params);
        assert_eq!(req.url, "https://example.test/v1beta/models/test-model:generateContent");
        let roles: Vec<&str> = req.body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user", "model", "user"]);
        assert_eq!(req.body["safetySettings"].as_array().unwrap().len(), 4);
        assert!(req.headers.iter().any(|(name, _)| *name == "x-goog-api-key"));
    }

    #[test]
    fn anthropic_opens_with_user_and_uses_system_field() {
        let sel = selection(ProviderKind::Anthropic, "https://api.anthropic.com");
        let transcript = compose_transcript("persona", &conversation());
        let req = AnthropicWire.prepare(&sel, &transcript, &sel.seed.params);
        let system = req.body["system"].as_str().unwrap();
        assert!(system.starts_with("persona"));
        assert!(system.contains(PRIMING_MESSAGE));
        let messages = req.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[2]["content"][0]["text"], "fix this bug");
        assert!(req.body.get("stop_sequences").is_none());
    }

    #[test]
    fn extraction_reads_each_backend_shape() {
        let groq = json!({ "choices": [{ "message": { "content": "hi" } }] });
        assert_eq!(GroqWire.extract(&groq).as_deref(), Some("hi"));

        let gemini = json!({ "candidates": [{ "content": { "parts": [{ "text": "a" }, { "text": "b" }] } }] });
        assert_eq!(GeminiWire.extract(&gemini).as_deref(), Some("ab"));

        let anthropic = json!({ "content": [{ "type": "text", "text": "yo" }, { "type": "tool_use" }] });
        assert_eq!(AnthropicWire.extract(&anthropic).as_deref(), Some("yo"));

        assert_eq!(GeminiWire.extract(&json!({ "promptFeedback": {} })), None);
    }

    #[tokio::test]
    async fn transport_failure_becomes_generation_failed_without_touching_input() {
        let factory = HttpProviderFactory::new().unwrap();
        let client = factory.client_for(selection(ProviderKind::Groq, "http://127.0.0.1:9"));
        let convo = conversation();
        let before = convo.clone();
        let err = client
            .generate(&convo, &ProviderKind::Groq.seed().params)
            .await
            .unwrap_err();
        assert_eq!(err.message, "Groq request failed");
        assert_eq!(convo, before);
    }
}
