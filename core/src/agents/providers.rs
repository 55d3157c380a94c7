//! Static catalogue of the supported provider families.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Gemini,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Groq, Self::Gemini, Self::Anthropic];

    /// Matches the display name stored under `ola.provider`, ignoring case.
    pub fn from_setting(value: &str) -> Option<Self> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.seed().display.eq_ignore_ascii_case(wanted))
    }

    pub fn seed(&self) -> &'static ProviderSeed {
        match self {
            Self::Groq => &PROVIDER_SEEDS[0],
            Self::Gemini => &PROVIDER_SEEDS[1],
            Self::Anthropic => &PROVIDER_SEEDS[2],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.seed().display)
    }
}

/// Tuning constants per provider family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParameters {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub stop: &'static [&'static str],
}

#[derive(Debug)]
pub struct ProviderSeed {
    pub kind: ProviderKind,
    pub id: &'static str,
    pub display: &'static str,
    pub description: &'static str,
    pub api_key_setting: &'static str,
    pub model_setting: &'static str,
    pub base_url_setting: &'static str,
    pub base_url: &'static str,
    pub intro: &'static str,
    pub params: GenerationParameters,
}

impl ProviderSeed {
    /// Fixed system preamble sent ahead of every request.
    pub fn persona(&self) -> String {
        format!("{} {}", self.intro, PERSONA_BODY)
    }
}

const PERSONA_BODY: &str = "You help developers write better code more efficiently. \
Analyse the code or context you are given and work out what the developer is trying to achieve. \
Suggest code that is relevant, efficient and idiomatic for the language, framework and libraries in use. \
Explain the important parts of every suggestion so the developer understands it. \
When asked to debug, point out likely causes and propose concrete fixes. \
Recommend improvements to performance, readability or maintainability where they apply, \
offer alternatives when several approaches are valid, and ask for clarification when requirements are unclear.";

/// Canned assistant turn that follows the persona on every request.
pub const PRIMING_MESSAGE: &str = "Feel free to share a code snippet or describe the problem you're working on, and I'll do my best to help you.";

pub static PROVIDER_SEEDS: [ProviderSeed; 3] = [
    ProviderSeed {
        kind: ProviderKind::Groq,
        id: "groq",
        display: "Groq",
        description: "OpenAI-compatible chat completions served by Groq",
        api_key_setting: "groq.apiKey",
        model_setting: "groq.model",
        base_url_setting: "groq.baseUrl",
        base_url: "https://api.groq.com/openai/v1",
        intro: "You are Ola, an AI coding assistant running on Groq.",
        params: GenerationParameters {
            temperature: 0.1,
            max_output_tokens: 5024,
            top_p: 1.0,
            stop: &[],
        },
    },
    ProviderSeed {
        kind: ProviderKind::Gemini,
        id: "gemini",
        display: "Gemini",
        description: "Google Gemini multi-turn generateContent API",
        api_key_setting: "gemini.apiKey",
        model_setting: "gemini.model",
        base_url_setting: "gemini.baseUrl",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        intro: "You are Ola, an AI coding assistant powered by Gemini.",
        params: GenerationParameters {
            temperature: 0.2,
            max_output_tokens: 8192,
            top_p: 0.95,
            stop: &[],
        },
    },
    ProviderSeed {
        kind: ProviderKind::Anthropic,
        id: "anthropic",
        display: "Anthropic",
        description: "Anthropic Messages API",
        api_key_setting: "anthropic.apiKey",
        model_setting: "anthropic.model",
        base_url_setting: "anthropic.baseUrl",
        base_url: "https://api.anthropic.com",
        intro: "You are Ola, an AI coding assistant powered by Claude.",
        params: GenerationParameters {
            temperature: 0.2,
            max_output_tokens: 1024,
            top_p: 1.0,
            stop: &[],
        },
    },
];
