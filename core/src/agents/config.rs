use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::providers::{ProviderKind, ProviderSeed, PROVIDER_SEEDS};
use crate::errors::OlaError;
use crate::logging;
use crate::settings::{SettingsStore, HISTORY_BUDGET_KEY, SELECTED_PROVIDER_KEY};

#[derive(Debug, Clone, Serialize)]
pub struct AiProviderInfo {
    pub id: String,
    pub kind: ProviderKind,
    pub display_name: String,
    pub description: String,
    pub base_url: String,
    pub model: Option<String>,
    pub has_credentials: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiSettingsSnapshot {
    pub active_provider: Option<String>,
    pub history_max_tokens: Option<usize>,
    pub providers: Vec<AiProviderInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiSettingsUpdate {
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub select: bool,
}

/// Credentials for one provider family, read lazily at selection time.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
}

impl ProviderConfig {
    pub fn is_usable(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.model.trim().is_empty()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Everything a client needs to reach the selected backend.
#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub seed: &'static ProviderSeed,
    pub config: ProviderConfig,
    pub base_url: String,
}

impl ProviderSelection {
    pub fn kind(&self) -> ProviderKind {
        self.seed.kind
    }
}

/// Resolve the provider named by `ola.provider` and validate its credentials.
/// There is no fallback to other families: an unusable selection fails the turn.
pub fn resolve_selection(settings: &SettingsStore) -> Result<ProviderSelection, OlaError> {
    let name = settings
        .get(SELECTED_PROVIDER_KEY, "")
        .map_err(OlaError::storage)?;
    if name.trim().is_empty() {
        return Err(OlaError::configuration("Ola", "no provider selected"));
    }
    let kind = ProviderKind::from_setting(&name)
        .ok_or_else(|| OlaError::configuration(name.trim(), "unknown provider"))?;
    select(settings, kind)
}

pub fn select(settings: &SettingsStore, kind: ProviderKind) -> Result<ProviderSelection, OlaError> {
    let seed = kind.seed();
    let config = load_provider_config(settings, seed)?;
    if !config.is_usable() {
        let missing = match (config.api_key.trim().is_empty(), config.model.trim().is_empty()) {
            (true, true) => "API key and model are empty",
            (true, false) => "API key is empty",
            _ => "model is empty",
        };
        return Err(OlaError::configuration(seed.display, missing));
    }
    let base_url = settings
        .get(seed.base_url_setting, seed.base_url)
        .map_err(OlaError::storage)?;
    Ok(ProviderSelection {
        seed,
        config,
        base_url,
    })
}

fn load_provider_config(
    settings: &SettingsStore,
    seed: &ProviderSeed,
) -> Result<ProviderConfig, OlaError> {
    let stored_key = settings
        .get(seed.api_key_setting, "")
        .map_err(OlaError::storage)?;
    let api_key = if stored_key.is_empty() {
        stored_key
    } else {
        decode_secret(&stored_key)
            .map_err(|err| OlaError::configuration(seed.display, err.to_string()))?
    };
    let model = settings
        .get(seed.model_setting, "")
        .map_err(OlaError::storage)?;
    Ok(ProviderConfig { api_key, model })
}

/// Positive `ola.history.maxTokens` enables replay truncation.
pub fn history_budget(settings: &SettingsStore) -> Result<Option<usize>> {
    let raw = settings.get(HISTORY_BUDGET_KEY, "")?;
    Ok(raw.trim().parse::<usize>().ok().filter(|budget| *budget > 0))
}

pub fn list_providers(settings: &SettingsStore) -> Result<Vec<AiProviderInfo>> {
    PROVIDER_SEEDS
        .iter()
        .map(|seed| {
            let model = settings
                .get_optional(seed.model_setting)?
                .filter(|m| !m.trim().is_empty());
            let has_credentials = settings
                .get_optional(seed.api_key_setting)?
                .map(|k| !k.is_empty())
                .unwrap_or(false);
            Ok(AiProviderInfo {
                id: seed.id.to_string(),
                kind: seed.kind,
                display_name: seed.display.to_string(),
                description: seed.description.to_string(),
                base_url: settings.get(seed.base_url_setting, seed.base_url)?,
                model,
                has_credentials,
            })
        })
        .collect()
}

pub fn settings_snapshot(settings: &SettingsStore) -> Result<AiSettingsSnapshot> {
    let active_provider = settings
        .get_optional(SELECTED_PROVIDER_KEY)?
        .filter(|p| !p.trim().is_empty());
    Ok(AiSettingsSnapshot {
        active_provider,
        history_max_tokens: history_budget(settings)?,
        providers: list_providers(settings)?,
    })
}

pub fn update_settings(
    settings: &SettingsStore,
    update: AiSettingsUpdate,
) -> Result<AiSettingsSnapshot> {
    let kind = ProviderKind::from_setting(&update.provider)
        .ok_or_else(|| anyhow!("Unknown AI provider: {}", update.provider))?;
    let seed = kind.seed();

    if let Some(api_key) = update.api_key {
        let trimmed = api_key.trim();
        if trimmed.is_empty() {
            settings.remove(seed.api_key_setting)?;
        } else {
            settings.set(seed.api_key_setting, &B64_ENGINE.encode(trimmed.as_bytes()))?;
        }
    }
    if let Some(model) = update.model {
        settings.set(seed.model_setting, model.trim())?;
    }
    if let Some(base_url) = update.base_url {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            settings.remove(seed.base_url_setting)?;
        } else {
            settings.set(seed.base_url_setting, trimmed)?;
        }
    }
    if update.select {
        settings.set(SELECTED_PROVIDER_KEY, seed.display)?;
    }

    logging::record(
        &settings.pool(),
        "info",
        Some("AI-0001"),
        "ai.settings",
        "AI settings updated",
        Some(json!({ "provider": seed.id, "selected": update.select })),
    );
    settings_snapshot(settings)
}

fn decode_secret(stored: &str) -> Result<String> {
    let decoded = B64_ENGINE
        .decode(stored.as_bytes())
        .map_err(|_| anyhow!("Failed to decode stored credential"))?;
    String::from_utf8(decoded).map_err(|_| anyhow!("Stored credential was not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    fn settings() -> SettingsStore {
        SettingsStore::new(init_in_memory().unwrap())
    }

    fn configure(settings: &SettingsStore, provider: &str, key: &str, model: &str) {
        update_settings(
            settings,
            AiSettingsUpdate {
                provider: provider.into(),
                model: Some(model.into()),
                api_key: Some(key.into()),
                base_url: None,
                select: true,
            },
        )
        .unwrap();
    }

    #[test]
    fn nothing_selected_is_a_configuration_error() {
        let err = resolve_selection(&settings()).unwrap_err();
        assert_eq!(err.code(), "CFG-1001");
    }

    #[test]
    fn unknown_provider_name_is_a_configuration_error() {
        let settings = settings();
        settings.set(SELECTED_PROVIDER_KEY, "OpenAI").unwrap();
        let err = resolve_selection(&settings).unwrap_err();
        assert!(matches!(err, OlaError::Configuration { ref provider, .. } if provider == "OpenAI"));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let settings = settings();
        settings.set(SELECTED_PROVIDER_KEY, "Groq").unwrap();
        settings.set("groq.model", "llama3-70b-8192").unwrap();
        let err = resolve_selection(&settings).unwrap_err();
        assert!(err.to_string().contains("API key is empty"));
    }

    #[test]
    fn missing_model_is_rejected() {
        let settings = settings();
        configure(&settings, "Anthropic", "sk-ant", "");
        let err = resolve_selection(&settings).unwrap_err();
        assert!(err.to_string().contains("model is empty"));
    }

    #[test]
    fn stored_keys_round_trip_through_encoding() {
        let settings = settings();
        configure(&settings, "Gemini", "  AIza-secret ", "gemini-1.5-pro");
        let raw = settings.get("gemini.apiKey", "").unwrap();
        assert_ne!(raw, "AIza-secret");

        let selection = resolve_selection(&settings).unwrap();
        assert_eq!(selection.kind(), ProviderKind::Gemini);
        assert_eq!(selection.config.api_key, "AIza-secret");
        assert_eq!(selection.base_url, "https://generativelanguage.googleapis.com/v1beta");
    }

    #[test]
    fn corrupt_secret_is_a_configuration_error() {
        let settings = settings();
        settings.set(SELECTED_PROVIDER_KEY, "Groq").unwrap();
        settings.set("groq.apiKey", "%%%not-base64%%%").unwrap();
        settings.set("groq.model", "llama3").unwrap();
        assert_eq!(resolve_selection(&settings).unwrap_err().code(), "CFG-1001");
    }

    #[test]
    fn snapshot_never_exposes_keys() {
        let settings = settings();
        configure(&settings, "Groq", "gsk-live", "llama3-70b-8192");
        let snapshot = settings_snapshot(&settings).unwrap();
        assert_eq!(snapshot.active_provider.as_deref(), Some("Groq"));
        let groq = snapshot.providers.iter().find(|p| p.id == "groq").unwrap();
        assert!(groq.has_credentials);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("gsk-live"));
    }

    #[test]
    fn empty_key_update_clears_credentials() {
        let settings = settings();
        configure(&settings, "Groq", "gsk-live", "llama3");
        configure(&settings, "Groq", "  ", "llama3");
        let groq = list_providers(&settings)
            .unwrap()
            .into_iter()
            .find(|p| p.id == "groq")
            .unwrap();
        assert!(!groq.has_credentials);
    }

    #[test]
    fn history_budget_ignores_zero_and_garbage() {
        let settings = settings();
        assert_eq!(history_budget(&settings).unwrap(), None);
        settings.set(HISTORY_BUDGET_KEY, "0").unwrap();
        assert_eq!(history_budget(&settings).unwrap(), None);
        settings.set(HISTORY_BUDGET_KEY, "lots").unwrap();
        assert_eq!(history_budget(&settings).unwrap(), None);
        settings.set(HISTORY_BUDGET_KEY, "2048").unwrap();
        assert_eq!(history_budget(&settings).unwrap(), Some(2048));
    }
}
