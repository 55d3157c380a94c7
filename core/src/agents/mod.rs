pub mod clients;
pub mod config;
pub mod providers;

pub use clients::{
    AnthropicClient, GeminiClient, GenerationFailed, GroqClient, HttpProviderFactory,
    ProviderClient, ProviderFactory,
};
pub use config::{AiProviderInfo, AiSettingsSnapshot, ProviderConfig, ProviderSelection};
pub use providers::{GenerationParameters, ProviderKind};
