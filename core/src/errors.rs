use thiserror::Error;

use crate::agents::GenerationFailed;

#[derive(Debug, Error)]
pub enum OlaError {
    #[error("{provider} is not configured: {detail}")]
    Configuration { provider: String, detail: String },
    #[error(transparent)]
    Generation(#[from] GenerationFailed),
    #[error("Presentation surface unavailable: {0}")]
    Delivery(String),
    #[error("Storage unavailable: {0}")]
    Storage(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl OlaError {
    pub fn configuration(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Configuration {
            provider: provider.into(),
            detail: detail.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CFG-1001",
            Self::Generation(_) => "GEN-1001",
            Self::Delivery(_) => "DLV-1001",
            Self::Storage(_) => "DB-1001",
            Self::InvalidInput(_) => "INP-1001",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => {
                "The selected provider is missing an API key or model name."
            }
            Self::Generation(_) => "The provider failed to produce a usable response.",
            Self::Delivery(_) => "No chat panel was available to render the message.",
            Self::Storage(_) => "The application could not access the SQLite database.",
            Self::InvalidInput(_) => "The request was empty or malformed.",
        }
    }

    /// Text shown in the chat panel. Backend detail stays in the logs.
    pub fn user_notice(&self) -> String {
        match self {
            Self::Configuration { .. } => "Configuration not found. Go to settings, search for Your coding buddy. Fill up the model and model name".to_string(),
            Self::Generation(_) => "Model not responding, please resend your question".to_string(),
            Self::Delivery(_) | Self::Storage(_) => {
                "Failed to generate content. Please try again later.".to_string()
            }
            Self::InvalidInput(detail) => detail.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn codes_are_stable_per_kind() {
        assert_eq!(OlaError::configuration("Groq", "missing key").code(), "CFG-1001");
        let failed = GenerationFailed::new("boom", anyhow!("io"));
        assert_eq!(OlaError::from(failed).code(), "GEN-1001");
        assert_eq!(OlaError::Delivery("x".into()).code(), "DLV-1001");
    }

    #[test]
    fn generation_notice_hides_backend_detail() {
        let failed = GenerationFailed::new("groq returned 500", anyhow!("upstream body"));
        let notice = OlaError::from(failed).user_notice();
        assert!(notice.contains("resend your question"));
        assert!(!notice.contains("500"));
    }
}
