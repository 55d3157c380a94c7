//! Message protocol between the orchestrator and the chat panel.
//!
//! Delivery is fire-and-forget: when no panel is attached, or the panel
//! rejects a message, the failure is logged and the turn carries on.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::errors::OlaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "user-input")]
    UserInput,
    #[serde(rename = "bot-response")]
    BotResponse,
}

/// `{type, message}` object exchanged with the panel in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub message: String,
}

impl UiMessage {
    pub fn user_input(message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::UserInput,
            message: message.into(),
        }
    }

    pub fn bot_response(message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::BotResponse,
            message: message.into(),
        }
    }

    /// Accept only inbound `user-input` messages; the panel never sends bot
    /// responses.
    pub fn into_user_input(self) -> Result<String, OlaError> {
        match self.kind {
            MessageKind::UserInput => Ok(self.message),
            MessageKind::BotResponse => Err(OlaError::InvalidInput(
                "inbound messages must be of type user-input".to_string(),
            )),
        }
    }
}

/// Where a user turn came from. Panel input is already on screen; command
/// input (selection, quick fix) is echoed before the answer arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOrigin {
    Panel,
    Command,
}

impl TurnOrigin {
    pub fn echoes_input(&self) -> bool {
        matches!(self, Self::Command)
    }
}

pub trait PresentationSurface: Send + Sync {
    fn post(&self, message: &UiMessage) -> Result<(), OlaError>;
}

/// Outbound half of the channel. The surface can be attached and detached as
/// panels open and close.
#[derive(Clone, Default)]
pub struct UiChannel {
    surface: Arc<RwLock<Option<Arc<dyn PresentationSurface>>>>,
}

impl UiChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(surface: Arc<dyn PresentationSurface>) -> Self {
        let channel = Self::new();
        channel.attach(surface);
        channel
    }

    pub fn attach(&self, surface: Arc<dyn PresentationSurface>) {
        match self.surface.write() {
            Ok(mut slot) => *slot = Some(surface),
            Err(poisoned) => *poisoned.into_inner() = Some(surface),
        }
    }

    pub fn detach(&self) {
        match self.surface.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn current(&self) -> Option<Arc<dyn PresentationSurface>> {
        match self.surface.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Deliver `message`, reporting whether it reached a surface. Failures are
    /// logged and never escalated.
    pub fn send(&self, message: UiMessage) -> bool {
        let Some(surface) = self.current() else {
            log::warn!("dropping {:?} message, no chat panel attached", message.kind);
            return false;
        };
        match surface.post(&message) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("{}: {err}", err.code());
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Surface that keeps everything it is sent.
    #[derive(Default)]
    pub struct RecordingSurface {
        pub sent: Mutex<Vec<UiMessage>>,
    }

    impl RecordingSurface {
        pub fn messages(&self) -> Vec<UiMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl PresentationSurface for RecordingSurface {
        fn post(&self, message: &UiMessage) -> Result<(), OlaError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    pub struct ClosedSurface;

    impl PresentationSurface for ClosedSurface {
        fn post(&self, _message: &UiMessage) -> Result<(), OlaError> {
            Err(OlaError::Delivery("webview disposed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ClosedSurface, RecordingSurface};
    use super::*;

    #[test]
    fn wire_format_uses_type_and_message() {
        let json = serde_json::to_string(&UiMessage::bot_response("done")).unwrap();
        assert_eq!(json, r#"{"type":"bot-response","message":"done"}"#);

        let inbound: UiMessage =
            serde_json::from_str(r#"{"type":"user-input","message":"explain this"}"#).unwrap();
        assert_eq!(inbound.into_user_input().unwrap(), "explain this");
    }

    #[test]
    fn inbound_bot_responses_are_rejected() {
        let err = UiMessage::bot_response("spoof").into_user_input().unwrap_err();
        assert_eq!(err.code(), "INP-1001");
    }

    #[test]
    fn send_without_surface_is_swallowed() {
        let channel = UiChannel::new();
        assert!(!channel.send(UiMessage::bot_response("lost")));
    }

    #[test]
    fn failing_surface_is_swallowed() {
        let channel = UiChannel::attached(Arc::new(ClosedSurface));
        assert!(!channel.send(UiMessage::bot_response("lost")));
    }

    #[test]
    fn detach_stops_delivery() {
        let surface = Arc::new(RecordingSurface::default());
        let channel = UiChannel::attached(surface.clone());
        assert!(channel.send(UiMessage::user_input("one")));
        channel.detach();
        assert!(!channel.send(UiMessage::user_input("two")));
        assert_eq!(surface.messages(), vec![UiMessage::user_input("one")]);
    }
}
