//! Version 1 of the Tauri IPC API.
//!
//! Commands are thin wrappers: they resolve the session scope, hand the work
//! to the orchestrator or the settings layer, and return JSON-friendly
//! payloads. Chat answers reach the panel through the `chat://message` event;
//! the command result only reports how the turn ended.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tauri::{async_runtime::spawn_blocking, AppHandle, Emitter, State};
use time::OffsetDateTime;

use crate::agents::config::{self, AiSettingsUpdate};
use crate::channel::{PresentationSurface, TurnOrigin, UiMessage};
use crate::chat_orchestrator::{ChatOrchestrator, TurnReport};
use crate::conversation::Message;
use crate::db::DbPool;
use crate::errors::OlaError;
use crate::quick_fix::{CommentRequest, QuickFixRequest};
use crate::session_store::SessionScope;
use crate::settings::SettingsStore;

pub const CHAT_EVENT: &str = "chat://message";

/// Shared state injected into each Tauri command handler.
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub chat: Arc<ChatOrchestrator>,
    pub default_scope: SessionScope,
}

impl ApiState {
    fn scope(&self, workspace: Option<&str>) -> SessionScope {
        match workspace.map(str::trim).filter(|w| !w.is_empty()) {
            Some(path) => SessionScope::for_workspace(Path::new(path)),
            None => self.default_scope.clone(),
        }
    }
}

/// Emits outbound chat messages to every webview of the app.
pub struct TauriSurface {
    app: AppHandle,
}

impl TauriSurface {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl PresentationSurface for TauriSurface {
    fn post(&self, message: &UiMessage) -> Result<(), OlaError> {
        self.app
            .emit(CHAT_EVENT, message)
            .map_err(|e| OlaError::Delivery(e.to_string()))
    }
}

#[derive(Serialize)]
pub struct ChatTurnView {
    pub delivered: bool,
    pub response: Option<String>,
    pub error_code: Option<&'static str>,
    pub notice: Option<String>,
}

impl From<TurnReport> for ChatTurnView {
    fn from(report: TurnReport) -> Self {
        match report.outcome {
            Ok(response) => Self {
                delivered: true,
                response: Some(response),
                error_code: None,
                notice: None,
            },
            Err(err) => Self {
                delivered: false,
                response: None,
                error_code: Some(err.code()),
                notice: Some(err.user_notice()),
            },
        }
    }
}

/// Simple health-check endpoint for UI components.
#[tauri::command]
pub fn ping() -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "ts": OffsetDateTime::now_utc().unix_timestamp(),
    })
}

#[derive(Deserialize)]
pub struct ChatSendInput {
    pub workspace: Option<String>,
    #[serde(flatten)]
    pub message: UiMessage,
}

/// Handle a `{type: "user-input", message}` object typed into the panel.
#[tauri::command]
pub async fn chat_send(
    state: State<'_, ApiState>,
    input: ChatSendInput,
) -> Result<ChatTurnView, String> {
    let scope = state.scope(input.workspace.as_deref());
    Ok(state.chat.handle_inbound(&scope, input.message).await.into())
}

#[tauri::command]
pub async fn chat_history(
    state: State<'_, ApiState>,
    workspace: Option<String>,
) -> Result<Vec<Message>, String> {
    let scope = state.scope(workspace.as_deref());
    state
        .chat
        .history(&scope)
        .await
        .map(|conversation| conversation.messages().to_vec())
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn chat_reset(
    state: State<'_, ApiState>,
    workspace: Option<String>,
) -> Result<usize, String> {
    let scope = state.scope(workspace.as_deref());
    state.chat.reset(&scope).await.map_err(|e| e.to_string())
}

#[derive(Deserialize)]
pub struct QuickFixInput {
    pub workspace: Option<String>,
    #[serde(flatten)]
    pub request: QuickFixRequest,
}

/// Ask for a fix for an editor diagnostic.
#[tauri::command]
pub async fn chat_quick_fix(
    state: State<'_, ApiState>,
    input: QuickFixInput,
) -> Result<ChatTurnView, String> {
    let scope = state.scope(input.workspace.as_deref());
    let prompt = input.request.into_prompt().map_err(|e| e.to_string())?;
    Ok(state
        .chat
        .handle_user_input(&scope, &prompt, TurnOrigin::Command)
        .await
        .into())
}

#[derive(Deserialize)]
pub struct CommentCodeInput {
    pub workspace: Option<String>,
    #[serde(flatten)]
    pub request: CommentRequest,
}

#[tauri::command]
pub async fn chat_comment_code(
    state: State<'_, ApiState>,
    input: CommentCodeInput,
) -> Result<ChatTurnView, String> {
    let scope = state.scope(input.workspace.as_deref());
    let prompt = input.request.into_prompt().map_err(|e| e.to_string())?;
    Ok(state
        .chat
        .handle_user_input(&scope, &prompt, TurnOrigin::Command)
        .await
        .into())
}

/// List available AI providers via a blocking thread pool.
#[tauri::command]
pub async fn ai_list_providers(
    state: State<'_, ApiState>,
) -> Result<Vec<config::AiProviderInfo>, String> {
    let settings = SettingsStore::new(state.db.clone());
    spawn_blocking(move || config::list_providers(&settings).map_err(|e| e.to_string()))
        .await
        .map_err(|e| e.to_string())?
}

/// Fetch the current AI settings snapshot via a blocking thread pool.
#[tauri::command]
pub async fn ai_get_settings(
    state: State<'_, ApiState>,
) -> Result<config::AiSettingsSnapshot, String> {
    let settings = SettingsStore::new(state.db.clone());
    spawn_blocking(move || config::settings_snapshot(&settings).map_err(|e| e.to_string()))
        .await
        .map_err(|e| e.to_string())?
}

/// Update provider credentials, model or selection from the UI.
#[tauri::command]
pub async fn ai_update_settings(
    state: State<'_, ApiState>,
    input: AiSettingsUpdate,
) -> Result<config::AiSettingsSnapshot, String> {
    let settings = SettingsStore::new(state.db.clone());
    spawn_blocking(move || config::update_settings(&settings, input).map_err(|e| e.to_string()))
        .await
        .map_err(|e| e.to_string())?
}
