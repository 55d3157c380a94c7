//! Turn driver that connects the chat panel, settings, the selected provider
//! and the session store.
//!
//! Each turn walks `Idle → AwaitingProvider → Generating → Delivering → Idle`,
//! or detours through `ErrorRecovery` when the provider cannot be selected or
//! fails. Turns for the same scope are serialised behind a FIFO lock, so a
//! message arriving mid-generation waits for the previous round to be
//! committed before it reads history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use crate::agents::config;
use crate::agents::ProviderFactory;
use crate::channel::{TurnOrigin, UiChannel, UiMessage};
use crate::conversation::{Conversation, Message};
use crate::db::DbPool;
use crate::errors::OlaError;
use crate::logging;
use crate::session_store::{trim_to_budget, PendingTurn, SessionScope, SessionStore};
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnState {
    Idle,
    AwaitingProvider,
    Generating,
    Delivering,
    ErrorRecovery,
}

impl TurnState {
    pub fn can_advance_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Idle, AwaitingProvider)
                | (AwaitingProvider, Generating)
                | (AwaitingProvider, ErrorRecovery)
                | (Generating, Delivering)
                | (Generating, ErrorRecovery)
                | (Delivering, Idle)
                | (Delivering, ErrorRecovery)
                | (ErrorRecovery, Idle)
        )
    }
}

/// Result of one turn plus the states it passed through.
#[derive(Debug)]
pub struct TurnReport {
    pub outcome: Result<String, OlaError>,
    pub trail: Vec<TurnState>,
}

impl TurnReport {
    pub fn response(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }
}

struct TurnTrace<'a> {
    scope: &'a SessionScope,
    trail: Vec<TurnState>,
}

impl<'a> TurnTrace<'a> {
    fn start(scope: &'a SessionScope) -> Self {
        Self {
            scope,
            trail: vec![TurnState::Idle],
        }
    }

    fn current(&self) -> TurnState {
        self.trail.last().copied().unwrap_or(TurnState::Idle)
    }

    fn advance(&mut self, next: TurnState) {
        let from = self.current();
        debug_assert!(from.can_advance_to(next), "illegal turn transition {from:?} -> {next:?}");
        log::debug!("turn[{}] {:?} -> {:?}", self.scope.key(), from, next);
        self.trail.push(next);
    }

    fn finish(self, outcome: Result<String, OlaError>) -> TurnReport {
        TurnReport {
            outcome,
            trail: self.trail,
        }
    }
}

pub struct ChatOrchestrator {
    pool: DbPool,
    settings: SettingsStore,
    sessions: SessionStore,
    providers: Arc<dyn ProviderFactory>,
    channel: UiChannel,
    scope_locks: StdMutex<HashMap<SessionScope, Arc<Mutex<()>>>>,
}

impl ChatOrchestrator {
    pub fn new(pool: DbPool, providers: Arc<dyn ProviderFactory>, channel: UiChannel) -> Arc<Self> {
        Arc::new(Self {
            settings: SettingsStore::new(pool.clone()),
            sessions: SessionStore::new(pool.clone()),
            pool,
            providers,
            channel,
            scope_locks: StdMutex::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn channel(&self) -> &UiChannel {
        &self.channel
    }

    /// Entry point for `{type: "user-input"}` messages from the chat panel.
    pub async fn handle_inbound(&self, scope: &SessionScope, message: UiMessage) -> TurnReport {
        match message.into_user_input() {
            Ok(text) => self.handle_user_input(scope, &text, TurnOrigin::Panel).await,
            Err(err) => TurnTrace::start(scope).finish(Err(err)),
        }
    }

    /// Run one full turn. Never panics on provider, storage or delivery
    /// failures; they are reported through [`TurnReport::outcome`].
    pub async fn handle_user_input(
        &self,
        scope: &SessionScope,
        text: &str,
        origin: TurnOrigin,
    ) -> TurnReport {
        let mut trace = TurnTrace::start(scope);
        if text.trim().is_empty() {
            return trace.finish(Err(OlaError::InvalidInput("message is empty".into())));
        }

        let lock = self.scope_lock(scope);
        let _turn = lock.lock().await;

        trace.advance(TurnState::AwaitingProvider);
        if origin.echoes_input() {
            self.deliver(scope, UiMessage::user_input(text)).await;
        }

        let settings = self.settings.clone();
        let sessions = self.sessions.clone();
        let history_scope = scope.clone();
        let prepared = run_blocking(move || {
            let selection = config::resolve_selection(&settings)?;
            let budget = config::history_budget(&settings).map_err(OlaError::storage)?;
            let history = sessions
                .history(&history_scope)
                .map_err(OlaError::storage)?;
            Ok((selection, budget, history))
        })
        .await;
        let (selection, budget, history) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.recover(trace, err, false).await,
        };

        trace.advance(TurnState::Generating);
        let provider_id = selection.seed.id;
        let params = selection.seed.params;
        let replay = match budget {
            Some(limit) => trim_to_budget(&history, limit),
            None => history,
        };
        let pending = PendingTurn::new(Message::user(text));
        let request: Conversation = replay.with(pending.user().clone());
        let client = self.providers.client_for(selection);
        let reply = match client.generate(&request, &params).await {
            Ok(reply) => reply,
            Err(failed) => {
                log::error!(
                    "{provider_id} generation failed: {}: {:#}",
                    failed.message,
                    failed.cause
                );
                return self.recover(trace, failed.into(), true).await;
            }
        };

        trace.advance(TurnState::Delivering);
        let turn = pending.complete(reply.clone());
        let sessions = self.sessions.clone();
        let commit_scope = scope.clone();
        let committed =
            run_blocking(move || sessions.commit_turn(&commit_scope, &turn).map_err(OlaError::storage))
                .await;
        if let Err(err) = committed {
            return self.recover(trace, err, false).await;
        }

        self.deliver(scope, UiMessage::bot_response(reply.clone())).await;
        trace.advance(TurnState::Idle);
        self.audit(
            "info",
            "AI-0200",
            "AI chat turn delivered",
            json!({ "provider": provider_id, "scope": scope.key(), "chars": reply.len() }),
        )
        .await;
        trace.finish(Ok(reply))
    }

    pub async fn history(&self, scope: &SessionScope) -> Result<Conversation, OlaError> {
        let sessions = self.sessions.clone();
        let scope = scope.clone();
        run_blocking(move || sessions.history(&scope).map_err(OlaError::storage)).await
    }

    /// Clear a scope once any in-flight turn for it has finished.
    pub async fn reset(&self, scope: &SessionScope) -> Result<usize, OlaError> {
        let lock = self.scope_lock(scope);
        let _turn = lock.lock().await;
        let sessions = self.sessions.clone();
        let reset_scope = scope.clone();
        run_blocking(move || sessions.reset(&reset_scope).map_err(OlaError::storage)).await
    }

    async fn recover(
        &self,
        mut trace: TurnTrace<'_>,
        err: OlaError,
        reset_session: bool,
    ) -> TurnReport {
        trace.advance(TurnState::ErrorRecovery);
        let scope = trace.scope.clone();

        if reset_session {
            let sessions = self.sessions.clone();
            let reset_scope = scope.clone();
            match run_blocking(move || sessions.reset(&reset_scope).map_err(OlaError::storage))
                .await
            {
                Ok(removed) => log::info!("session {} reset, {removed} messages dropped", scope.key()),
                Err(reset_err) => log::error!("session {} reset failed: {reset_err}", scope.key()),
            }
        }

        log::warn!("{}: {err}", err.code());
        self.audit(
            "warn",
            err.code(),
            err.explain(),
            json!({ "scope": scope.key(), "error": err.to_string(), "reset": reset_session }),
        )
        .await;

        self.deliver(&scope, UiMessage::bot_response(err.user_notice())).await;
        trace.advance(TurnState::Idle);
        trace.finish(Err(err))
    }

    /// Send to the panel. A message that never reaches it is audited; the
    /// turn itself is not affected.
    async fn deliver(&self, scope: &SessionScope, message: UiMessage) {
        let kind = message.kind;
        if !self.channel.send(message) {
            self.audit(
                "warn",
                "DLV-1001",
                "chat panel did not receive a message",
                json!({ "scope": scope.key(), "kind": kind }),
            )
            .await;
        }
    }

    async fn audit(&self, level: &'static str, code: &'static str, message: &'static str, data: serde_json::Value) {
        let pool = self.pool.clone();
        let written = spawn_blocking(move || {
            logging::record(&pool, level, Some(code), "ai.runtime", message, Some(data))
        })
        .await;
        if let Err(err) = written {
            log::warn!("audit task for {code} did not complete: {err}");
        }
    }

    /// Lock for `scope`. Entries nobody holds or waits on are dropped first,
    /// so idle scopes do not accumulate.
    fn scope_lock(&self, scope: &SessionScope) -> Arc<Mutex<()>> {
        let mut locks = self
            .scope_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(scope.clone()).or_default().clone()
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, OlaError>
where
    F: FnOnce() -> Result<T, OlaError> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(work).await.map_err(OlaError::storage)?
}
