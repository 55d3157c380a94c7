//! Core library for the Ola coding assistant.
//!
//! The crate owns everything between the chat panel and the remote model:
//! - [`agents`] holds the provider catalogue, credential resolution and the
//!   HTTP clients for each backend family.
//! - [`chat_orchestrator`] runs a turn end to end and owns its state machine.
//! - [`session_store`] persists per-workspace history in SQLite.
//! - [`channel`] defines the `{type, message}` protocol with the panel.
//! - [`settings`] is the key/value configuration store.
//! - [`quick_fix`] turns diagnostics and selections into prompts.
//! - [`errors`] and [`logging`] carry the error catalogue and the event log.
//! - [`api`] (feature `desktop`) exposes the Tauri IPC commands.

pub mod agents;
#[cfg(feature = "desktop")]
pub mod api;
pub mod channel;
pub mod chat_orchestrator;
pub mod conversation;
pub mod db;
pub mod errors;
pub mod logging;
pub mod quick_fix;
pub mod session_store;
pub mod settings;

pub use chat_orchestrator::{ChatOrchestrator, TurnReport, TurnState};
pub use errors::OlaError;
