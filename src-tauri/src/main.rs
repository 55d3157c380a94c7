use std::path::PathBuf;
use std::sync::Arc;

use directories::ProjectDirs;
use ola_core::agents::HttpProviderFactory;
use ola_core::api::v1::{self, ApiState, TauriSurface};
use ola_core::channel::UiChannel;
use ola_core::db::init_db;
use ola_core::session_store::SessionScope;
use ola_core::ChatOrchestrator;
use tauri::Manager;

fn data_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "Ola", "Ola") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("Ola")
    }
}

fn main() {
    tauri::Builder::default()
        .setup(|app| {
            let db = init_db(data_dir())?;
            let providers = HttpProviderFactory::new()?;
            let channel = UiChannel::attached(Arc::new(TauriSurface::new(app.handle().clone())));
            let chat = ChatOrchestrator::new(db.clone(), Arc::new(providers), channel);

            // Sessions live for one run of the app.
            let purged = chat.sessions().purge_all()?;
            log::info!("cleared {purged} messages from previous sessions");

            let workspace = std::env::current_dir().unwrap_or_else(|_| data_dir());
            app.manage(ApiState {
                db,
                chat,
                default_scope: SessionScope::for_workspace(&workspace),
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            v1::ping,
            v1::chat_send,
            v1::chat_history,
            v1::chat_reset,
            v1::chat_quick_fix,
            v1::chat_comment_code,
            v1::ai_list_providers,
            v1::ai_get_settings,
            v1::ai_update_settings
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
