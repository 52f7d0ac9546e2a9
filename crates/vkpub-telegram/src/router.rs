use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::BotCommand};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use vkpub_core::conversation::App;

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Serializes update handling per chat.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Command menu shown by Telegram clients.
pub fn bot_commands() -> Vec<BotCommand> {
    [
        ("start", "Start the bot"),
        ("get_access_token", "Authorize with VK"),
        ("add_group", "Add a VK group"),
        ("delete_group", "Delete a VK group"),
        ("edit_group_description", "Edit a group description"),
        ("upload", "Schedule videos for publishing"),
        ("add_admin", "Grant admin rights"),
        ("remove_admin", "Revoke admin rights"),
        ("cancel", "Cancel the current action"),
    ]
    .into_iter()
    .map(|(cmd, desc)| BotCommand::new(cmd, desc))
    .collect()
}

/// Long-poll until Ctrl-C.
pub async fn run_polling(bot: Bot, app: Arc<App>) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!("vkpub started: @{}", me.username()),
        Err(e) => warn!("get_me failed: {e}"),
    }
    if let Err(e) = bot.set_my_commands(bot_commands()).await {
        warn!("failed to register command menu: {e}");
    }

    let state = Arc::new(AppState {
        app,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn menu_lists_every_command() {
        let names: Vec<String> = bot_commands().into_iter().map(|c| c.command).collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&"upload".to_string()));
        assert!(names.contains(&"cancel".to_string()));
    }

    #[tokio::test]
    async fn chat_lock_serializes_same_chat() {
        let locks = Arc::new(ChatLocks::default());
        let guard = locks.lock_chat(1).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock_chat(1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different chat is not blocked.
        let _g2 = locks.lock_chat(2).await;

        drop(guard);
        waiter.await.unwrap();
    }
}
