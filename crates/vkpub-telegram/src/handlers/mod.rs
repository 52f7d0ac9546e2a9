//! Telegram update handlers.
//!
//! Each handler converts the raw update into a core `IncomingUpdate` and hands it to
//! the conversation service under the chat's lock.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::debug;

use crate::router::AppState;

mod convert;

pub use convert::{callback_update, is_video_mime, message_update};

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(update) = callback_update(&q) else {
        // Nothing to route; still stop the client's spinner.
        let _ = bot.answer_callback_query(q.id).await;
        return Ok(());
    };
    let _guard = state.chat_locks.lock_chat(update.sender().chat_id.0).await;
    state.app.handle(update).await;
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(update) = message_update(&msg) else {
        debug!("ignoring message {} in chat {}", msg.id.0, msg.chat.id.0);
        return Ok(());
    };
    let _guard = state.chat_locks.lock_chat(msg.chat.id.0).await;
    state.app.handle(update).await;
    Ok(())
}
