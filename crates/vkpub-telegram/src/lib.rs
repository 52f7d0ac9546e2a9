//! Telegram adapter (teloxide).
//!
//! Implements the `vkpub-core` MessagingPort and MediaSource over the Telegram Bot API.

use std::path::Path;

use async_trait::async_trait;

use teloxide::{
    net::Download,
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
};

use tokio::{io::AsyncWriteExt, time::sleep};

pub mod handlers;
pub mod router;

use vkpub_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ButtonAction, InlineKeyboard},
    },
    ports::MediaSource,
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    async fn with_retry<T, Fut>(&self, op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        with_retry(op).await
    }
}

fn map_err(e: teloxide::RequestError) -> Error {
    Error::External(format!("telegram error: {e}"))
}

/// Retry once on a 429 `RetryAfter`; every other error is returned as is.
async fn with_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                attempts += 1;
                sleep(d).await;
            }
            Err(other) => return Err(map_err(other)),
        }
    }
}

/// One button per row; URL buttons need a parseable absolute URL.
pub fn keyboard_markup(keyboard: InlineKeyboard) -> Result<InlineKeyboardMarkup> {
    let rows = keyboard
        .buttons
        .into_iter()
        .map(|b| {
            let button = match b.action {
                ButtonAction::Callback(data) => InlineKeyboardButton::callback(b.label, data),
                ButtonAction::Url(raw) => {
                    let url = url::Url::parse(&raw)
                        .map_err(|e| Error::InvalidInput(format!("bad button url: {e}")))?;
                    InlineKeyboardButton::url(b.label, url)
                }
            };
            Ok(vec![button])
        })
        .collect::<Result<Vec<Vec<InlineKeyboardButton>>>>()?;
    Ok(InlineKeyboardMarkup::new(rows))
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = keyboard_markup(keyboard)?;

        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), text.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

/// Downloads chat attachments through the Bot API file endpoint.
#[derive(Clone)]
pub struct TelegramMediaSource {
    bot: Bot,
}

impl TelegramMediaSource {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MediaSource for TelegramMediaSource {
    async fn download(&self, file_id: &str, dest: &Path) -> Result<()> {
        let file = with_retry(|| self.bot.get_file(file_id.to_string())).await?;

        let mut dst = tokio::fs::File::create(dest).await?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| Error::External(format!("telegram download error: {e}")))?;
        dst.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkpub_core::messaging::types::InlineButton;

    #[test]
    fn keyboard_has_one_button_per_row() {
        let kb = InlineKeyboard::callbacks([("club", "channel_1"), ("other", "channel_2")]);
        let markup = keyboard_markup(kb).unwrap();
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert!(markup.inline_keyboard.iter().all(|row| row.len() == 1));
        assert_eq!(markup.inline_keyboard[1][0].text, "other");
    }

    #[test]
    fn url_buttons_are_validated() {
        let ok = InlineKeyboard::single_url("Authorize", "https://id.vk.com/authorize?x=1");
        assert!(keyboard_markup(ok).is_ok());

        let bad = InlineKeyboard::new(vec![InlineButton {
            label: "x".to_string(),
            action: ButtonAction::Url("not a url".to_string()),
        }]);
        assert!(matches!(keyboard_markup(bad), Err(Error::InvalidInput(_))));
    }
}
