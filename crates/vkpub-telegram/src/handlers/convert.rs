use teloxide::types::{CallbackQuery, Message};

use vkpub_core::{
    domain::{ChatId, UserId},
    messaging::types::{
        CallbackQuery as CoreCallback, Command, IncomingUpdate, Sender, TextMessage,
        VideoMessage,
    },
};

pub fn is_video_mime(mime: Option<&str>) -> bool {
    mime.is_some_and(|m| m.trim().to_ascii_lowercase().starts_with("video/"))
}

fn sender(msg: &Message) -> Option<Sender> {
    let user = msg.from()?;
    Some(Sender {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
    })
}

fn has_other_attachment(msg: &Message) -> bool {
    msg.photo().is_some()
        || msg.audio().is_some()
        || msg.voice().is_some()
        || msg.animation().is_some()
        || msg.sticker().is_some()
        || msg.video_note().is_some()
}

/// `None` for service messages and anything without a sender.
pub fn message_update(msg: &Message) -> Option<IncomingUpdate> {
    let from = sender(msg)?;

    if let Some(text) = msg.text() {
        return Some(match Command::parse(from.clone(), text) {
            Some(cmd) => IncomingUpdate::Command(cmd),
            None => IncomingUpdate::Text(TextMessage {
                from,
                text: text.to_string(),
            }),
        });
    }

    if let Some(video) = msg.video() {
        return Some(IncomingUpdate::Video(VideoMessage {
            from,
            file_id: video.file.id.clone(),
            unique_id: video.file.unique_id.clone(),
            duration_secs: Some(video.duration),
            mime_type: video.mime_type.as_ref().map(|m| m.to_string()),
        }));
    }

    if let Some(doc) = msg.document() {
        let mime = doc.mime_type.as_ref().map(|m| m.to_string());
        if !is_video_mime(mime.as_deref()) {
            return Some(IncomingUpdate::Unsupported(from));
        }
        // Documents carry no duration; the acquirer probes it.
        return Some(IncomingUpdate::Video(VideoMessage {
            from,
            file_id: doc.file.id.clone(),
            unique_id: doc.file.unique_id.clone(),
            duration_secs: None,
            mime_type: mime,
        }));
    }

    has_other_attachment(msg).then_some(IncomingUpdate::Unsupported(from))
}

pub fn callback_update(q: &CallbackQuery) -> Option<IncomingUpdate> {
    let chat = q.message.as_ref()?.chat.id;
    let data = q.data.clone().filter(|d| !d.is_empty())?;
    Some(IncomingUpdate::Callback(CoreCallback {
        from: Sender {
            chat_id: ChatId(chat.0),
            user_id: UserId(q.from.id.0 as i64),
            username: q.from.username.clone(),
        },
        callback_id: q.id.clone(),
        data,
    }))
}
