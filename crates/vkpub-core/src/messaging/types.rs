use crate::domain::{ChatId, UserId};

/// Transport-agnostic inbound update.
///
/// The Telegram adapter converts raw updates into this shape; everything else in the
/// bot only sees these types.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Text(TextMessage),
    Video(VideoMessage),
    /// Any attachment that is neither a video nor a video document.
    Unsupported(Sender),
    Callback(CallbackQuery),
}

impl IncomingUpdate {
    pub fn sender(&self) -> &Sender {
        match self {
            IncomingUpdate::Command(c) => &c.from,
            IncomingUpdate::Text(t) => &t.from,
            IncomingUpdate::Video(v) => &v.from,
            IncomingUpdate::Unsupported(s) => s,
            IncomingUpdate::Callback(q) => &q.from,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Command {
    pub from: Sender,
    pub name: String,
    pub args: String,
}

impl Command {
    /// Parse `/cmd@botname args` into a lower-cased name and trimmed args.
    pub fn parse(from: Sender, text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim().to_string();
        let name = first
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some(Self { from, name, args })
    }
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub from: Sender,
    pub text: String,
}

/// An inbound video attachment.
#[derive(Clone, Debug)]
pub struct VideoMessage {
    pub from: Sender,
    /// Transport handle used to download the bytes.
    pub file_id: String,
    /// Stable content identifier; identical for re-sends of the same file.
    pub unique_id: String,
    /// Duration reported by the transport, if any.
    pub duration_secs: Option<u32>,
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub from: Sender,
    pub callback_id: String,
    pub data: String,
}

/// Inline keyboard, one button per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    pub fn single_url(label: &str, url: &str) -> Self {
        Self::new(vec![InlineButton {
            label: label.to_string(),
            action: ButtonAction::Url(url.to_string()),
        }])
    }

    /// One callback button per `(label, data)` pair.
    pub fn callbacks<I, L, D>(items: I) -> Self
    where
        I: IntoIterator<Item = (L, D)>,
        L: Into<String>,
        D: Into<String>,
    {
        Self::new(
            items
                .into_iter()
                .map(|(label, data)| InlineButton {
                    label: label.into(),
                    action: ButtonAction::Callback(data.into()),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Sender {
        Sender {
            chat_id: ChatId(1),
            user_id: UserId(1),
            username: None,
        }
    }

    #[test]
    fn command_parse_strips_bot_suffix() {
        let cmd = Command::parse(sender(), "/Upload@my_bot  now ").unwrap();
        assert_eq!(cmd.name, "upload");
        assert_eq!(cmd.args, "now");
    }

    #[test]
    fn command_parse_rejects_plain_text() {
        assert!(Command::parse(sender(), "hello").is_none());
        assert!(Command::parse(sender(), "/").is_none());
    }
}
