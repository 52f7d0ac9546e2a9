/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Numeric id of a community on the remote platform (positive).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(pub i64);

impl GroupId {
    /// Owner id used by wall/video APIs (communities are negative owners).
    pub fn owner_id(self) -> i64 {
        -self.0
    }
}

/// Operator record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
    pub user_id: UserId,
    pub username: Option<String>,
    pub is_admin: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub device_id: Option<String>,
}

/// Token set returned by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: Option<String>,
}

/// A managed community that videos are published to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub internal_id: i64,
    pub name: String,
    pub link: String,
    pub group_id: GroupId,
    pub description: String,
}

/// Destination fields collected by the add-destination flow, before persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDestination {
    pub name: String,
    pub link: String,
    pub group_id: GroupId,
}

/// Operator that owns a refresh token (housekeeping view).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshableOperator {
    pub user_id: UserId,
    pub refresh_token: String,
    pub device_id: String,
}
