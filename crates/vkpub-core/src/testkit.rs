//! In-memory port implementations shared by unit tests.

use std::{
    collections::HashMap,
    path::Path,
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{
        ChatId, Destination, GroupId, MessageId, MessageRef, NewDestination, Operator,
        RefreshableOperator, TokenSet, UserId,
    },
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    ports::{IdentityProvider, Store, UploadSlot, VideoPlatform},
    Result,
};

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<(ChatId, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    keyboards: Mutex<Vec<(ChatId, String, InlineKeyboard)>>,
    answered: Mutex<Vec<String>>,
}

impl FakeMessenger {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        }
    }

    pub fn sent_html(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn last_html(&self) -> Option<String> {
        self.sent_html().pop()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn keyboards(&self) -> Vec<(ChatId, String, InlineKeyboard)> {
        self.keyboards.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sends.lock().unwrap().push((chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.deleted.lock().unwrap().push(msg);
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.keyboards
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), keyboard));
        Ok(self.alloc(chat_id))
    }

    async fn answer_callback_query(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    operators: Mutex<HashMap<UserId, Operator>>,
    destinations: Mutex<Vec<Destination>>,
    pub fail_writes: bool,
    /// Deletes match no rows, as if another handler removed the group first.
    pub lose_delete_race: bool,
}

impl MemoryStore {
    pub fn with_admin(user_id: UserId, username: &str) -> Self {
        let store = Self::default();
        store.operators.lock().unwrap().insert(
            user_id,
            Operator {
                user_id,
                username: Some(username.to_string()),
                is_admin: true,
                access_token: Some("tok".to_string()),
                refresh_token: Some("ref".to_string()),
                id_token: None,
                device_id: Some("dev".to_string()),
            },
        );
        store
    }

    pub fn add_destination(&self, group_id: i64, name: &str, description: &str) {
        let mut dests = self.destinations.lock().unwrap();
        let internal_id = dests.len() as i64 + 1;
        dests.push(Destination {
            internal_id,
            name: name.to_string(),
            link: format!("https://vk.com/{name}"),
            group_id: GroupId(group_id),
            description: description.to_string(),
        });
    }

    pub fn snapshot(&self) -> Vec<Operator> {
        let mut ops: Vec<Operator> = self.operators.lock().unwrap().values().cloned().collect();
        ops.sort_by_key(|o| o.user_id.0);
        ops
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Persistence("disk full".to_string()));
        }
        Ok(())
    }

    fn set_admin(&self, username: &str, value: bool) -> Result<()> {
        self.check_write()?;
        let mut ops = self.operators.lock().unwrap();
        let mut touched = 0;
        for op in ops.values_mut() {
            if op.username.as_deref() == Some(username) {
                op.is_admin = value;
                touched += 1;
            }
        }
        if touched == 0 {
            return Err(Error::NotFound(username.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ensure_operator(&self, user_id: UserId, username: Option<&str>) -> Result<()> {
        self.check_write()?;
        self.operators
            .lock()
            .unwrap()
            .entry(user_id)
            .or_insert_with(|| Operator {
                user_id,
                username: username.map(str::to_string),
                is_admin: false,
                access_token: None,
                refresh_token: None,
                id_token: None,
                device_id: None,
            });
        Ok(())
    }

    async fn operator(&self, user_id: UserId) -> Result<Option<Operator>> {
        Ok(self.operators.lock().unwrap().get(&user_id).cloned())
    }

    async fn is_admin(&self, user_id: UserId) -> Result<bool> {
        Ok(self
            .operators
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|o| o.is_admin)
            .unwrap_or(false))
    }

    async fn grant_admin(&self, username: &str) -> Result<()> {
        self.set_admin(username, true)
    }

    async fn revoke_admin(&self, username: &str) -> Result<()> {
        self.set_admin(username, false)
    }

    async fn set_tokens(
        &self,
        user_id: UserId,
        tokens: &TokenSet,
        device_id: &str,
    ) -> Result<()> {
        self.check_write()?;
        if let Some(op) = self.operators.lock().unwrap().get_mut(&user_id) {
            op.access_token = Some(tokens.access_token.clone());
            op.refresh_token = Some(tokens.refresh_token.clone());
            op.id_token = tokens.id_token.clone();
            op.device_id = Some(device_id.to_string());
        }
        Ok(())
    }

    async fn update_tokens(
        &self,
        user_id: UserId,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<()> {
        self.check_write()?;
        if let Some(op) = self.operators.lock().unwrap().get_mut(&user_id) {
            op.access_token = Some(access_token.to_string());
            op.refresh_token = Some(refresh_token.to_string());
        }
        Ok(())
    }

    async fn access_token(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self
            .operators
            .lock()
            .unwrap()
            .get(&user_id)
            .and_then(|o| o.access_token.clone()))
    }

    async fn refreshable_operators(&self) -> Result<Vec<RefreshableOperator>> {
        let mut out: Vec<RefreshableOperator> = self
            .operators
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.is_admin)
            .filter_map(|o| {
                Some(RefreshableOperator {
                    user_id: o.user_id,
                    refresh_token: o.refresh_token.clone()?,
                    device_id: o.device_id.clone()?,
                })
            })
            .collect();
        out.sort_by_key(|o| o.user_id.0);
        Ok(out)
    }

    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        Ok(self.destinations.lock().unwrap().clone())
    }

    async fn destination(&self, group_id: GroupId) -> Result<Option<Destination>> {
        Ok(self
            .destinations
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.group_id == group_id)
            .cloned())
    }

    async fn save_destination(&self, dest: &NewDestination, description: &str) -> Result<()> {
        self.check_write()?;
        let mut dests = self.destinations.lock().unwrap();
        let internal_id = dests.len() as i64 + 1;
        dests.push(Destination {
            internal_id,
            name: dest.name.clone(),
            link: dest.link.clone(),
            group_id: dest.group_id,
            description: description.to_string(),
        });
        Ok(())
    }

    async fn delete_destination(&self, group_id: GroupId) -> Result<bool> {
        self.check_write()?;
        if self.lose_delete_race {
            return Ok(false);
        }
        let mut dests = self.destinations.lock().unwrap();
        let before = dests.len();
        dests.retain(|d| d.group_id != group_id);
        Ok(dests.len() != before)
    }

    async fn update_description(&self, group_id: GroupId, description: &str) -> Result<bool> {
        self.check_write()?;
        let mut dests = self.destinations.lock().unwrap();
        match dests.iter_mut().find(|d| d.group_id == group_id) {
            Some(d) => {
                d.description = description.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct FakePlatform {
    pub calls: Mutex<Vec<String>>,
    pub fail_reserve: bool,
    pub fail_upload: bool,
    pub fail_post: bool,
    /// screen name -> numeric id
    pub groups: HashMap<String, i64>,
}

impl FakePlatform {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VideoPlatform for FakePlatform {
    async fn resolve_group(&self, screen_name: &str, _access_token: &str) -> Result<GroupId> {
        self.record(format!("resolve:{screen_name}"));
        self.groups
            .get(screen_name)
            .copied()
            .map(GroupId)
            .ok_or_else(|| Error::Lookup(screen_name.to_string()))
    }

    async fn check_token(&self, access_token: &str) -> Result<bool> {
        Ok(access_token == "tok")
    }

    async fn reserve_upload(
        &self,
        group_id: GroupId,
        title: &str,
        _description: &str,
        access_token: &str,
    ) -> Result<UploadSlot> {
        self.record(format!("reserve:{}:{title}:{access_token}", group_id.0));
        if self.fail_reserve {
            return Err(Error::Reservation("missing upload_url".to_string()));
        }
        Ok(UploadSlot {
            upload_url: "https://upload.example/put".to_string(),
            video_id: 555,
        })
    }

    async fn upload_video(&self, _upload_url: &str, path: &Path) -> Result<()> {
        self.record(format!("upload:{}", path.display()));
        if self.fail_upload {
            return Err(Error::Upload("HTTP 500".to_string()));
        }
        Ok(())
    }

    async fn wall_post(&self, group_id: GroupId, video_id: i64, access_token: &str) -> Result<()> {
        let owner = group_id.owner_id();
        self.record(format!("post:{owner}:video{owner}_{video_id}:{access_token}"));
        if self.fail_post {
            return Err(Error::Post("HTTP 500".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    /// Refresh tokens that fail to refresh.
    pub broken: Vec<String>,
    pub reject_codes: bool,
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn exchange_code(
        &self,
        code: &str,
        device_id: &str,
        _code_verifier: &str,
    ) -> Result<TokenSet> {
        if self.reject_codes {
            return Err(Error::AuthExchange("invalid_grant".to_string()));
        }
        Ok(TokenSet {
            access_token: format!("access-{code}-{device_id}"),
            refresh_token: format!("refresh-{code}"),
            id_token: Some("id".to_string()),
        })
    }

    async fn refresh(&self, refresh_token: &str, _device_id: &str) -> Result<(String, String)> {
        if self.broken.iter().any(|b| b == refresh_token) {
            return Err(Error::AuthExchange("invalid refresh token".to_string()));
        }
        Ok((
            format!("{refresh_token}-access2"),
            format!("{refresh_token}-refresh2"),
        ))
    }
}
