//! The operator-facing workflow: command routing, per-state text handling, media
//! collection and dispatch of completed plans to the scheduler.

use std::{path::PathBuf, sync::Arc, sync::OnceLock, time::Duration};

use chrono::DateTime;
use chrono_tz::Tz;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    domain::{ChatId, GroupId, MessageRef, NewDestination, UserId},
    errors::Error,
    formatting::{destination_link, escape_html, short_datetime},
    media::MediaAcquirer,
    messaging::{
        port::MessagingPort,
        types::{CallbackQuery, Command, IncomingUpdate, InlineKeyboard, Sender, TextMessage, VideoMessage},
    },
    pkce::{parse_redirect, PkceRequest},
    plan::{completion_wait, PlanProgress, PublishPlan, COMPLETION_LEAD},
    ports::{IdentityProvider, Store, VideoPlatform},
    publish_time::{parse_future_publish_time, PublishTimeError},
    publisher::Publisher,
    scheduler::JobScheduler,
    session::{Dialogue, SessionKey, Sessions, UploadStep},
    tokens::{refresh_all, RefreshReport},
    Result,
};

const NO_ACCESS: &str = "Sorry, you don't have access to this bot.";
const TIME_FORMAT_HINT: &str =
    "Enter the publish time as <code>DD HH:MM</code> or <code>HH:MM</code> (today).";

pub type Clock = Arc<dyn Fn() -> DateTime<Tz> + Send + Sync>;

/// Callback prefixes used by the inline keyboards.
const CHOOSE_PREFIX: &str = "channel_";
const DELETE_PREFIX: &str = "delete_";
const EDIT_PREFIX: &str = "edit_";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CallbackAction {
    Choose,
    Delete,
    Edit,
}

fn parse_callback(data: &str) -> Option<(CallbackAction, GroupId)> {
    let (action, rest) = if let Some(rest) = data.strip_prefix(CHOOSE_PREFIX) {
        (CallbackAction::Choose, rest)
    } else if let Some(rest) = data.strip_prefix(DELETE_PREFIX) {
        (CallbackAction::Delete, rest)
    } else if let Some(rest) = data.strip_prefix(EDIT_PREFIX) {
        (CallbackAction::Edit, rest)
    } else {
        return None;
    };
    rest.parse::<i64>().ok().map(|id| (action, GroupId(id)))
}

fn group_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"vk\.com/([A-Za-z0-9_.]+)").expect("valid regex"))
}

/// Extract the community screen name from a link like `https://vk.com/club_name`.
pub fn screen_name_from_link(link: &str) -> Option<String> {
    group_link_re()
        .captures(link.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
}

/// Positive integer, nothing else.
pub fn parse_count(input: &str) -> Option<u32> {
    let input = input.trim();
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    input.parse::<u32>().ok().filter(|n| *n > 0)
}

fn normalize_username(input: &str) -> String {
    input.trim().trim_start_matches('@').to_string()
}

fn key(from: &Sender) -> SessionKey {
    SessionKey {
        chat_id: from.chat_id,
        user_id: from.user_id,
    }
}

/// Collaborators the workflow is built from.
pub struct AppDeps {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub messenger: Arc<dyn MessagingPort>,
    pub platform: Arc<dyn VideoPlatform>,
    pub identity: Arc<dyn IdentityProvider>,
    pub acquirer: Arc<MediaAcquirer>,
    pub scheduler: JobScheduler,
}

pub struct App {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    messenger: Arc<dyn MessagingPort>,
    platform: Arc<dyn VideoPlatform>,
    identity: Arc<dyn IdentityProvider>,
    acquirer: Arc<MediaAcquirer>,
    scheduler: JobScheduler,
    publisher: Publisher,
    sessions: Sessions,
    clock: Clock,
}

impl App {
    pub fn new(deps: AppDeps) -> Self {
        let publisher = Publisher::new(
            deps.platform.clone(),
            deps.store.clone(),
            deps.messenger.clone(),
        )
        .with_claims(deps.acquirer.claims().clone());
        let scheduler = deps.scheduler.clone();
        Self {
            config: deps.config,
            store: deps.store,
            messenger: deps.messenger,
            platform: deps.platform,
            identity: deps.identity,
            acquirer: deps.acquirer,
            scheduler: deps.scheduler,
            publisher,
            sessions: Sessions::default(),
            clock: Arc::new(move || scheduler.now()),
        }
    }

    /// Replace the wall clock used for time validation and the completion wait.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// Conversation boundary: every error ends up as a chat message.
    pub async fn handle(&self, update: IncomingUpdate) {
        let from = update.sender().clone();
        if let Err(e) = self.route(update).await {
            warn!("update from chat {} failed: {e}", from.chat_id.0);
            self.say(from.chat_id, &escape_html(&e.user_message())).await;
        }
    }

    async fn route(&self, update: IncomingUpdate) -> Result<()> {
        if let IncomingUpdate::Command(cmd) = &update {
            if cmd.name == "start" {
                return self.cmd_start(&cmd.from).await;
            }
        }

        let from = update.sender().clone();
        if !self.store.is_admin(from.user_id).await? {
            // Only explicit requests get a refusal; other traffic is dropped.
            match &update {
                IncomingUpdate::Command(_) => {
                    self.say(from.chat_id, NO_ACCESS).await;
                }
                IncomingUpdate::Callback(q) => {
                    self.answer(&q.callback_id).await;
                    self.say(from.chat_id, NO_ACCESS).await;
                }
                _ => debug!("ignoring non-admin message from {}", from.user_id.0),
            }
            return Ok(());
        }

        match update {
            IncomingUpdate::Command(cmd) => self.on_command(cmd).await,
            IncomingUpdate::Text(msg) => self.on_text(msg).await,
            IncomingUpdate::Video(video) => self.on_video(video).await,
            IncomingUpdate::Unsupported(from) => self.on_unsupported(from).await,
            IncomingUpdate::Callback(q) => self.on_callback(q).await,
        }
    }

    async fn say(&self, chat_id: ChatId, html: &str) -> Option<MessageRef> {
        match self.messenger.send_html(chat_id, html).await {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("send to chat {} failed: {e}", chat_id.0);
                None
            }
        }
    }

    async fn answer(&self, callback_id: &str) {
        if let Err(e) = self.messenger.answer_callback_query(callback_id, None).await {
            warn!("answer callback failed: {e}");
        }
    }

    /// Install a dialogue, discarding media staged by the one it replaces.
    async fn begin(&self, key: SessionKey, dialogue: Dialogue) {
        if let Some(prev) = self.sessions.set(key, dialogue).await {
            self.acquirer.claims().discard(&prev.staged_media()).await;
        }
    }

    // ---------------- commands ----------------

    async fn cmd_start(&self, from: &Sender) -> Result<()> {
        self.store
            .ensure_operator(from.user_id, from.username.as_deref())
            .await?;
        if let Some(name) = from.username.as_deref() {
            if self
                .config
                .bootstrap_admins
                .iter()
                .any(|a| a.eq_ignore_ascii_case(name))
            {
                self.store.grant_admin(name).await?;
            }
        }

        let text = if self.store.is_admin(from.user_id).await? {
            "Hi! You are an administrator. Use the menu to manage groups and publish videos."
        } else {
            "Hi! You don't have access to this bot's features."
        };
        self.say(from.chat_id, text).await;
        Ok(())
    }

    async fn on_command(&self, cmd: Command) -> Result<()> {
        let chat = cmd.from.chat_id;
        let key = key(&cmd.from);
        match cmd.name.as_str() {
            "get_access_token" => {
                if !self.config.oauth_configured() {
                    return Err(Error::Config("CLIENT_ID is not configured".to_string()));
                }
                let req = PkceRequest::new(
                    &self.config.client_id,
                    &self.config.redirect_url,
                    &self.config.oauth_scope,
                )?;
                let mut prompt = String::new();
                if self.token_is_valid(cmd.from.user_id).await {
                    prompt.push_str("Your current token is still valid; authorizing again replaces it.\n\n");
                }
                prompt.push_str(
                    "Open the link, allow access, then paste the full address of the page you land on.",
                );
                self.messenger
                    .send_inline_keyboard(
                        chat,
                        &prompt,
                        InlineKeyboard::single_url("Authorize", &req.url),
                    )
                    .await?;
                self.begin(
                    key,
                    Dialogue::AwaitingRedirect {
                        verifier: req.verifier,
                        state: req.state,
                    },
                )
                .await;
            }
            "add_group" => {
                self.begin(key, Dialogue::AwaitingGroupLink).await;
                self.say(chat, "Send the group link, e.g. <code>https://vk.com/example</code>.")
                    .await;
            }
            "delete_group" => {
                let prompt = "Choose a group to delete:";
                self.destination_menu(chat, DELETE_PREFIX, prompt, "No groups to delete.")
                    .await?;
            }
            "edit_group_description" => {
                let prompt = "Choose a group to edit:";
                self.destination_menu(chat, EDIT_PREFIX, prompt, "No groups to edit.")
                    .await?;
            }
            "upload" => {
                let shown = self
                    .destination_menu(
                        chat,
                        CHOOSE_PREFIX,
                        "Choose a group to publish to:",
                        "No groups yet. Add one with /add_group.",
                    )
                    .await?;
                if shown {
                    self.begin(key, Dialogue::Upload(UploadStep::ChoosingDestination))
                        .await;
                }
            }
            "add_admin" => {
                self.begin(key, Dialogue::AwaitingAdminGrant).await;
                self.say(chat, "Send the username to make an administrator.").await;
            }
            "remove_admin" => {
                self.begin(key, Dialogue::AwaitingAdminRevoke).await;
                self.say(chat, "Send the username to remove from administrators.")
                    .await;
            }
            "cancel" => {
                let text = match self.sessions.clear(key).await {
                    Some(prev) => {
                        self.acquirer.claims().discard(&prev.staged_media()).await;
                        "Cancelled."
                    }
                    None => "Nothing to cancel.",
                };
                self.say(chat, text).await;
            }
            other => {
                info!("unknown command /{other}");
                self.say(chat, "Unknown command. Use the menu to see what I can do.")
                    .await;
            }
        }
        Ok(())
    }

    async fn token_is_valid(&self, user_id: UserId) -> bool {
        let token = match self.store.access_token(user_id).await {
            Ok(Some(t)) if !t.is_empty() => t,
            Ok(_) => return false,
            Err(e) => {
                warn!("token lookup failed: {e}");
                return false;
            }
        };
        match self.platform.check_token(&token).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!("token check failed: {e}");
                false
            }
        }
    }

    /// Send a keyboard with one button per destination. Returns false when there are none.
    async fn destination_menu(
        &self,
        chat: ChatId,
        prefix: &str,
        prompt: &str,
        empty: &str,
    ) -> Result<bool> {
        let dests = self.store.list_destinations().await?;
        if dests.is_empty() {
            self.say(chat, empty).await;
            return Ok(false);
        }
        let keyboard = InlineKeyboard::callbacks(
            dests
                .iter()
                .map(|d| (d.name.clone(), format!("{prefix}{}", d.group_id.0))),
        );
        self.messenger
            .send_inline_keyboard(chat, prompt, keyboard)
            .await?;
        Ok(true)
    }

    // ---------------- callbacks ----------------

    async fn on_callback(&self, q: CallbackQuery) -> Result<()> {
        self.answer(&q.callback_id).await;
        let chat = q.from.chat_id;
        let key = key(&q.from);

        let Some((action, group_id)) = parse_callback(&q.data) else {
            warn!("unrecognized callback data {:?}", q.data);
            return Ok(());
        };
        let Some(dest) = self.store.destination(group_id).await? else {
            self.say(chat, "This group no longer exists.").await;
            return Ok(());
        };

        match action {
            CallbackAction::Choose => {
                if !matches!(
                    self.sessions.get(key).await,
                    Some(Dialogue::Upload(UploadStep::ChoosingDestination))
                ) {
                    self.say(chat, "This menu has expired. Start again with /upload.")
                        .await;
                    return Ok(());
                }
                let text = format!(
                    "Publishing to {}. How many videos?",
                    destination_link(&dest)
                );
                self.sessions
                    .set(
                        key,
                        Dialogue::Upload(UploadStep::SpecifyingCount { destination: dest }),
                    )
                    .await;
                self.say(chat, &text).await;
            }
            CallbackAction::Delete => {
                let text = if self.store.delete_destination(group_id).await? {
                    info!("destination {} deleted", group_id.0);
                    format!("Group <b>{}</b> deleted.", escape_html(&dest.name))
                } else {
                    "This group no longer exists.".to_string()
                };
                self.say(chat, &text).await;
            }
            CallbackAction::Edit => {
                self.begin(key, Dialogue::AwaitingNewDescription { group_id })
                    .await;
                self.say(
                    chat,
                    &format!(
                        "Send the new description for <b>{}</b>.",
                        escape_html(&dest.name)
                    ),
                )
                .await;
            }
        }
        Ok(())
    }

    // ---------------- free text ----------------

    async fn on_text(&self, msg: TextMessage) -> Result<()> {
        let chat = msg.from.chat_id;
        let key = key(&msg.from);
        let Some(dialogue) = self.sessions.get(key).await else {
            self.say(chat, "Use the menu commands to get started.").await;
            return Ok(());
        };

        match dialogue {
            Dialogue::AwaitingRedirect { verifier, state } => {
                self.finish_auth(&msg, &verifier, &state).await
            }
            Dialogue::AwaitingAdminGrant => {
                let name = normalize_username(&msg.text);
                self.store.grant_admin(&name).await?;
                self.sessions.clear(key).await;
                info!("admin granted to {name}");
                self.say(chat, &format!("✅ {} is now an administrator.", escape_html(&name)))
                    .await;
                Ok(())
            }
            Dialogue::AwaitingAdminRevoke => {
                let name = normalize_username(&msg.text);
                self.store.revoke_admin(&name).await?;
                self.sessions.clear(key).await;
                info!("admin revoked from {name}");
                self.say(
                    chat,
                    &format!("✅ {} is no longer an administrator.", escape_html(&name)),
                )
                .await;
                Ok(())
            }
            Dialogue::AwaitingGroupLink => self.resolve_link(&msg).await,
            Dialogue::AwaitingGroupDescription { pending } => {
                let description = msg.text.trim();
                self.store.save_destination(&pending, description).await?;
                self.sessions.clear(key).await;
                info!("destination {} added", pending.group_id.0);
                self.say(
                    chat,
                    &format!(
                        "✅ Group added.\nLink: {}\nDescription: {}",
                        escape_html(&pending.link),
                        escape_html(description)
                    ),
                )
                .await;
                Ok(())
            }
            Dialogue::AwaitingNewDescription { group_id } => {
                let updated = self
                    .store
                    .update_description(group_id, msg.text.trim())
                    .await?;
                self.sessions.clear(key).await;
                let text = if updated {
                    "✅ Description updated."
                } else {
                    "This group no longer exists."
                };
                self.say(chat, text).await;
                Ok(())
            }
            Dialogue::Upload(step) => self.upload_text(key, chat, step, &msg.text).await,
        }
    }

    async fn finish_auth(&self, msg: &TextMessage, verifier: &str, state: &str) -> Result<()> {
        let key = key(&msg.from);
        let params = parse_redirect(&msg.text)?;
        let Some(code) = params.code else {
            self.say(
                msg.from.chat_id,
                "No authorization code in that address. Check it and send it again.",
            )
            .await;
            return Ok(());
        };

        // From here on a failure means the whole flow has to restart.
        self.sessions.clear(key).await;
        if params.state.as_deref() != Some(state) {
            return Err(Error::AuthExchange("state mismatch".to_string()));
        }
        let device_id = params
            .device_id
            .ok_or_else(|| Error::AuthExchange("redirect has no device_id".to_string()))?;

        let tokens = self
            .identity
            .exchange_code(&code, &device_id, verifier)
            .await?;
        self.store
            .set_tokens(msg.from.user_id, &tokens, &device_id)
            .await?;
        info!("tokens stored for user {}", msg.from.user_id.0);
        self.say(msg.from.chat_id, "✅ Access token saved.").await;
        Ok(())
    }

    async fn resolve_link(&self, msg: &TextMessage) -> Result<()> {
        let chat = msg.from.chat_id;
        let Some(name) = screen_name_from_link(&msg.text) else {
            self.say(
                chat,
                "That doesn't look like a group link. Send something like <code>https://vk.com/example</code>.",
            )
            .await;
            return Ok(());
        };
        let token = self
            .store
            .access_token(msg.from.user_id)
            .await?
            .ok_or_else(|| Error::AuthExchange("no access token stored".to_string()))?;

        let group_id = self.platform.resolve_group(&name, &token).await?;
        self.sessions
            .set(
                key(&msg.from),
                Dialogue::AwaitingGroupDescription {
                    pending: NewDestination {
                        name,
                        link: msg.text.trim().to_string(),
                        group_id,
                    },
                },
            )
            .await;
        self.say(chat, "Now send a description for this group.").await;
        Ok(())
    }

    async fn upload_text(
        &self,
        key: SessionKey,
        chat: ChatId,
        step: UploadStep,
        text: &str,
    ) -> Result<()> {
        match step {
            UploadStep::ChoosingDestination => {
                self.say(chat, "Pick a group with the buttons above.").await;
            }
            UploadStep::SpecifyingCount { destination } => match parse_count(text) {
                Some(count) => {
                    self.sessions
                        .set(
                            key,
                            Dialogue::Upload(UploadStep::SpecifyingTime { destination, count }),
                        )
                        .await;
                    self.say(
                        chat,
                        &format!(
                            "{TIME_FORMAT_HINT}\nTime zone: {}.",
                            self.scheduler.timezone().name()
                        ),
                    )
                    .await;
                }
                None => {
                    self.say(chat, "Please enter a positive whole number of videos.")
                        .await;
                }
            },
            UploadStep::SpecifyingTime { destination, count } => {
                match parse_future_publish_time(text, (self.clock)()) {
                    Ok(at) => {
                        let plan = PublishPlan::new(destination, count, at)?;
                        self.sessions
                            .set(
                                key,
                                Dialogue::Upload(UploadStep::CollectingMedia { plan, status: None }),
                            )
                            .await;
                        self.say(chat, &format!("Send {count} video(s).")).await;
                    }
                    Err(PublishTimeError::Format) => {
                        self.say(chat, &format!("Invalid format. {TIME_FORMAT_HINT}"))
                            .await;
                    }
                    Err(PublishTimeError::NotInFuture) => {
                        self.say(chat, "That time has already passed. Choose a time in the future.")
                            .await;
                    }
                }
            }
            UploadStep::CollectingMedia { plan, .. } => {
                self.say(
                    chat,
                    &format!("Waiting for videos: {} remaining.", plan.remaining()),
                )
                .await;
            }
        }
        Ok(())
    }

    // ---------------- media ----------------

    async fn on_unsupported(&self, from: Sender) -> Result<()> {
        match self.sessions.get(key(&from)).await {
            Some(Dialogue::Upload(UploadStep::CollectingMedia { .. })) => Err(
                Error::UnsupportedMediaFormat("attachment is not a video".to_string()),
            ),
            _ => Ok(()),
        }
    }

    async fn on_video(&self, video: VideoMessage) -> Result<()> {
        let chat = video.from.chat_id;
        let key = key(&video.from);
        let Some(Dialogue::Upload(UploadStep::CollectingMedia { .. })) =
            self.sessions.get(key).await
        else {
            self.say(chat, "I'm not expecting videos right now. Start with /upload.")
                .await;
            return Ok(());
        };

        let acquired = self.acquirer.acquire(&video).await?;

        // Re-read: the session may have been cancelled while downloading.
        let Some(Dialogue::Upload(UploadStep::CollectingMedia { mut plan, status })) =
            self.sessions.get(key).await
        else {
            self.acquirer.claims().discard(&[acquired.into_path()]).await;
            return Ok(());
        };

        let progress = plan.push(acquired.into_path())?;
        if let Some(prev) = status {
            if let Err(e) = self.messenger.delete_message(prev).await {
                warn!("could not delete status message: {e}");
            }
        }

        match progress {
            PlanProgress::Remaining(n) => {
                let status = self
                    .say(chat, &format!("Video received. {n} remaining."))
                    .await;
                self.sessions
                    .set(
                        key,
                        Dialogue::Upload(UploadStep::CollectingMedia { plan, status }),
                    )
                    .await;
            }
            PlanProgress::Complete => {
                self.sessions.clear(key).await;
                self.say(chat, "All videos received.").await;
                self.dispatch(plan, &video.from).await?;
            }
        }
        Ok(())
    }

    /// Hand a complete plan to the scheduler and arrange the confirmation message.
    async fn dispatch(&self, plan: PublishPlan, from: &Sender) -> Result<()> {
        let link = destination_link(plan.destination());
        let start = plan.publish_time();
        let count = plan.requested();

        let jobs = plan.into_jobs(from.user_id, from.chat_id)?;
        let Some(last) = jobs.last().map(|j| j.trigger) else {
            return Ok(());
        };
        for job in jobs {
            self.acquirer.claims().claim(&job.media_path).await;
            let publisher = self.publisher.clone();
            let label = job.label();
            self.scheduler
                .schedule_at(job.trigger, label, async move { publisher.run(job).await })
                .await;
        }
        info!("{count} publish jobs scheduled for chat {}", from.chat_id.0);

        self.say(
            from.chat_id,
            &format!(
                "{count} video(s) will be published starting at {} in {link}.",
                short_datetime(start)
            ),
        )
        .await;

        let wait = completion_wait(last, (self.clock)(), COMPLETION_LEAD);
        let messenger = self.messenger.clone();
        let chat = from.chat_id;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let text = format!("✅ {count} video(s) published in {link}.");
            if let Err(e) = messenger.send_html(chat, &text).await {
                warn!("completion message failed: {e}");
            }
        });
        Ok(())
    }

    // ---------------- housekeeping ----------------

    /// Drop sessions idle for longer than the configured TTL and delete their media.
    pub async fn reap_stale_sessions(&self) -> usize {
        let stale = self.sessions.take_stale(self.config.session_ttl).await;
        let media: Vec<PathBuf> = stale.iter().flat_map(|(_, d)| d.staged_media()).collect();
        self.acquirer.claims().discard(&media).await;
        if !stale.is_empty() {
            info!(
                "reaped {} idle session(s), {} staged file(s)",
                stale.len(),
                media.len()
            );
        }
        stale.len()
    }

    pub async fn refresh_tokens(&self) -> Result<RefreshReport> {
        refresh_all(self.store.as_ref(), self.identity.as_ref()).await
    }

    /// Grant admin to configured usernames that already exist in the store.
    pub async fn bootstrap_admins(&self) {
        for name in &self.config.bootstrap_admins {
            match self.store.grant_admin(name).await {
                Ok(()) => info!("bootstrap admin {name} granted"),
                Err(Error::NotFound(_)) => {
                    info!("bootstrap admin {name} not registered yet; granted on /start")
                }
                Err(e) => warn!("bootstrap admin {name} failed: {e}"),
            }
        }
    }

    /// Register the recurring token refresh and session reaper.
    pub async fn install_housekeeping(self: &Arc<Self>) {
        let app = self.clone();
        self.scheduler
            .every(self.config.token_refresh_interval, "token refresh", move || {
                let app = app.clone();
                async move {
                    if let Err(e) = app.refresh_tokens().await {
                        warn!("token refresh failed: {e}");
                    }
                }
            })
            .await;

        let app = self.clone();
        let reap_every = (self.config.session_ttl / 4).max(Duration::from_secs(60));
        self.scheduler
            .every(reap_every, "session reaper", move || {
                let app = app.clone();
                async move {
                    app.reap_stale_sessions().await;
                }
            })
            .await;
    }
}
