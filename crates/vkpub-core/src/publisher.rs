//! Remote publish sequence for one staged clip: reserve -> upload -> wall post.

use std::{path::PathBuf, sync::Arc};

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::{
    domain::{ChatId, GroupId, UserId},
    errors::Error,
    formatting::escape_html,
    media::ClipClaims,
    messaging::port::MessagingPort,
    ports::{Store, VideoPlatform},
    Result,
};

/// One scheduled upload-and-post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishJob {
    pub trigger: DateTime<Tz>,
    pub group_id: GroupId,
    pub description: String,
    pub operator: UserId,
    pub chat_id: ChatId,
    pub media_path: PathBuf,
}

impl PublishJob {
    pub fn label(&self) -> String {
        let file = self
            .media_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("publish {file} to {}", self.group_id.0)
    }
}

#[derive(Clone)]
pub struct Publisher {
    platform: Arc<dyn VideoPlatform>,
    store: Arc<dyn Store>,
    messenger: Arc<dyn MessagingPort>,
    claims: ClipClaims,
}

impl Publisher {
    pub fn new(
        platform: Arc<dyn VideoPlatform>,
        store: Arc<dyn Store>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            platform,
            store,
            messenger,
            claims: ClipClaims::default(),
        }
    }

    /// Share the claim registry the scheduling side records job clips in.
    pub fn with_claims(mut self, claims: ClipClaims) -> Self {
        self.claims = claims;
        self
    }

    /// Job boundary: failures are logged and reported to the operator, never propagated.
    pub async fn run(&self, job: PublishJob) {
        match self.publish(&job).await {
            Ok(()) => info!("{} done", job.label()),
            Err(e) => {
                error!("{} failed: {e}", job.label());
                // The clip stays on disk; only this job's hold on it ends.
                self.claims.release(&job.media_path).await;
                let msg = format!(
                    "{}\n<code>{}</code>",
                    escape_html(&e.user_message()),
                    escape_html(&job.label())
                );
                if let Err(send_err) = self.messenger.send_html(job.chat_id, &msg).await {
                    warn!("could not report publish failure: {send_err}");
                }
            }
        }
    }

    pub async fn publish(&self, job: &PublishJob) -> Result<()> {
        let token = self.access_token(job.operator).await?;
        if !tokio::fs::try_exists(&job.media_path).await.unwrap_or(false) {
            return Err(Error::MissingFile {
                path: job.media_path.clone(),
            });
        }
        let slot = self
            .platform
            .reserve_upload(job.group_id, &job.description, &job.description, &token)
            .await?;

        self.platform
            .upload_video(&slot.upload_url, &job.media_path)
            .await?;

        // Tokens rotate every refresh interval; re-read before posting.
        let token = self.access_token(job.operator).await?;
        self.platform
            .wall_post(job.group_id, slot.video_id, &token)
            .await?;

        if !self.claims.release(&job.media_path).await {
            info!(
                "{} still needed by another scheduled job",
                job.media_path.display()
            );
            return Ok(());
        }
        if let Err(e) = tokio::fs::remove_file(&job.media_path).await {
            warn!(
                "failed to remove published clip {}: {e}",
                job.media_path.display()
            );
        }
        Ok(())
    }

    async fn access_token(&self, operator: UserId) -> Result<String> {
        self.store
            .access_token(operator)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::AuthExchange(format!("operator {} has no access token", operator.0))
            })
    }
}
