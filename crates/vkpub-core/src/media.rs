//! Media acquisition: download an inbound clip with retries, cap its duration and
//! stage it under a path derived from the attachment's content id.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::Mutex,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::DownloadPolicy,
    errors::Error,
    messaging::types::VideoMessage,
    ports::{MediaSource, MediaTranscoder},
    Result,
};

/// Clips at or above this length are trimmed.
pub const MAX_CLIP: Duration = Duration::from_secs(60);
/// Length a trimmed clip is cut to.
pub const TRIMMED_CLIP: Duration = Duration::from_secs(59);

/// Outcome of one acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acquired {
    Downloaded(PathBuf),
    /// A staged file for the same content id already existed; nothing was fetched.
    Reused(PathBuf),
}

impl Acquired {
    pub fn path(&self) -> &Path {
        match self {
            Acquired::Downloaded(p) | Acquired::Reused(p) => p,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Acquired::Downloaded(p) | Acquired::Reused(p) => p,
        }
    }
}

/// Staged clips referenced by scheduled publish jobs.
///
/// Staging paths are keyed by content id alone, so one file can back a dispatched
/// job and a later session that resent the same clip. A claimed path survives
/// [`ClipClaims::discard`] until every job holding it has released it.
#[derive(Clone, Default)]
pub struct ClipClaims {
    held: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl ClipClaims {
    pub async fn claim(&self, path: &Path) {
        *self.held.lock().await.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    /// Drop one claim. Returns `true` when no job references the path anymore.
    pub async fn release(&self, path: &Path) -> bool {
        let mut held = self.held.lock().await;
        match held.get_mut(path) {
            Some(n) if *n > 1 => {
                *n -= 1;
                false
            }
            Some(_) => {
                held.remove(path);
                true
            }
            None => true,
        }
    }

    pub async fn is_claimed(&self, path: &Path) -> bool {
        self.held.lock().await.contains_key(path)
    }

    /// Best-effort removal of staged clips that no scheduled job still needs.
    pub async fn discard(&self, paths: &[PathBuf]) {
        let held = self.held.lock().await;
        for p in paths {
            if held.contains_key(p) {
                debug!("keeping {}: referenced by a scheduled job", p.display());
                continue;
            }
            match tokio::fs::remove_file(p).await {
                Ok(()) => debug!("removed staged clip {}", p.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove staged clip {}: {e}", p.display()),
            }
        }
    }
}

pub struct MediaAcquirer {
    source: Arc<dyn MediaSource>,
    transcoder: Arc<dyn MediaTranscoder>,
    temp_dir: PathBuf,
    policy: DownloadPolicy,
    claims: ClipClaims,
}

impl MediaAcquirer {
    pub fn new(
        source: Arc<dyn MediaSource>,
        transcoder: Arc<dyn MediaTranscoder>,
        temp_dir: PathBuf,
        policy: DownloadPolicy,
    ) -> Self {
        Self {
            source,
            transcoder,
            temp_dir,
            policy,
            claims: ClipClaims::default(),
        }
    }

    pub fn claims(&self) -> &ClipClaims {
        &self.claims
    }

    /// Deterministic staging path for a content id.
    pub fn staging_path(&self, unique_id: &str) -> PathBuf {
        let safe: String = unique_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.temp_dir.join(format!("{safe}.mp4"))
    }

    pub async fn acquire(&self, video: &VideoMessage) -> Result<Acquired> {
        if let Some(mime) = video.mime_type.as_deref() {
            if !mime.starts_with("video/") {
                return Err(Error::UnsupportedMediaFormat(mime.to_string()));
            }
        }
        if video.unique_id.trim().is_empty() || video.file_id.trim().is_empty() {
            return Err(Error::UnsupportedMediaFormat(
                "attachment has no file id".to_string(),
            ));
        }

        let path = self.staging_path(&video.unique_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("reusing staged clip {}", path.display());
            return Ok(Acquired::Reused(path));
        }

        let part = path.with_extension("mp4.part");
        match self.fetch_and_normalize(video, &part).await {
            Ok(()) => {
                tokio::fs::rename(&part, &path).await?;
                info!("staged clip {}", path.display());
                Ok(Acquired::Downloaded(path))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn fetch_and_normalize(&self, video: &VideoMessage, part: &Path) -> Result<()> {
        self.download_with_retry(&video.file_id, part).await?;

        let duration = match video.duration_secs {
            Some(secs) => Duration::from_secs(u64::from(secs)),
            None => self
                .transcoder
                .probe_duration(part)
                .await
                .map_err(as_processing_error)?,
        };

        if duration >= MAX_CLIP {
            info!(
                "clip is {}s, trimming to {}s",
                duration.as_secs(),
                TRIMMED_CLIP.as_secs()
            );
            self.transcoder
                .trim(part, TRIMMED_CLIP)
                .await
                .map_err(as_processing_error)?;
        }
        Ok(())
    }

    async fn download_with_retry(&self, file_id: &str, dest: &Path) -> Result<()> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            match timeout(self.policy.timeout, self.source.download(file_id, dest)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => return Err(as_processing_error(e)),
                Err(_) => {
                    warn!("download attempt {attempt}/{attempts} timed out for {file_id}");
                    if attempt < attempts {
                        sleep(self.policy.backoff).await;
                    }
                }
            }
        }
        Err(Error::DownloadTimeout { attempts })
    }
}

fn as_processing_error(e: Error) -> Error {
    match e {
        Error::UnsupportedMediaFormat(_)
        | Error::MediaProcessing(_)
        | Error::DownloadTimeout { .. } => e,
        other => Error::MediaProcessing(other.to_string()),
    }
}
