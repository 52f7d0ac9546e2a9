//! Per-chat conversation state.
//!
//! Each variant carries exactly the data valid in that step, so e.g. a plan can only
//! exist once destination, count and time are known.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, Destination, GroupId, MessageRef, NewDestination, UserId},
    plan::PublishPlan,
};

#[derive(Clone, Debug)]
pub enum Dialogue {
    AwaitingRedirect { verifier: String, state: String },
    AwaitingAdminGrant,
    AwaitingAdminRevoke,
    AwaitingGroupLink,
    AwaitingGroupDescription { pending: NewDestination },
    AwaitingNewDescription { group_id: GroupId },
    Upload(UploadStep),
}

#[derive(Clone, Debug)]
pub enum UploadStep {
    ChoosingDestination,
    SpecifyingCount {
        destination: Destination,
    },
    SpecifyingTime {
        destination: Destination,
        count: u32,
    },
    CollectingMedia {
        plan: PublishPlan,
        /// The single "N remaining" message currently shown.
        status: Option<MessageRef>,
    },
}

impl Dialogue {
    /// Staged clips owned by this dialogue (not yet handed to the scheduler).
    pub fn staged_media(&self) -> Vec<std::path::PathBuf> {
        match self {
            Dialogue::Upload(UploadStep::CollectingMedia { plan, .. }) => plan.media().to_vec(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

struct Entry {
    dialogue: Dialogue,
    touched: Instant,
}

/// In-memory session table with idle tracking.
#[derive(Default)]
pub struct Sessions {
    inner: Mutex<HashMap<SessionKey, Entry>>,
}

impl Sessions {
    pub async fn get(&self, key: SessionKey) -> Option<Dialogue> {
        self.inner.lock().await.get(&key).map(|e| e.dialogue.clone())
    }

    /// Store `dialogue`, returning whatever it replaced.
    pub async fn set(&self, key: SessionKey, dialogue: Dialogue) -> Option<Dialogue> {
        self.inner
            .lock()
            .await
            .insert(
                key,
                Entry {
                    dialogue,
                    touched: Instant::now(),
                },
            )
            .map(|e| e.dialogue)
    }

    pub async fn clear(&self, key: SessionKey) -> Option<Dialogue> {
        self.inner.lock().await.remove(&key).map(|e| e.dialogue)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove and return sessions idle for at least `ttl`.
    pub async fn take_stale(&self, ttl: Duration) -> Vec<(SessionKey, Dialogue)> {
        let mut map = self.inner.lock().await;
        let stale: Vec<SessionKey> = map
            .iter()
            .filter(|(_, e)| e.touched.elapsed() >= ttl)
            .map(|(k, _)| *k)
            .collect();
        stale
            .into_iter()
            .filter_map(|k| map.remove(&k).map(|e| (k, e.dialogue)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: i64) -> SessionKey {
        SessionKey {
            chat_id: ChatId(n),
            user_id: UserId(n),
        }
    }

    #[tokio::test]
    async fn set_replaces_and_returns_previous() {
        let s = Sessions::default();
        assert!(s.set(key(1), Dialogue::AwaitingGroupLink).await.is_none());
        let prev = s.set(key(1), Dialogue::AwaitingAdminGrant).await;
        assert!(matches!(prev, Some(Dialogue::AwaitingGroupLink)));
        assert!(matches!(s.get(key(1)).await, Some(Dialogue::AwaitingAdminGrant)));
        assert!(s.clear(key(1)).await.is_some());
        assert!(s.is_empty().await);
    }

    #[tokio::test]
    async fn take_stale_respects_ttl() {
        let s = Sessions::default();
        s.set(key(1), Dialogue::AwaitingGroupLink).await;
        assert!(s.take_stale(Duration::from_secs(3600)).await.is_empty());
        let stale = s.take_stale(Duration::ZERO).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, key(1));
        assert!(s.is_empty().await);
    }
}
