//! Hexagonal ports implemented by the adapter crates.

use std::{path::Path, time::Duration};

use async_trait::async_trait;

use crate::{
    domain::{
        Destination, GroupId, NewDestination, Operator, RefreshableOperator, TokenSet, UserId,
    },
    Result,
};

/// Fetches inbound attachments from the chat transport.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Write the attachment identified by `file_id` to `dest`.
    async fn download(&self, file_id: &str, dest: &Path) -> Result<()>;
}

/// Local media inspection and re-encoding.
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    async fn probe_duration(&self, path: &Path) -> Result<Duration>;

    /// Re-encode `path` in place, keeping only the first `keep` of the clip.
    async fn trim(&self, path: &Path, keep: Duration) -> Result<()>;
}

/// Reservation returned by the remote upload endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSlot {
    pub upload_url: String,
    pub video_id: i64,
}

/// REST surface of the remote video platform.
#[async_trait]
pub trait VideoPlatform: Send + Sync {
    /// Resolve a community screen name to its numeric id.
    async fn resolve_group(&self, screen_name: &str, access_token: &str) -> Result<GroupId>;

    async fn check_token(&self, access_token: &str) -> Result<bool>;

    async fn reserve_upload(
        &self,
        group_id: GroupId,
        title: &str,
        description: &str,
        access_token: &str,
    ) -> Result<UploadSlot>;

    async fn upload_video(&self, upload_url: &str, path: &Path) -> Result<()>;

    async fn wall_post(&self, group_id: GroupId, video_id: i64, access_token: &str) -> Result<()>;
}

/// OAuth2 identity provider (authorization-code + PKCE, refresh grant).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        device_id: &str,
        code_verifier: &str,
    ) -> Result<TokenSet>;

    /// Returns `(access_token, refresh_token)`.
    async fn refresh(&self, refresh_token: &str, device_id: &str) -> Result<(String, String)>;
}

/// Persistent operators + destinations.
///
/// Single statements are atomic; no multi-statement transactions are implied.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert the operator on first contact; never overwrites an existing row.
    async fn ensure_operator(&self, user_id: UserId, username: Option<&str>) -> Result<()>;
    async fn operator(&self, user_id: UserId) -> Result<Option<Operator>>;
    async fn is_admin(&self, user_id: UserId) -> Result<bool>;
    /// Fails with `NotFound` when no row has this username.
    async fn grant_admin(&self, username: &str) -> Result<()>;
    /// Fails with `NotFound` when no row has this username.
    async fn revoke_admin(&self, username: &str) -> Result<()>;
    async fn set_tokens(&self, user_id: UserId, tokens: &TokenSet, device_id: &str)
        -> Result<()>;
    async fn update_tokens(
        &self,
        user_id: UserId,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<()>;
    async fn access_token(&self, user_id: UserId) -> Result<Option<String>>;
    /// Admins holding a refresh token and device id.
    async fn refreshable_operators(&self) -> Result<Vec<RefreshableOperator>>;

    async fn list_destinations(&self) -> Result<Vec<Destination>>;
    async fn destination(&self, group_id: GroupId) -> Result<Option<Destination>>;
    async fn save_destination(&self, dest: &NewDestination, description: &str) -> Result<()>;
    /// Returns whether a row was deleted.
    async fn delete_destination(&self, group_id: GroupId) -> Result<bool>;
    /// Returns whether a row was updated.
    async fn update_description(&self, group_id: GroupId, description: &str) -> Result<bool>;
}
