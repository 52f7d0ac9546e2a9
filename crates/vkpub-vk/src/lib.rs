//! VK adapter: community video upload + wall posting over the REST API, and the
//! VK ID OAuth2 token endpoint.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use vkpub_core::{
    config::Config,
    domain::{GroupId, TokenSet},
    errors::Error,
    pkce::generate_state,
    ports::{IdentityProvider, UploadSlot, VideoPlatform},
    Result,
};

pub const API_BASE: &str = "https://api.vk.com/method";
pub const TOKEN_ENDPOINT: &str = "https://id.vk.com/oauth2/auth";

#[derive(Clone, Debug)]
pub struct VkClient {
    http: reqwest::Client,
    api_base: String,
    token_endpoint: String,
    api_version: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl VkClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            api_version: cfg.api_version.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_url: cfg.redirect_url.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base.trim_end_matches('/'))
    }

    /// Call an API method; transport failures are mapped with `wrap`.
    async fn call(
        &self,
        method: &str,
        params: &[(&str, String)],
        wrap: fn(String) -> Error,
    ) -> Result<Value> {
        debug!("vk {method}");
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("v", self.api_version.clone()));

        let resp = self
            .http
            .post(self.method_url(method))
            .query(&query)
            .send()
            .await
            .map_err(|e| wrap(format!("{method} request error: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(wrap(format!("{method}: HTTP {status} {}", preview(&body))));
        }
        serde_json::from_str(&body)
            .map_err(|e| wrap(format!("{method}: invalid json ({e}): {}", preview(&body))))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::AuthExchange(format!("token request error: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let value: Value = serde_json::from_str(&body).map_err(|_| {
            Error::AuthExchange(format!("token endpoint: HTTP {status} {}", preview(&body)))
        })?;
        if !status.is_success() {
            let detail = oauth_error(&value).unwrap_or_else(|| preview(&body));
            return Err(Error::AuthExchange(format!("HTTP {status}: {detail}")));
        }
        Ok(value)
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

/// `error.error_msg` (plus code) from an API envelope.
pub fn api_error(v: &Value) -> Option<String> {
    let err = v.get("error")?;
    let msg = err
        .get("error_msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Some(match err.get("error_code").and_then(Value::as_i64) {
        Some(code) => format!("{msg} (code {code})"),
        None => msg.to_string(),
    })
}

fn oauth_error(v: &Value) -> Option<String> {
    let err = v.get("error")?.as_str()?;
    Some(match v.get("error_description").and_then(Value::as_str) {
        Some(desc) => format!("{err}: {desc}"),
        None => err.to_string(),
    })
}

/// `groups.getById`: `response.groups[0].id` (older versions return a bare array).
pub fn parse_group_id(v: &Value) -> Result<GroupId> {
    if let Some(e) = api_error(v) {
        return Err(Error::Lookup(e));
    }
    let resp = v
        .get("response")
        .ok_or_else(|| Error::Lookup("empty response".to_string()))?;
    let groups = resp.get("groups").unwrap_or(resp);
    groups
        .get(0)
        .and_then(|g| g.get("id"))
        .and_then(Value::as_i64)
        .map(GroupId)
        .ok_or_else(|| Error::Lookup("group not found".to_string()))
}

/// `video.save`: upload url + video id.
pub fn parse_upload_slot(v: &Value) -> Result<UploadSlot> {
    if let Some(e) = api_error(v) {
        return Err(Error::Reservation(e));
    }
    let resp = v
        .get("response")
        .ok_or_else(|| Error::Reservation(format!("no response in {}", preview(&v.to_string()))))?;
    let upload_url = resp
        .get("upload_url")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Reservation("missing upload_url".to_string()))?;
    let video_id = resp
        .get("video_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Reservation("missing video_id".to_string()))?;
    Ok(UploadSlot {
        upload_url: upload_url.to_string(),
        video_id,
    })
}

pub fn check_wall_post(v: &Value) -> Result<()> {
    match api_error(v) {
        Some(e) => Err(Error::Post(e)),
        None => Ok(()),
    }
}

/// `secure.checkToken` succeeds only with `response.success == 1`.
pub fn parse_check_token(v: &Value) -> bool {
    api_error(v).is_none()
        && v.get("response")
            .and_then(|r| r.get("success"))
            .and_then(Value::as_i64)
            == Some(1)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
}

pub fn parse_token_set(v: Value) -> Result<TokenSet> {
    if let Some(e) = oauth_error(&v) {
        return Err(Error::AuthExchange(e));
    }
    let t: TokenResponse = serde_json::from_value(v)?;
    match (t.access_token, t.refresh_token) {
        (Some(access_token), Some(refresh_token)) => Ok(TokenSet {
            access_token,
            refresh_token,
            id_token: t.id_token,
        }),
        _ => Err(Error::AuthExchange(
            "token response lacks access_token or refresh_token".to_string(),
        )),
    }
}

#[async_trait]
impl VideoPlatform for VkClient {
    async fn resolve_group(&self, screen_name: &str, access_token: &str) -> Result<GroupId> {
        let v = self
            .call(
                "groups.getById",
                &[
                    ("group_id", screen_name.to_string()),
                    ("access_token", access_token.to_string()),
                ],
                Error::Lookup,
            )
            .await?;
        parse_group_id(&v)
    }

    async fn check_token(&self, access_token: &str) -> Result<bool> {
        let v = self
            .call(
                "secure.checkToken",
                &[
                    ("access_token", self.client_secret.clone()),
                    ("token", access_token.to_string()),
                ],
                Error::External,
            )
            .await?;
        Ok(parse_check_token(&v))
    }

    async fn reserve_upload(
        &self,
        group_id: GroupId,
        title: &str,
        description: &str,
        access_token: &str,
    ) -> Result<UploadSlot> {
        let v = self
            .call(
                "video.save",
                &[
                    ("title", title.to_string()),
                    ("description", description.to_string()),
                    ("group_id", group_id.0.to_string()),
                    ("access_token", access_token.to_string()),
                ],
                Error::Reservation,
            )
            .await?;
        parse_upload_slot(&v)
    }

    async fn upload_video(&self, upload_url: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("video.mp4")
            .to_string();
        let size = bytes.len();

        let form = reqwest::multipart::Form::new().part(
            "video_file",
            reqwest::multipart::Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("video/mp4")
                .map_err(|e| Error::Upload(format!("multipart error: {e}")))?,
        );

        let resp = self
            .http
            .post(upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Upload(format!("request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upload(format!("HTTP {status} {}", preview(&body))));
        }
        info!("uploaded {} ({size} bytes)", path.display());
        Ok(())
    }

    async fn wall_post(&self, group_id: GroupId, video_id: i64, access_token: &str) -> Result<()> {
        let owner = group_id.owner_id();
        let v = self
            .call(
                "wall.post",
                &[
                    ("owner_id", owner.to_string()),
                    ("from_group", "1".to_string()),
                    ("attachments", format!("video{owner}_{video_id}")),
                    ("access_token", access_token.to_string()),
                ],
                Error::Post,
            )
            .await?;
        check_wall_post(&v)
    }
}

#[async_trait]
impl IdentityProvider for VkClient {
    async fn exchange_code(
        &self,
        code: &str,
        device_id: &str,
        code_verifier: &str,
    ) -> Result<TokenSet> {
        let v = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("device_id", device_id),
                ("code_verifier", code_verifier),
            ])
            .await?;
        parse_token_set(v)
    }

    async fn refresh(&self, refresh_token: &str, device_id: &str) -> Result<(String, String)> {
        let state = generate_state(&mut rand::thread_rng());
        let v = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("device_id", device_id),
                ("refresh_token", refresh_token),
                ("state", state.as_str()),
            ])
            .await?;
        let t = parse_token_set(v)?;
        Ok((t.access_token, t.refresh_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_id_comes_from_the_groups_list() {
        let v = json!({"response": {"groups": [{"id": 218375169, "name": "x"}], "profiles": []}});
        assert_eq!(parse_group_id(&v).unwrap(), GroupId(218375169));

        let legacy = json!({"response": [{"id": 5}]});
        assert_eq!(parse_group_id(&legacy).unwrap(), GroupId(5));
    }

    #[test]
    fn api_errors_become_lookup_failures() {
        let v = json!({"error": {"error_code": 100, "error_msg": "invalid group_id"}});
        match parse_group_id(&v) {
            Err(Error::Lookup(msg)) => assert_eq!(msg, "invalid group_id (code 100)"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_group_id(&json!({"response": {"groups": []}})),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn upload_slot_requires_url_and_id() {
        let ok = json!({"response": {"upload_url": "https://u", "video_id": 456, "owner_id": -1}});
        assert_eq!(
            parse_upload_slot(&ok).unwrap(),
            UploadSlot {
                upload_url: "https://u".to_string(),
                video_id: 456
            }
        );
        let missing = json!({"response": {"video_id": 456}});
        assert!(matches!(parse_upload_slot(&missing), Err(Error::Reservation(_))));
        let err = json!({"error": {"error_code": 15, "error_msg": "Access denied"}});
        assert!(matches!(parse_upload_slot(&err), Err(Error::Reservation(_))));
    }

    #[test]
    fn wall_post_error_body_is_a_failure_even_with_200() {
        assert!(check_wall_post(&json!({"response": {"post_id": 1}})).is_ok());
        assert!(matches!(
            check_wall_post(&json!({"error": {"error_code": 214, "error_msg": "Access to adding post denied"}})),
            Err(Error::Post(_))
        ));
    }

    #[test]
    fn check_token_needs_success_flag() {
        assert!(parse_check_token(&json!({"response": {"success": 1, "user_id": 1}})));
        assert!(!parse_check_token(&json!({"response": {"success": 0}})));
        assert!(!parse_check_token(&json!({"error": {"error_code": 5}})));
    }

    #[test]
    fn token_response_is_parsed() {
        let v = json!({
            "access_token": "a", "refresh_token": "r", "id_token": "i",
            "token_type": "Bearer", "expires_in": 3600, "user_id": 1, "state": "s"
        });
        assert_eq!(
            parse_token_set(v).unwrap(),
            TokenSet {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                id_token: Some("i".to_string())
            }
        );
    }

    #[test]
    fn oauth_error_is_an_auth_failure() {
        let v = json!({"error": "invalid_grant", "error_description": "code is expired"});
        match parse_token_set(v) {
            Err(Error::AuthExchange(msg)) => assert_eq!(msg, "invalid_grant: code is expired"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_token_set(json!({"access_token": "a"})),
            Err(Error::AuthExchange(_))
        ));
    }

    #[test]
    fn method_urls_join_cleanly() {
        let cfg = Config::from_lookup(|k| (k == "BOT_TOKEN").then(|| "1:a".to_string())).unwrap();
        let client = VkClient::from_config(&cfg).unwrap();
        assert_eq!(
            client.method_url("wall.post"),
            "https://api.vk.com/method/wall.post"
        );
    }
}
