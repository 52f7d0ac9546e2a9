use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use chrono_tz::Tz;
use tracing::info;

use crate::{errors::Error, Result};

/// Value used for required credentials that were never set.
pub const PLACEHOLDER: &str = "define me!";

/// Typed configuration loaded from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub bot_token: String,
    pub client_id: String,
    pub client_secret: String,

    // Storage
    pub database_url: String,
    pub temp_dir: PathBuf,

    // Remote platform
    pub api_version: String,
    pub redirect_url: String,
    pub oauth_scope: String,
    pub http_timeout: Duration,

    // Scheduling
    pub timezone: Tz,
    pub token_refresh_interval: Duration,
    pub session_ttl: Duration,

    // Media
    pub download: DownloadPolicy,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,

    pub bootstrap_admins: Vec<String>,
}

/// Retry/timeout policy for inbound media downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(60),
            backoff: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv(Path::new(".env"))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_or = |key: &str, default: &str| -> String {
            get(key)
                .and_then(non_empty)
                .unwrap_or_else(|| default.to_string())
        };
        let secs_or = |key: &str, default: u64| -> Duration {
            Duration::from_secs(
                get(key)
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };

        let bot_token = str_or("BOT_TOKEN", PLACEHOLDER);
        if bot_token == PLACEHOLDER {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let client_id = str_or("CLIENT_ID", PLACEHOLDER);
        let client_secret = str_or("CLIENT_SECRET", PLACEHOLDER);

        let tz_name = str_or("PUBLISH_TIMEZONE", "Asia/Yekaterinburg");
        let timezone = Tz::from_str(tz_name.trim())
            .map_err(|e| Error::Config(format!("invalid PUBLISH_TIMEZONE {tz_name}: {e}")))?;

        let defaults = DownloadPolicy::default();
        let download = DownloadPolicy {
            attempts: get("DOWNLOAD_ATTEMPTS")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.attempts),
            timeout: secs_or("DOWNLOAD_TIMEOUT_SECS", defaults.timeout.as_secs()),
            backoff: secs_or("DOWNLOAD_BACKOFF_SECS", defaults.backoff.as_secs()),
        };

        Ok(Self {
            bot_token,
            client_id,
            client_secret,
            database_url: str_or("DATABASE_URL", "sqlite://bot_database.db"),
            temp_dir: PathBuf::from(str_or("TEMP_DIR", "temp")),
            api_version: str_or("VK_API_VERSION", "5.199"),
            redirect_url: str_or("OAUTH_REDIRECT_URL", "https://oauth.vk.com/blank.html"),
            oauth_scope: str_or("OAUTH_SCOPE", "wall,video,offline"),
            http_timeout: secs_or("HTTP_TIMEOUT_SECS", 120),
            timezone,
            token_refresh_interval: secs_or("TOKEN_REFRESH_INTERVAL_SECS", 60),
            session_ttl: secs_or("SESSION_TTL_SECS", 86_400),
            download,
            ffmpeg_path: PathBuf::from(str_or("FFMPEG_PATH", "ffmpeg")),
            ffprobe_path: PathBuf::from(str_or("FFPROBE_PATH", "ffprobe")),
            bootstrap_admins: parse_csv(get("BOOTSTRAP_ADMINS")),
        })
    }

    /// Whether OAuth credentials are still the placeholder.
    pub fn oauth_configured(&self) -> bool {
        self.client_id != PLACEHOLDER
    }

    pub fn ensure_temp_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.temp_dir)?;
        Ok(())
    }
}

/// Load a dotenv file if it exists; variables already set win.
fn load_dotenv(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            info!("loaded environment from {}", path.display());
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(dotenvy::Error::LineParse(line, pos)) => Err(Error::Config(format!(
            "{}: cannot parse `{line}` at position {pos}",
            path.display()
        ))),
        Err(e) => Err(Error::Config(format!("{}: {e}", path.display()))),
    }
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().trim_start_matches('@').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_bot_token_is_rejected() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_lookup(lookup(&[("BOT_TOKEN", "123:abc")])).unwrap();
        assert_eq!(cfg.client_id, PLACEHOLDER);
        assert!(!cfg.oauth_configured());
        assert_eq!(cfg.timezone, chrono_tz::Asia::Yekaterinburg);
        assert_eq!(cfg.api_version, "5.199");
        assert_eq!(cfg.download, DownloadPolicy::default());
        assert_eq!(cfg.token_refresh_interval, Duration::from_secs(60));
        assert!(cfg.bootstrap_admins.is_empty());
    }

    #[test]
    fn overrides_and_csv_admins() {
        let cfg = Config::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("CLIENT_ID", "42"),
            ("PUBLISH_TIMEZONE", "Europe/Moscow"),
            ("BOOTSTRAP_ADMINS", "@alice, bob ,,"),
            ("DOWNLOAD_ATTEMPTS", "0"),
        ]))
        .unwrap();
        assert!(cfg.oauth_configured());
        assert_eq!(cfg.timezone, chrono_tz::Europe::Moscow);
        assert_eq!(cfg.bootstrap_admins, vec!["alice", "bob"]);
        assert_eq!(cfg.download.attempts, 3);
    }

    #[test]
    fn invalid_timezone_is_config_error() {
        let err = Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("PUBLISH_TIMEZONE", "Mars/Base")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn dotenv_fills_only_unset_variables() {
        let dir = crate::media::tests::temp_dir("vkpub-dotenv");
        let file = dir.join(".env");
        std::fs::write(
            &file,
            "# staging\nVKPUB_DOTENV_NEW=\"quoted value\"\nVKPUB_DOTENV_SET=from-file\n",
        )
        .unwrap();
        env::set_var("VKPUB_DOTENV_SET", "from-env");

        load_dotenv(&file).unwrap();
        assert_eq!(env::var("VKPUB_DOTENV_NEW").unwrap(), "quoted value");
        assert_eq!(env::var("VKPUB_DOTENV_SET").unwrap(), "from-env");

        assert!(load_dotenv(&dir.join("absent.env")).is_ok());
        let _ = std::fs::remove_dir_all(dir);
    }
}
