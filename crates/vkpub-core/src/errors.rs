use std::path::PathBuf;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the conversation and
/// job boundaries can turn any failure into a chat message instead of crashing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("oauth exchange failed: {0}")]
    AuthExchange(String),

    #[error("download timed out after {attempts} attempts")]
    DownloadTimeout { attempts: u32 },

    #[error("unsupported media format: {0}")]
    UnsupportedMediaFormat(String),

    #[error("media processing failed: {0}")]
    MediaProcessing(String),

    #[error("upload reservation failed: {0}")]
    Reservation(String),

    #[error("video upload failed: {0}")]
    Upload(String),

    #[error("wall post failed: {0}")]
    Post(String),

    #[error("group lookup failed: {0}")]
    Lookup(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("missing file: {path}")]
    MissingFile { path: PathBuf },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Text shown to the operator when this error reaches a chat boundary.
    pub fn user_message(&self) -> String {
        match self {
            Error::AuthExchange(_) => {
                "❌ Could not obtain a token. Start again with /get_access_token.".to_string()
            }
            Error::DownloadTimeout { .. } => {
                "❌ Could not download the video after several attempts. Please resend it."
                    .to_string()
            }
            Error::UnsupportedMediaFormat(_) => {
                "❌ Unsupported file format. Please send a video.".to_string()
            }
            Error::MediaProcessing(_) => {
                "❌ Failed to process the video. You can try sending the file again.".to_string()
            }
            Error::Reservation(_) | Error::Upload(_) | Error::Post(_) => {
                format!("❌ Publishing failed: {}", truncate(&self.to_string(), 200))
            }
            Error::Lookup(_) => {
                "❌ Could not resolve the group id. Make sure the link is correct.".to_string()
            }
            Error::NotFound(_) => "❌ No user with that username was found.".to_string(),
            Error::InvalidInput(msg) => format!("⚠️ {msg}"),
            other => format!("❌ Error: {}", truncate(&other.to_string(), 200)),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    format!("{}...", s.chars().take(max).collect::<String>())
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_include_truncated_detail() {
        let err = Error::Upload("x".repeat(500));
        let msg = err.user_message();
        assert!(msg.starts_with("❌ Publishing failed"));
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn not_found_is_user_friendly() {
        let msg = Error::NotFound("ghost".to_string()).user_message();
        assert!(msg.contains("username"));
    }
}
