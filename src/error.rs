use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Backend unavailable at {url}: {reason}")]
    BackendUnavailable { url: String, reason: String },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Missing required configuration value `{0}`")]
    ConfigurationMissing(&'static str),

    #[error("User {0} has neither a display name nor a real name")]
    NoDisplayName(String),

    #[error("Slack API call {method} failed: {reason}")]
    ChatPlatform { method: &'static str, reason: String },
}

impl RelayError {
    pub fn backend(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn slack(method: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::ChatPlatform {
            method,
            reason: reason.to_string(),
        }
    }
}
