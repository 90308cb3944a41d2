use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting: {0}")]
    Invalid(String),
    #[error("credentials file not found: {0}")]
    CredentialsNotFound(String),
}

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("failed to read credentials")]
    Credentials(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("failed to sign token assertion")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("token exchange rejected with status {status}: {body}")]
    Auth { status: u16, body: String },
    #[error("sheets request failed")]
    Http(#[from] reqwest::Error),
    #[error("sheets api returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected sheets response: {0}")]
    UnexpectedResponse(String),
}

/// Internal to the lookup client; callers see a `LookupOutcome` instead.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup request failed")]
    Transport(#[from] reqwest::Error),
    #[error("lookup api returned status {0}")]
    Status(u16),
    #[error("failed to decode lookup response")]
    Decode(#[source] serde_json::Error),
}
