use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shadowdash_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error(
        "Profile '{0}' has no Firebase credentials. Run `shadowdash config init --api-key <key> --project-id <id>` or set SHADOWDASH_FIREBASE_API_KEY and SHADOWDASH_FIREBASE_PROJECT_ID."
    )]
    NotConfigured(String),
    #[error("Profile '{0}' is not signed in. Run `shadowdash auth login --email <email> --password <password>`.")]
    NotSignedIn(String),
    #[error("Device '{0}' is not configured for this profile")]
    UnknownDevice(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

impl From<shadowdash_core::auth::AuthError> for CliError {
    fn from(error: shadowdash_core::auth::AuthError) -> Self {
        Self::Core(error.into())
    }
}

impl From<shadowdash_core::config::ConfigError> for CliError {
    fn from(error: shadowdash_core::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
