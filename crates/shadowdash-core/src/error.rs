//! Error types for shadowdash-core

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::shadow::ShadowError;
use crate::store::StoreError;

/// Result type alias using shadowdash-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shadowdash-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Shadow store boundary error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shadow protocol error (aborted transaction, malformed document)
    #[error(transparent)]
    Shadow(#[from] ShadowError),

    /// Identity provider error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Device is not part of the dashboard
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Operation requires a signed-in session
    #[error("Not signed in")]
    NotSignedIn,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
