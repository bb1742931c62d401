//! Identity provider boundary and session gate.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::unix_timestamp_now;

mod firebase;
mod gate;
mod messages;

pub use firebase::{FirebaseAuthClient, IDENTITY_TOOLKIT_URL, SECURE_TOKEN_URL};
pub use gate::AuthGate;
pub use messages::{AuthErrorCode, Locale};

#[cfg(test)]
pub(crate) use gate::tests::{session_for, FakeProvider};

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Credential obtained from an external identity provider.
#[derive(Clone, PartialEq, Eq)]
pub enum FederatedCredential {
    /// OpenID Connect id token issued by Google.
    Google { id_token: String },
}

impl FederatedCredential {
    pub const fn provider_id(&self) -> &'static str {
        match self {
            Self::Google { .. } => "google.com",
        }
    }
}

impl fmt::Debug for FederatedCredential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google { .. } => formatter
                .debug_struct("Google")
                .field("id_token", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Firebase auth is not configured.")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Identity provider rejected the request: {}", .0.as_code())]
    Rejected(AuthErrorCode),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
    #[error("Not signed in")]
    NotSignedIn,
}

impl AuthError {
    /// Provider error code, when the failure carries one.
    pub fn code(&self) -> Option<AuthErrorCode> {
        match self {
            Self::Rejected(code) => Some(code.clone()),
            Self::Http(error) if error.is_connect() || error.is_timeout() => {
                Some(AuthErrorCode::NetworkRequestFailed)
            }
            _ => None,
        }
    }

    pub fn user_message(&self, locale: Locale) -> String {
        self.code()
            .map_or_else(|| self.to_string(), |code| code.message(locale))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Session store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl SessionPersistence for NoPersistence {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        Ok(None)
    }

    fn save_session(&self, _session: &AuthSession) -> AuthResult<()> {
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Load a persisted session, refreshing it when expired.
    async fn restore_session(&self) -> AuthResult<Option<AuthSession>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession>;

    async fn sign_in_with_federated(
        &self,
        credential: &FederatedCredential,
    ) -> AuthResult<AuthSession>;

    async fn sign_up_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession>;

    async fn refresh(&self, session: &AuthSession) -> AuthResult<AuthSession>;

    async fn sign_out(&self, session: &AuthSession) -> AuthResult<()>;
}

pub(crate) fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if email.trim().is_empty() {
        return Err(AuthError::Api("Email is required".to_string()));
    }
    if password.is_empty() {
        return Err(AuthError::Api("Password is required".to_string()));
    }
    Ok(())
}
