//! Firebase Identity Toolkit client.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{
    validate_credentials, AuthError, AuthErrorCode, AuthResult, AuthSession, AuthUser,
    FederatedCredential, IdentityProvider, SessionPersistence,
};
use crate::util::unix_timestamp_now;

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// `signInWithIdp` requires a request URI even when the token came from elsewhere.
const IDP_REQUEST_URI: &str = "http://localhost";

#[derive(Clone)]
pub struct FirebaseAuthClient<S: SessionPersistence> {
    identity_url: String,
    token_url: String,
    api_key: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> std::fmt::Debug for FirebaseAuthClient<S> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FirebaseAuthClient")
            .field("identity_url", &self.identity_url)
            .field("token_url", &self.token_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl<S: SessionPersistence> FirebaseAuthClient<S> {
    pub fn new(api_key: impl Into<String>, store: S) -> AuthResult<Self> {
        Self::with_endpoints(api_key, IDENTITY_TOOLKIT_URL, SECURE_TOKEN_URL, store)
    }

    /// Point the client at alternative endpoints, e.g. the auth emulator.
    pub fn with_endpoints(
        api_key: impl Into<String>,
        identity_url: &str,
        token_url: &str,
        store: S,
    ) -> AuthResult<Self> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Firebase API key must not be empty",
            ));
        }

        Ok(Self {
            identity_url: normalize_endpoint(identity_url)?,
            token_url: normalize_endpoint(token_url)?,
            api_key,
            client: Client::builder().build()?,
            store,
        })
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    fn identity_request(&self, method: &str) -> RequestBuilder {
        self.client
            .post(format!("{}/accounts:{method}", self.identity_url))
            .query(&[("key", self.api_key.as_str())])
    }

    async fn password_request(
        &self,
        method: &str,
        email: &str,
        password: &str,
    ) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;

        let payload = serde_json::json!({
            "email": email.trim(),
            "password": password,
            "returnSecureToken": true,
        });
        let response: IdentityResponse =
            send_json(self.identity_request(method).json(&payload)).await?;
        let session = response.into_session()?;
        self.store.save_session(&session)?;
        Ok(session)
    }
}

#[async_trait]
impl<S: SessionPersistence> IdentityProvider for FirebaseAuthClient<S> {
    async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored_session) = self.store.load_session()? else {
            return Ok(None);
        };

        if !stored_session.is_expired() {
            return Ok(Some(stored_session));
        }

        match self.refresh(&stored_session).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.store.clear_session()?;
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        self.password_request("signInWithPassword", email, password)
            .await
    }

    async fn sign_in_with_federated(
        &self,
        credential: &FederatedCredential,
    ) -> AuthResult<AuthSession> {
        let payload = serde_json::json!({
            "postBody": idp_post_body(credential),
            "requestUri": IDP_REQUEST_URI,
            "returnIdpCredential": true,
            "returnSecureToken": true,
        });
        let response: IdentityResponse =
            send_json(self.identity_request("signInWithIdp").json(&payload)).await?;
        let session = response.into_session()?;
        self.store.save_session(&session)?;
        Ok(session)
    }

    async fn sign_up_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        self.password_request("signUp", email, password).await
    }

    async fn refresh(&self, session: &AuthSession) -> AuthResult<AuthSession> {
        if session.refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": session.refresh_token,
        });
        let request = self
            .client
            .post(format!("{}/token", self.token_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&payload);
        let response: RefreshResponse = send_json(request).await?;
        let refreshed = response.into_session(&session.user)?;
        self.store.save_session(&refreshed)?;
        Ok(refreshed)
    }

    async fn sign_out(&self, _session: &AuthSession) -> AuthResult<()> {
        // Firebase id tokens are stateless; signing out only forgets them.
        self.store.clear_session()
    }
}

pub fn normalize_endpoint(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration(
            "Auth endpoint must not be empty",
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthError::InvalidConfiguration(
            "Auth endpoint must include http:// or https://",
        ));
    }
    Ok(trimmed.to_string())
}

fn idp_post_body(credential: &FederatedCredential) -> String {
    match credential {
        FederatedCredential::Google { id_token } => format!(
            "id_token={}&providerId={}",
            urlencoding::encode(id_token),
            credential.provider_id()
        ),
    }
}

async fn send_json<T: for<'de> Deserialize<'de>>(request: RequestBuilder) -> AuthResult<T> {
    let response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(parse_api_error(status, &body));
    }
    Ok(response.json::<T>().await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityResponse {
    local_id: Option<String>,
    email: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

impl IdentityResponse {
    fn into_session(self) -> AuthResult<AuthSession> {
        match (self.local_id, self.id_token, self.refresh_token) {
            (Some(uid), Some(id_token), Some(refresh_token)) => Ok(AuthSession {
                id_token,
                refresh_token,
                expires_at: expires_at(self.expires_in.as_deref()),
                user: AuthUser {
                    uid,
                    email: self.email,
                },
            }),
            _ => Err(AuthError::Api(
                "Auth response did not include enough session fields".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
    user_id: Option<String>,
}

impl RefreshResponse {
    fn into_session(self, previous_user: &AuthUser) -> AuthResult<AuthSession> {
        let (Some(id_token), Some(refresh_token)) = (self.id_token, self.refresh_token) else {
            return Err(AuthError::Api(
                "Refresh response did not include an active session".to_string(),
            ));
        };
        let user = match self.user_id {
            Some(uid) if uid != previous_user.uid => AuthUser { uid, email: None },
            _ => previous_user.clone(),
        };
        Ok(AuthSession {
            id_token,
            refresh_token,
            expires_at: expires_at(self.expires_in.as_deref()),
            user,
        })
    }
}

fn expires_at(expires_in: Option<&str>) -> i64 {
    let seconds = expires_in
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(3_600);
    unix_timestamp_now().saturating_add(seconds)
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> AuthError {
    if let Ok(ErrorEnvelope {
        error: Some(ErrorBody {
            message: Some(message),
        }),
    }) = serde_json::from_str::<ErrorEnvelope>(body)
    {
        return AuthError::Rejected(AuthErrorCode::from_provider_code(&message));
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        AuthError::Api(format!("HTTP {}", status.as_u16()))
    } else {
        AuthError::Api(format!("{} ({})", trimmed, status.as_u16()))
    }
}
