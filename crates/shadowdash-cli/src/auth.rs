//! Firebase sessions for the CLI, kept in the OS keychain per profile.

use shadowdash_core::auth::{AuthResult, AuthSession, FirebaseAuthClient, SessionPersistence};
use shadowdash_core::config::DashboardConfig;

use crate::error::CliError;

/// Raw secret storage keyed by account name.
#[cfg(not(test))]
mod secret {
    use keyring::Entry;
    use shadowdash_core::auth::{AuthError, AuthResult};

    const SERVICE: &str = "shadowdash-cli";

    fn entry(account: &str) -> AuthResult<Entry> {
        Entry::new(SERVICE, account).map_err(storage_error)
    }

    fn storage_error(error: keyring::Error) -> AuthError {
        AuthError::SecureStorage(error.to_string())
    }

    pub fn read(account: &str) -> AuthResult<Option<String>> {
        match entry(account)?.get_password() {
            Ok(raw) => Ok(Some(raw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(storage_error(error)),
        }
    }

    pub fn write(account: &str, raw: &str) -> AuthResult<()> {
        entry(account)?.set_password(raw).map_err(storage_error)
    }

    pub fn delete(account: &str) -> AuthResult<()> {
        match entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(storage_error(error)),
        }
    }
}


/// Session slot for one CLI profile.
#[derive(Debug, Clone)]
pub struct SessionStore {
    account: String,
}

impl SessionStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            account: format!("firebase_session:{profile_name}"),
        }
    }
}

impl SessionPersistence for SessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        secret::read(&self.account)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        secret::write(&self.account, &serde_json::to_string(session)?)
    }

    fn clear_session(&self) -> AuthResult<()> {
        secret::delete(&self.account)
    }
}

pub type CliAuthClient = FirebaseAuthClient<SessionStore>;

pub fn auth_client_for_profile(
    profile_name: &str,
    profile: &DashboardConfig,
) -> Result<CliAuthClient, CliError> {
    let (api_key, _) = profile
        .firebase_credentials()
        .ok_or_else(|| CliError::NotConfigured(profile_name.to_string()))?;
    FirebaseAuthClient::new(api_key, SessionStore::new(profile_name))
        .map_err(|error| CliError::Auth(error.to_string()))
}

pub fn load_stored_session(profile_name: &str) -> AuthResult<Option<AuthSession>> {
    SessionStore::new(profile_name).load_session()
}

pub fn clear_stored_session(profile_name: &str) -> AuthResult<()> {
    SessionStore::new(profile_name).clear_session()
}
