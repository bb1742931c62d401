//! Tracks the signed-in session and announces changes.

use tokio::sync::watch;

use super::{AuthError, AuthResult, AuthSession, AuthUser, FederatedCredential, IdentityProvider};

/// Gate in front of the dashboard. Holds at most one session and publishes
/// every sign-in and sign-out on a `watch` channel.
pub struct AuthGate<P: IdentityProvider> {
    provider: P,
    session: watch::Sender<Option<AuthSession>>,
}

impl<P: IdentityProvider> AuthGate<P> {
    pub fn new(provider: P) -> Self {
        let (session, _) = watch::channel(None);
        Self { provider, session }
    }

    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Receiver that observes the current session and every later change.
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthSession>> {
        self.session.subscribe()
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.session.borrow().clone()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.session
            .borrow()
            .as_ref()
            .map(|session| session.user.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub async fn restore(&self) -> AuthResult<Option<AuthSession>> {
        let restored = self.provider.restore_session().await?;
        self.publish(restored.clone());
        Ok(restored)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        tracing::info!(uid = %session.user.uid, "Signed in with password");
        self.publish(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_in_with_federated(
        &self,
        credential: &FederatedCredential,
    ) -> AuthResult<AuthSession> {
        let session = self.provider.sign_in_with_federated(credential).await?;
        tracing::info!(
            uid = %session.user.uid,
            provider = credential.provider_id(),
            "Signed in with federated credential"
        );
        self.publish(Some(session.clone()));
        Ok(session)
    }

    /// Sign-up signs the new account in.
    pub async fn sign_up_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let session = self.provider.sign_up_with_password(email, password).await?;
        tracing::info!(uid = %session.user.uid, "Signed up");
        self.publish(Some(session.clone()));
        Ok(session)
    }

    /// Current session, refreshed first when its id token has expired.
    pub async fn valid_session(&self) -> AuthResult<AuthSession> {
        let session = self.current().ok_or(AuthError::NotSignedIn)?;
        if !session.is_expired() {
            return Ok(session);
        }

        let refreshed = self.provider.refresh(&session).await?;
        self.publish(Some(refreshed.clone()));
        Ok(refreshed)
    }

    /// Signing out while signed out is a no-op.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let Some(session) = self.current() else {
            return Ok(());
        };
        let result = self.provider.sign_out(&session).await;
        self.publish(None);
        tracing::info!(uid = %session.user.uid, "Signed out");
        result
    }

    fn publish(&self, session: Option<AuthSession>) {
        self.session.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                *current = session;
                true
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::auth::AuthErrorCode;
    use crate::util::unix_timestamp_now;

    #[derive(Clone, Default)]
    pub(crate) struct FakeProvider {
        pub(crate) stored: Arc<Mutex<Option<AuthSession>>>,
        pub(crate) reject_with: Arc<Mutex<Option<AuthErrorCode>>>,
        pub(crate) refreshes: Arc<Mutex<u32>>,
    }

    pub(crate) fn session_for(uid: &str, expires_at: i64) -> AuthSession {
        AuthSession {
            id_token: format!("id-{uid}"),
            refresh_token: format!("refresh-{uid}"),
            expires_at,
            user: AuthUser {
                uid: uid.to_string(),
                email: Some(format!("{uid}@example.com")),
            },
        }
    }

    impl FakeProvider {
        fn issue(&self, uid: &str) -> AuthResult<AuthSession> {
            if let Some(code) = self.reject_with.lock().unwrap().clone() {
                return Err(AuthError::Rejected(code));
            }
            let session = session_for(uid, unix_timestamp_now() + 3_600);
            *self.stored.lock().unwrap() = Some(session.clone());
            Ok(session)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn sign_in_with_password(&self, email: &str, _password: &str) -> AuthResult<AuthSession> {
            let uid = email.split('@').next().unwrap_or(email);
            self.issue(uid)
        }

        async fn sign_in_with_federated(
            &self,
            _credential: &FederatedCredential,
        ) -> AuthResult<AuthSession> {
            self.issue("google-user")
        }

        async fn sign_up_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
            if password.len() < 6 {
                return Err(AuthError::Rejected(AuthErrorCode::WeakPassword));
            }
            self.sign_in_with_password(email, password).await
        }

        async fn refresh(&self, session: &AuthSession) -> AuthResult<AuthSession> {
            *self.refreshes.lock().unwrap() += 1;
            self.issue(&session.user.uid)
        }

        async fn sign_out(&self, _session: &AuthSession) -> AuthResult<()> {
            *self.stored.lock().unwrap() = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn sign_in_and_out_publish_session_changes() {
        let gate = AuthGate::new(FakeProvider::default());
        let mut changes = gate.subscribe();
        assert!(changes.borrow_and_update().is_none());

        gate.sign_in_with_password("ana@example.com", "secret1")
            .await
            .unwrap();
        changes.changed().await.unwrap();
        assert_eq!(
            changes.borrow_and_update().as_ref().map(|s| s.user.uid.clone()),
            Some("ana".to_string())
        );

        gate.sign_out().await.unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().is_none());
        assert!(!gate.is_signed_in());
    }

    #[tokio::test]
    async fn rejected_sign_in_stays_signed_out() {
        let provider = FakeProvider::default();
        *provider.reject_with.lock().unwrap() = Some(AuthErrorCode::InvalidCredential);
        let gate = AuthGate::new(provider);
        let changes = gate.subscribe();

        let error = gate
            .sign_in_with_password("ana@example.com", "nope")
            .await
            .unwrap_err();
        assert_eq!(error.code(), Some(AuthErrorCode::InvalidCredential));
        assert!(!gate.is_signed_in());
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn weak_password_sign_up_is_reported() {
        let gate = AuthGate::new(FakeProvider::default());
        let error = gate
            .sign_up_with_password("ana@example.com", "123")
            .await
            .unwrap_err();
        assert_eq!(error.code(), Some(AuthErrorCode::WeakPassword));
    }

    #[tokio::test]
    async fn restore_publishes_persisted_session() {
        let provider = FakeProvider::default();
        *provider.stored.lock().unwrap() =
            Some(session_for("bia", unix_timestamp_now() + 3_600));
        let gate = AuthGate::new(provider);

        let restored = gate.restore().await.unwrap();
        assert_eq!(restored.map(|s| s.user.uid), Some("bia".to_string()));
        assert_eq!(gate.current_user().map(|u| u.uid), Some("bia".to_string()));
    }

    #[tokio::test]
    async fn valid_session_refreshes_expired_tokens() {
        let provider = FakeProvider::default();
        *provider.stored.lock().unwrap() = Some(session_for("bia", unix_timestamp_now() - 10));
        let gate = AuthGate::new(provider.clone());
        gate.restore().await.unwrap();

        let session = gate.valid_session().await.unwrap();
        assert!(!session.is_expired());
        assert_eq!(*provider.refreshes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn valid_session_requires_sign_in() {
        let gate = AuthGate::new(FakeProvider::default());
        assert!(matches!(
            gate.valid_session().await,
            Err(AuthError::NotSignedIn)
        ));
        gate.sign_out().await.unwrap();
    }
}
