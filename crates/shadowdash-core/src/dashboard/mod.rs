//! Authenticated device dashboard.
//!
//! The dashboard keeps one [`DeviceState`] per known device as the source of
//! truth, mounts realtime subscriptions for the signed-in session and
//! publishes [`DeviceCard`] projections and notices as [`DashboardEvent`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::auth::{AuthGate, AuthSession, AuthUser, FederatedCredential, IdentityProvider, Locale};
use crate::error::{Error, Result};
use crate::latency::LatencyThresholds;
use crate::models::{DesiredState, DeviceId, Principal};
use crate::shadow::{RefreshOutcome, ShadowClient, ShadowHandlers};

mod card;
mod notice;
mod registry;
mod state;

pub use card::DeviceCard;
pub use notice::{Notice, NoticeKind, NoticeLevel};
pub use registry::{SessionScope, SubscriptionRegistry};
pub use state::{DeviceState, PowerStatus};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    /// `None` once signed out.
    SessionChanged(Option<AuthUser>),
    CardUpdated(DeviceCard),
    Notice(Notice),
}

type StateMap = Arc<Mutex<HashMap<DeviceId, DeviceState>>>;

pub struct Dashboard<P: IdentityProvider> {
    shadow: ShadowClient,
    gate: Arc<AuthGate<P>>,
    devices: Vec<DeviceId>,
    thresholds: LatencyThresholds,
    locale: Locale,
    states: StateMap,
    scope: Mutex<Option<SessionScope>>,
    events: broadcast::Sender<DashboardEvent>,
}

impl<P: IdentityProvider> Dashboard<P> {
    pub fn new(shadow: ShadowClient, gate: Arc<AuthGate<P>>, devices: Vec<DeviceId>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shadow,
            gate,
            devices,
            thresholds: LatencyThresholds::default(),
            locale: Locale::default(),
            states: Arc::new(Mutex::new(HashMap::new())),
            scope: Mutex::new(None),
            events,
        }
    }

    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: LatencyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub const fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub const fn gate(&self) -> &Arc<AuthGate<P>> {
        &self.gate
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        lock(&self.scope).as_ref().map(|scope| scope.user().clone())
    }

    pub fn is_mounted(&self, device: &DeviceId) -> bool {
        lock(&self.scope)
            .as_ref()
            .is_some_and(|scope| scope.registry().contains(device))
    }

    /// Cards of every mounted device, in configuration order.
    pub fn cards(&self) -> Vec<DeviceCard> {
        let now = Utc::now();
        let states = lock(&self.states);
        self.devices
            .iter()
            .filter_map(|device| states.get(device))
            .map(|state| DeviceCard::project(state, self.thresholds, now))
            .collect()
    }

    pub fn card(&self, device: &DeviceId) -> Option<DeviceCard> {
        lock(&self.states)
            .get(device)
            .map(|state| DeviceCard::project(state, self.thresholds, Utc::now()))
    }

    /// React to the signed-in session changing.
    ///
    /// A different user (or none) tears down the previous session's
    /// subscriptions before the new ones are mounted. A refreshed token for
    /// the same user changes nothing.
    pub fn apply_session(&self, session: Option<&AuthSession>) {
        let mut scope = lock(&self.scope);
        let current_uid = scope.as_ref().map(|scope| scope.user().uid.as_str());
        if current_uid == session.map(|session| session.user.uid.as_str()) {
            return;
        }

        if let Some(previous) = scope.take() {
            previous.close();
        }
        lock(&self.states).clear();

        let Some(session) = session else {
            self.emit(DashboardEvent::SessionChanged(None));
            return;
        };

        let mut next = SessionScope::new(session.user.clone());
        for device in &self.devices {
            self.mount(device, &mut next);
        }
        tracing::info!(
            uid = %session.user.uid,
            "Mounted {} device(s) for session",
            next.registry().len()
        );
        *scope = Some(next);
        drop(scope);
        self.emit(DashboardEvent::SessionChanged(Some(session.user.clone())));
    }

    /// Follow the gate's session forever, applying every change.
    pub async fn follow_session(&self) {
        let mut sessions = self.gate.subscribe();
        loop {
            let session = sessions.borrow_and_update().clone();
            self.apply_session(session.as_ref());
            if sessions.changed().await.is_err() {
                break;
            }
        }
    }

    pub async fn restore(&self) -> Result<Option<AuthUser>> {
        let session = self.gate.restore().await?;
        self.apply_session(session.as_ref());
        Ok(session.map(|session| session.user))
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser> {
        let result = self.gate.sign_in_with_password(email, password).await;
        self.finish_sign_in(result)
    }

    pub async fn sign_in_with_federated(&self, credential: &FederatedCredential) -> Result<AuthUser> {
        let result = self.gate.sign_in_with_federated(credential).await;
        self.finish_sign_in(result)
    }

    pub async fn sign_up_with_password(&self, email: &str, password: &str) -> Result<AuthUser> {
        let result = self.gate.sign_up_with_password(email, password).await;
        self.finish_sign_in(result)
    }

    /// Tear down every subscription, then sign out.
    pub async fn sign_out(&self) -> Result<()> {
        let had_session = self.teardown();
        let result = self.gate.sign_out().await;
        if had_session {
            self.emit(DashboardEvent::SessionChanged(None));
        }
        result.map_err(Into::into)
    }

    /// Flip the desired power of `device` based on its state record.
    pub async fn toggle(&self, device: &DeviceId) -> Result<DesiredState> {
        self.principal()?;
        let target = self.with_state(device, DeviceState::toggle_target)?;
        self.set_power(device, target).await
    }

    pub async fn set_power(&self, device: &DeviceId, on: bool) -> Result<DesiredState> {
        let principal = self.principal()?;
        self.update_state(device, |state| state.set_busy(true))?;

        let result = self.shadow.set_desired(device, on, &principal).await;
        // The session may have changed meanwhile; the record is gone then.
        let _ = self.update_state(device, |state| state.set_busy(false));

        match result {
            Ok(desired) => {
                self.notify(&NoticeKind::DesiredUpdated { on });
                Ok(desired)
            }
            Err(error) => {
                tracing::error!("Toggle of {} failed: {}", device, error);
                self.notify(&NoticeKind::UpdateFailed);
                Err(error.into())
            }
        }
    }

    /// Manual one-off read of the reported state.
    pub async fn refresh(&self, device: &DeviceId) -> Result<RefreshOutcome> {
        self.principal()?;
        self.with_state(device, |_| ())?;

        match self.shadow.refresh(device).await {
            Ok(outcome) => {
                let kind = match outcome {
                    RefreshOutcome::Synced(_) => NoticeKind::ReportedSynced,
                    RefreshOutcome::NoReportedYet => NoticeKind::NoReportedYet,
                };
                self.notify(&kind);
                Ok(outcome)
            }
            Err(error) => {
                tracing::error!("Refresh of {} failed: {}", device, error);
                self.notify(&NoticeKind::RefreshFailed);
                Err(error.into())
            }
        }
    }

    fn finish_sign_in(&self, result: crate::auth::AuthResult<AuthSession>) -> Result<AuthUser> {
        match result {
            Ok(session) => {
                self.apply_session(Some(&session));
                Ok(session.user)
            }
            Err(error) => {
                self.emit(DashboardEvent::Notice(Notice {
                    level: NoticeLevel::Error,
                    message: error.user_message(self.locale),
                }));
                Err(error.into())
            }
        }
    }

    fn mount(&self, device: &DeviceId, scope: &mut SessionScope) {
        let state = DeviceState::new(device.clone());
        let card = DeviceCard::project(&state, self.thresholds, Utc::now());
        lock(&self.states).insert(device.clone(), state);
        self.emit(DashboardEvent::CardUpdated(card));

        let events = self.events.clone();
        let locale = self.locale;
        let lost_device = device.clone();
        let handlers = ShadowHandlers::new(
            self.card_updater(device, DeviceState::apply_desired),
            self.card_updater(device, DeviceState::apply_reported),
        )
        .on_error(move |slot, error| {
            tracing::warn!("Realtime {} updates for {} lost: {}", slot, lost_device, error);
            let kind = NoticeKind::RealtimeLost {
                device: lost_device.clone(),
            };
            let _ = events.send(DashboardEvent::Notice(Notice::new(&kind, locale)));
        });

        let subscription = self.shadow.subscribe(device, handlers);
        scope.registry_mut().insert(device.clone(), subscription);
    }

    fn card_updater<T: Send + 'static>(
        &self,
        device: &DeviceId,
        apply: impl Fn(&mut DeviceState, Option<T>) + Send + 'static,
    ) -> Box<dyn FnMut(Option<T>) + Send> {
        let states = Arc::clone(&self.states);
        let events = self.events.clone();
        let thresholds = self.thresholds;
        let device = device.clone();
        Box::new(move |value| {
            let card = {
                let mut states = lock(&states);
                let Some(state) = states.get_mut(&device) else {
                    return;
                };
                apply(state, value);
                DeviceCard::project(state, thresholds, Utc::now())
            };
            let _ = events.send(DashboardEvent::CardUpdated(card));
        })
    }

    fn teardown(&self) -> bool {
        let previous = lock(&self.scope).take();
        let had_session = previous.is_some();
        if let Some(previous) = previous {
            previous.close();
        }
        lock(&self.states).clear();
        had_session
    }

    fn principal(&self) -> Result<Principal> {
        lock(&self.scope)
            .as_ref()
            .map(|scope| scope.principal().clone())
            .ok_or(Error::NotSignedIn)
    }

    fn with_state<R>(&self, device: &DeviceId, read: impl FnOnce(&DeviceState) -> R) -> Result<R> {
        lock(&self.states)
            .get(device)
            .map(read)
            .ok_or_else(|| Error::UnknownDevice(device.to_string()))
    }

    fn update_state(&self, device: &DeviceId, update: impl FnOnce(&mut DeviceState)) -> Result<()> {
        let card = {
            let mut states = lock(&self.states);
            let state = states
                .get_mut(device)
                .ok_or_else(|| Error::UnknownDevice(device.to_string()))?;
            update(state);
            DeviceCard::project(state, self.thresholds, Utc::now())
        };
        self.emit(DashboardEvent::CardUpdated(card));
        Ok(())
    }

    fn notify(&self, kind: &NoticeKind) {
        self.emit(DashboardEvent::Notice(Notice::new(kind, self.locale)));
    }

    fn emit(&self, event: DashboardEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
